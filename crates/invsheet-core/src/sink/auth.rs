//! OAuth access tokens for the Google APIs.
//!
//! A service-account key is exchanged for a bearer token with the RS256 JWT
//! bearer grant. A ready token can be supplied instead.

use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::models::config::SheetsAuth;

/// Scopes requested for the token: spreadsheet edits and file lookup.
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The fields of a service-account key file needed for the grant.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// A bearer token and, when known, its expiry as a Unix timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<i64>,
}

impl AccessToken {
    /// A token with no known expiry.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Whether the token expires within the refresh margin of `now`.
    pub fn is_stale(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - REFRESH_MARGIN_SECS <= now)
    }
}

impl ServiceAccountKey {
    /// Read a key from its JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SinkError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SinkError::Auth(format!("cannot read key file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| SinkError::Auth(format!("invalid key file {}: {}", path.display(), e)))
    }

    /// Signed assertion for the token endpoint, valid for one hour from `now`.
    pub fn assertion(&self, now: i64) -> Result<String, SinkError> {
        let claims = Claims {
            iss: self.client_email.clone(),
            scope: SCOPES.join(" "),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| SinkError::Auth(format!("invalid private key: {}", e)))?;
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| SinkError::Auth(format!("failed to sign assertion: {}", e)))
    }

    /// Exchange the key for an access token.
    pub async fn exchange(&self, http: &reqwest::Client) -> Result<AccessToken, SinkError> {
        let now = chrono::Utc::now().timestamp();
        let assertion = self.assertion(now)?;
        debug!("Requesting access token for {}", self.client_email);

        let response = http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SinkError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Auth(format!("invalid token response: {}", e)))?;
        info!("Obtained access token for {}", self.client_email);
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Some(now + token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS)),
        })
    }
}

/// Resolve a bearer token for the configured authentication.
pub async fn access_token(http: &reqwest::Client, auth: &SheetsAuth) -> Result<AccessToken, SinkError> {
    match auth {
        SheetsAuth::AccessToken(token) => Ok(AccessToken::new(token.clone())),
        SheetsAuth::ServiceAccount(path) => ServiceAccountKey::from_file(path)?.exchange(http).await,
        SheetsAuth::Missing => Err(SinkError::Auth(
            "no service-account key file or access token configured".to_string(),
        )),
    }
}
