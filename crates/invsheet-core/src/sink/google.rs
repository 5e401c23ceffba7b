//! Google Sheets sink: appends rows to the month tab of a named spreadsheet.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Month;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::RecordSink;
use super::auth::{AccessToken, access_token};
use crate::error::SinkError;
use crate::models::config::{SheetsAuth, SheetsConfig};

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Thin client over the Drive file listing and the Sheets values API.
///
/// When built from a service-account key the token is exchanged again once
/// it nears expiry.
pub struct SheetsClient {
    http: reqwest::Client,
    token: AccessToken,
    auth: Option<SheetsAuth>,
    sheets_endpoint: String,
    drive_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<SheetInfo>,
}

#[derive(Debug, Deserialize)]
struct SheetInfo {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

impl SheetsClient {
    /// Authenticate and build a client for the configured endpoints.
    pub async fn connect(config: &SheetsConfig, auth: &SheetsAuth) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SinkError::Http(e.to_string()))?;
        let token = access_token(&http, auth).await?;
        Ok(Self::with_access(http, token, Some(auth.clone()), config))
    }

    /// Build a client around an existing token that is never refreshed.
    pub fn with_token(http: reqwest::Client, token: impl Into<String>, config: &SheetsConfig) -> Self {
        Self::with_access(http, AccessToken::new(token), None, config)
    }

    /// Build a client around a token, refreshing it from `auth` when stale.
    pub fn with_access(
        http: reqwest::Client,
        token: AccessToken,
        auth: Option<SheetsAuth>,
        config: &SheetsConfig,
    ) -> Self {
        Self {
            http,
            token,
            auth,
            sheets_endpoint: config.sheets_endpoint.trim_end_matches('/').to_string(),
            drive_endpoint: config.drive_endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(base: &str, segments: &[&str]) -> Result<Url, SinkError> {
        let mut url =
            Url::parse(base).map_err(|e| SinkError::Http(format!("invalid endpoint {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::Http(format!("invalid endpoint {}", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Current bearer token, exchanged again when it is about to expire.
    async fn bearer(&mut self) -> Result<String, SinkError> {
        if self.token.is_stale(chrono::Utc::now().timestamp()) {
            if let Some(auth) = &self.auth {
                info!("Access token expiring, requesting a new one");
                self.token = access_token(&self.http, auth).await?;
            }
        }
        Ok(self.token.value.clone())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Find a spreadsheet visible to the credential by its exact name,
    /// shared drives included.
    pub async fn find_spreadsheet(&mut self, name: &str) -> Result<String, SinkError> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'"),
            SPREADSHEET_MIME
        );
        let url = Self::url(&self.drive_endpoint, &["drive", "v3", "files"])?;
        let token = self.bearer().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        let list: FileList = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;

        let mut files = list.files.into_iter();
        let Some(file) = files.next() else {
            return Err(SinkError::SpreadsheetNotFound(name.to_string()));
        };
        if files.next().is_some() {
            warn!("Several spreadsheets named '{}', using {}", name, file.id);
        }
        debug!("Spreadsheet '{}' has id {}", file.name, file.id);
        Ok(file.id)
    }

    /// Titles of every tab in a spreadsheet, in tab order.
    pub async fn tab_titles(&mut self, spreadsheet_id: &str) -> Result<Vec<String>, SinkError> {
        let url = Self::url(&self.sheets_endpoint, &["v4", "spreadsheets", spreadsheet_id])?;
        let token = self.bearer().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        let info: SpreadsheetInfo = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        Ok(info.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    /// Append one row after the last row of a tab.
    pub async fn append_row(&mut self, spreadsheet_id: &str, tab: &str, row: &[String]) -> Result<(), SinkError> {
        let range = format!("'{}'!A1:append", tab.replace('\'', "''"));
        let url = Self::url(
            &self.sheets_endpoint,
            &["v4", "spreadsheets", spreadsheet_id, "values", &range],
        )?;
        let token = self.bearer().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "majorDimension": "ROWS", "values": [row] }))
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Sink appending rows to one tab of the remote spreadsheet.
pub struct GoogleSheetSink {
    client: SheetsClient,
    spreadsheet_id: String,
    tab: String,
}

impl GoogleSheetSink {
    /// Authenticate, open the configured spreadsheet and select the month's tab.
    pub async fn connect(config: &SheetsConfig, auth: &SheetsAuth, month: Month) -> Result<Self, SinkError> {
        let client = SheetsClient::connect(config, auth).await?;
        Self::open(client, &config.spreadsheet_name, month.name()).await
    }

    /// Open a spreadsheet by name and select a tab by exact title.
    pub async fn open(mut client: SheetsClient, spreadsheet_name: &str, tab: &str) -> Result<Self, SinkError> {
        let spreadsheet_id = client.find_spreadsheet(spreadsheet_name).await?;
        let titles = client.tab_titles(&spreadsheet_id).await?;
        if !titles.iter().any(|t| t == tab) {
            return Err(SinkError::TabNotFound(tab.to_string()));
        }

        info!("Appending to tab '{}' of '{}'", tab, spreadsheet_name);
        Ok(Self {
            client,
            spreadsheet_id,
            tab: tab.to_string(),
        })
    }

    /// Selected tab title.
    pub fn tab(&self) -> &str {
        &self.tab
    }
}

#[async_trait]
impl RecordSink for GoogleSheetSink {
    fn name(&self) -> &str {
        "google-sheets"
    }

    async fn append(&mut self, row: &[String]) -> Result<(), SinkError> {
        self.client.append_row(&self.spreadsheet_id, &self.tab, row).await?;
        debug!("Appended {} cells to '{}'", row.len(), self.tab);
        Ok(())
    }
}
