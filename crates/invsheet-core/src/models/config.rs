//! Configuration structures for the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Main configuration for the invsheet pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvsheetConfig {
    /// PDF text acquisition configuration.
    pub pdf: PdfConfig,

    /// OCR configuration.
    pub ocr: OcrConfig,

    /// Remote text-generation configuration.
    pub model: ModelConfig,

    /// Remote spreadsheet configuration.
    pub sheets: SheetsConfig,

    /// Sink policies.
    pub sink: SinkConfig,
}

/// What to do when embedded text and OCR text have different page counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMismatch {
    /// Pair pages by position and stop at the shorter sequence.
    #[default]
    Truncate,
    /// Pair pages by position, treating the missing side as empty.
    Pad,
    /// Fail the invoice.
    Error,
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Pairing policy for embedded and OCR page text.
    pub page_mismatch: PageMismatch,

    /// Cap on the normalized document length in characters (0 = unlimited).
    pub max_chars: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            page_mismatch: PageMismatch::Truncate,
            max_chars: 0,
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Run OCR over page images in addition to embedded text extraction.
    pub enabled: bool,

    /// Directory containing `det.onnx`, `latin_rec.onnx` and `latin_dict.txt`.
    pub model_dir: PathBuf,

    /// Keep `[UNK]` tokens in recognized text instead of replacing them with spaces.
    pub keep_unk: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_dir: PathBuf::from("models"),
            keep_unk: false,
        }
    }
}

impl OcrConfig {
    /// Model files expected in [`OcrConfig::model_dir`].
    pub const MODEL_FILES: [&'static str; 3] = ["det.onnx", "latin_rec.onnx", "latin_dict.txt"];

    /// Whether every model file is present.
    pub fn models_present(&self) -> bool {
        Self::MODEL_FILES
            .iter()
            .all(|name| self.model_dir.join(name).exists())
    }
}

/// How the model is asked to format its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFormat {
    /// Free text, one `Label: value` line per field, parsed by substring match.
    #[default]
    Lines,
    /// A single JSON object keyed by field label.
    Json,
}

/// Remote text-generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the generative language API.
    pub endpoint: String,

    /// Model name.
    pub model: String,

    /// API key. Prefer `api_key_env` over storing the key here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment (or `.env`) variable holding the API key.
    pub api_key_env: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Nucleus sampling threshold.
    pub top_p: f32,

    /// Top-k sampling threshold.
    pub top_k: u32,

    /// Maximum reply length in tokens.
    pub max_output_tokens: u32,

    /// Reply format requested from the model.
    pub reply_format: ReplyFormat,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 1.0,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 8192,
            reply_format: ReplyFormat::Lines,
            timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    /// Response MIME type matching the reply format.
    pub fn response_mime_type(&self) -> &'static str {
        match self.reply_format {
            ReplyFormat::Lines => "text/plain",
            ReplyFormat::Json => "application/json",
        }
    }
}

/// Remote spreadsheet configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// Append rows to the remote spreadsheet.
    pub enabled: bool,

    /// Document name of the target spreadsheet.
    pub spreadsheet_name: String,

    /// Service-account key file (JSON).
    pub credentials_file: PathBuf,

    /// Environment (or `.env`) variable holding a ready OAuth access token.
    /// When set, it takes precedence over the key file.
    pub access_token_env: String,

    /// Base URL of the Sheets API.
    pub sheets_endpoint: String,

    /// Base URL of the Drive API.
    pub drive_endpoint: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spreadsheet_name: "Health&GlowMasterData".to_string(),
            credentials_file: PathBuf::from("secret_key.json"),
            access_token_env: "GOOGLE_SHEETS_ACCESS_TOKEN".to_string(),
            sheets_endpoint: "https://sheets.googleapis.com".to_string(),
            drive_endpoint: "https://www.googleapis.com".to_string(),
            timeout_secs: 120,
        }
    }
}

/// How the two sinks relate when one of them fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Attempt every sink and report failures individually.
    #[default]
    BestEffort,
    /// Append locally only after the remote append succeeded.
    AllOrNothing,
}

/// When the local workbook is written to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// Buffer rows and save once after the batch.
    #[default]
    EndOfBatch,
    /// Save after every appended row.
    PerRow,
}

/// Sink policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Cross-sink consistency policy.
    pub consistency: Consistency,

    /// Local workbook persistence policy.
    pub persist: PersistMode,
}

impl InvsheetConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}

/// How the remote spreadsheet sink authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsAuth {
    /// A ready OAuth access token.
    AccessToken(String),
    /// A service-account key file to exchange for a token.
    ServiceAccount(PathBuf),
    /// Nothing configured.
    Missing,
}

/// Secrets resolved once at startup and passed explicitly into the pipeline.
#[derive(Clone)]
pub struct Credentials {
    /// API key for the text-generation endpoint.
    pub model_api_key: Option<String>,
    /// Authentication for the spreadsheet endpoints.
    pub sheets: SheetsAuth,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("model_api_key", &self.model_api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "sheets",
                &match &self.sheets {
                    SheetsAuth::AccessToken(_) => "access token".to_string(),
                    SheetsAuth::ServiceAccount(path) => path.display().to_string(),
                    SheetsAuth::Missing => "missing".to_string(),
                },
            )
            .finish()
    }
}

impl Credentials {
    /// Resolve secrets from the configuration, an optional `.env` file and
    /// the process environment, in that order. The `.env` file is read
    /// without touching the process environment.
    pub fn resolve(config: &InvsheetConfig, dotenv: Option<&Path>) -> Self {
        let file_vars = dotenv.map(read_dotenv).unwrap_or_default();
        let lookup = |name: &str| -> Option<String> {
            if name.is_empty() {
                return None;
            }
            file_vars
                .get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
                .filter(|v| !v.trim().is_empty())
        };

        let model_api_key = config
            .model
            .api_key
            .clone()
            .or_else(|| lookup(&config.model.api_key_env));

        let sheets = if let Some(token) = lookup(&config.sheets.access_token_env) {
            SheetsAuth::AccessToken(token)
        } else if config.sheets.credentials_file.exists() {
            SheetsAuth::ServiceAccount(config.sheets.credentials_file.clone())
        } else {
            SheetsAuth::Missing
        };

        Self {
            model_api_key,
            sheets,
        }
    }
}

fn read_dotenv(path: &Path) -> HashMap<String, String> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.filter_map(|item| item.ok()).collect(),
        Err(e) => {
            debug!("No .env read from {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_sampling() {
        let config = InvsheetConfig::default();
        assert_eq!(config.model.temperature, 1.0);
        assert_eq!(config.model.top_p, 0.95);
        assert_eq!(config.model.top_k, 64);
        assert_eq!(config.model.max_output_tokens, 8192);
        assert_eq!(config.model.response_mime_type(), "text/plain");
        assert_eq!(config.pdf.page_mismatch, PageMismatch::Truncate);
        assert_eq!(config.sink.persist, PersistMode::EndOfBatch);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: InvsheetConfig = serde_json::from_str(
            r#"{"model": {"reply_format": "json"}, "sink": {"consistency": "all_or_nothing"}}"#,
        )
        .unwrap();
        assert_eq!(config.model.reply_format, ReplyFormat::Json);
        assert_eq!(config.model.response_mime_type(), "application/json");
        assert_eq!(config.model.model, "gemini-1.5-flash");
        assert_eq!(config.sink.consistency, Consistency::AllOrNothing);
        assert_eq!(config.sheets.spreadsheet_name, "Health&GlowMasterData");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = InvsheetConfig::default();
        config.ocr.enabled = true;
        config.save(&path).unwrap();

        let loaded = InvsheetConfig::from_file(&path).unwrap();
        assert!(loaded.ocr.enabled);
        assert_eq!(loaded.model.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn test_credentials_from_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(
            &env_path,
            "INVSHEET_TEST_KEY=abc123\nINVSHEET_TEST_TOKEN=ya29.token\n",
        )
        .unwrap();

        let mut config = InvsheetConfig::default();
        config.model.api_key_env = "INVSHEET_TEST_KEY".to_string();
        config.sheets.access_token_env = "INVSHEET_TEST_TOKEN".to_string();

        let credentials = Credentials::resolve(&config, Some(&env_path));
        assert_eq!(credentials.model_api_key.as_deref(), Some("abc123"));
        assert_eq!(
            credentials.sheets,
            SheetsAuth::AccessToken("ya29.token".to_string())
        );
        assert!(std::env::var("INVSHEET_TEST_KEY").is_err());
    }

    #[test]
    fn test_credentials_missing() {
        let mut config = InvsheetConfig::default();
        config.model.api_key_env = "INVSHEET_TEST_UNSET_KEY".to_string();
        config.sheets.access_token_env = "INVSHEET_TEST_UNSET_TOKEN".to_string();
        config.sheets.credentials_file = PathBuf::from("/nonexistent/secret_key.json");

        let credentials = Credentials::resolve(&config, None);
        assert!(credentials.model_api_key.is_none());
        assert_eq!(credentials.sheets, SheetsAuth::Missing);
        assert!(!format!("{:?}", credentials).contains("abc"));
    }
}
