//! Subcommands and the setup they share.

pub mod batch;
pub mod config;
pub mod process;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Month;
use tracing::{info, warn};

use invsheet_core::models::config::SheetsAuth;
use invsheet_core::{
    Credentials, GeminiClient, GoogleSheetSink, InvoicePipeline, InvsheetConfig, PureOcrEngine,
    SinkSet, WorkbookSink,
};

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invsheet")
        .join("config.json")
}

/// Load the explicit config file, else the default one if present, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<InvsheetConfig> {
    if let Some(path) = config_path {
        return InvsheetConfig::from_file(Path::new(path))
            .with_context(|| format!("Failed to read config file {}", path));
    }

    let path = default_config_path();
    if path.exists() {
        return InvsheetConfig::from_file(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()));
    }
    Ok(InvsheetConfig::default())
}

/// Resolve secrets from the config, `./.env` and the environment.
pub fn resolve_credentials(config: &InvsheetConfig) -> Credentials {
    let credentials = Credentials::resolve(config, Some(Path::new(".env")));
    tracing::debug!("Resolved credentials: {:?}", credentials);
    credentials
}

/// Build the extraction pipeline, loading OCR models when enabled.
pub fn build_pipeline(config: InvsheetConfig, credentials: &Credentials) -> anyhow::Result<InvoicePipeline> {
    let Some(api_key) = credentials.model_api_key.as_deref() else {
        anyhow::bail!(
            "No Gemini API key configured. Set {} or model.api_key.",
            config.model.api_key_env
        );
    };
    let generator = GeminiClient::new(api_key, &config.model)?;

    let ocr = if !config.ocr.enabled {
        None
    } else if !config.ocr.models_present() {
        warn!(
            "OCR enabled but models are missing from {}, using embedded text only",
            config.ocr.model_dir.display()
        );
        None
    } else {
        Some(PureOcrEngine::from_config(&config.ocr)?)
    };

    let pipeline = InvoicePipeline::new(config, Box::new(generator));
    Ok(match ocr {
        Some(engine) => pipeline.with_ocr(Box::new(engine)),
        None => pipeline,
    })
}

/// Open the sinks for a batch. The remote sink is skipped when `month` is
/// `None` or the spreadsheet sink is disabled.
pub async fn build_sinks(
    config: &InvsheetConfig,
    credentials: &Credentials,
    month: Option<Month>,
    workbook: &Path,
    output: &Path,
) -> anyhow::Result<SinkSet> {
    let mut sinks = SinkSet::new(config.sink.consistency);

    match month {
        Some(month) if config.sheets.enabled => {
            if credentials.sheets == SheetsAuth::Missing {
                anyhow::bail!(
                    "No Google credentials: provide {} or set {}",
                    config.sheets.credentials_file.display(),
                    config.sheets.access_token_env
                );
            }
            let remote = GoogleSheetSink::connect(&config.sheets, &credentials.sheets, month)
                .await
                .with_context(|| format!("Failed to open '{}'", config.sheets.spreadsheet_name))?;
            sinks = sinks.with_remote(Box::new(remote));
        }
        _ => info!("Remote spreadsheet disabled for this run"),
    }

    let local = WorkbookSink::open(workbook, output, config.sink.persist)
        .with_context(|| format!("Failed to open workbook {}", workbook.display()))?;
    info!("Appending to sheet '{}' of {}", local.sheet_name(), output.display());
    Ok(sinks.with_local(Box::new(local)))
}
