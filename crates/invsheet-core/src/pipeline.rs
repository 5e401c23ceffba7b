//! Sequential invoice pipeline: text acquisition, extraction and sinks.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{InvsheetError, Result};
use crate::extraction::{ExtractionResult, TextGenerator, build_prompt, parse_reply};
use crate::models::config::InvsheetConfig;
use crate::models::record::ExtractedRecord;
use crate::ocr::OcrEngine;
use crate::sink::SinkSet;
use crate::text::document_text;

/// One uploaded invoice.
#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    /// Display name, usually the file name.
    pub name: String,
    /// Raw PDF bytes.
    pub data: Vec<u8>,
}

impl InvoiceDocument {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Read a document from disk, named after its file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("invoice.pdf")
            .to_string();
        Ok(Self::new(name, data))
    }
}

/// What happened to one invoice in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceOutcome {
    pub name: String,
    /// Extracted record, present whenever extraction succeeded.
    pub record: Option<ExtractedRecord>,
    /// Sinks that accepted the row.
    pub written_to: Vec<String>,
    /// Failure reason, if any stage failed.
    pub error: Option<String>,
}

impl InvoiceOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes of a batch in submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<InvoiceOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Ties text acquisition, the text generator and the sinks together.
pub struct InvoicePipeline {
    config: InvsheetConfig,
    generator: Box<dyn TextGenerator>,
    ocr: Option<Box<dyn OcrEngine>>,
}

impl InvoicePipeline {
    pub fn new(config: InvsheetConfig, generator: Box<dyn TextGenerator>) -> Self {
        Self {
            config,
            generator,
            ocr: None,
        }
    }

    /// Also recognize page images with `engine`.
    pub fn with_ocr(mut self, engine: Box<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn config(&self) -> &InvsheetConfig {
        &self.config
    }

    /// Extract the record of one invoice without touching any sink.
    pub async fn process(&self, document: &InvoiceDocument) -> Result<ExtractionResult> {
        let start = Instant::now();

        let text = document_text(&document.data, self.ocr.as_deref(), &self.config.pdf)?;
        info!("{}: {} chars of document text", document.name, text.chars().count());

        let format = self.config.model.reply_format;
        let prompt = build_prompt(format, &text);
        let reply = self.generator.generate(&prompt).await?;

        let mut warnings = Vec::new();
        let record = parse_reply(&reply, format, &mut warnings);
        if record.found_count() == 0 {
            warnings.push("No fields found in the model reply".to_string());
        }
        info!(
            "{}: {} of {} fields found via {}",
            document.name,
            record.found_count(),
            crate::models::record::FIELD_COUNT,
            self.generator.name()
        );

        Ok(ExtractionResult {
            record,
            document_text: text,
            reply,
            warnings,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Process documents in order, appending each record to the sinks.
    ///
    /// Without `continue_on_error` the first failure stops the batch; rows
    /// already buffered by the sinks are still persisted before the error is
    /// returned. `observer` sees every outcome as soon as it is known.
    pub async fn run_batch<F>(
        &self,
        documents: &[InvoiceDocument],
        sinks: &mut SinkSet,
        continue_on_error: bool,
        mut observer: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&InvoiceOutcome),
    {
        let mut report = BatchReport::default();

        for document in documents {
            let (outcome, failure) = match self.process(document).await {
                Ok(result) => {
                    let write = sinks.append(&result.record.to_row()).await;
                    let outcome = InvoiceOutcome {
                        name: document.name.clone(),
                        record: Some(result.record),
                        written_to: write.written.clone(),
                        error: write.failure_message(),
                    };
                    let failure = write.failures.into_iter().next().map(|(_, e)| InvsheetError::from(e));
                    (outcome, failure)
                }
                Err(e) => {
                    warn!("{}: {}", document.name, e);
                    let outcome = InvoiceOutcome {
                        name: document.name.clone(),
                        record: None,
                        written_to: Vec::new(),
                        error: Some(e.to_string()),
                    };
                    (outcome, Some(e))
                }
            };

            observer(&outcome);
            report.outcomes.push(outcome);

            if let Some(e) = failure {
                if !continue_on_error {
                    if let Err(finish_error) = sinks.finish().await {
                        warn!("Could not persist buffered rows: {}", finish_error);
                    }
                    return Err(e);
                }
            }
        }

        sinks.finish().await?;
        info!(
            "Batch finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }
}
