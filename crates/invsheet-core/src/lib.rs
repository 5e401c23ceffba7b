//! Core library for invoice summarisation.
//!
//! This crate provides:
//! - PDF text acquisition (embedded text per page, optional OCR of page images)
//! - Text normalisation into one document string per invoice
//! - Field extraction through a hosted text-generation model
//! - Record sinks for a Google Sheets tab and a local `.xlsx` workbook
//! - A sequential batch pipeline tying the stages together

pub mod error;
pub mod extraction;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod sink;
pub mod text;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{InvsheetError, Result};
pub use extraction::{ExtractionResult, GeminiClient, TextGenerator};
pub use models::config::{Credentials, InvsheetConfig};
pub use models::record::{ExtractedRecord, FIELD_LABELS, NOT_AVAILABLE};
pub use ocr::{OcrEngine, OcrResult};
#[cfg(feature = "ocr")]
pub use ocr::PureOcrEngine;
pub use pdf::{PdfExtractor, PdfProcessor};
pub use pipeline::{BatchReport, InvoiceDocument, InvoiceOutcome, InvoicePipeline};
pub use sink::{GoogleSheetSink, RecordSink, SinkSet, WorkbookSink};
