//! Error types for the invsheet-core library.

use thiserror::Error;

/// Main error type for the invsheet library.
#[derive(Error, Debug)]
pub enum InvsheetError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Remote text-generation error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Spreadsheet sink error.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),

    /// Embedded text and OCR text disagree on the number of pages.
    #[error("page count mismatch: {text} text pages, {ocr} OCR pages")]
    PageMismatch { text: usize, ocr: usize },
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Errors from the remote text-generation endpoint.
#[derive(Error, Debug)]
pub enum ModelError {
    /// No API key was configured.
    #[error("no API key configured (set {0})")]
    MissingApiKey(String),

    /// The request could not be sent or the response body not read.
    #[error("request failed: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The prompt was rejected by the endpoint's safety filters.
    #[error("prompt blocked: {0}")]
    Blocked(String),

    /// The response carried no candidate text.
    #[error("response contained no text")]
    EmptyReply,
}

/// Errors from the spreadsheet sinks.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Obtaining an access token failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request could not be sent or the response body not read.
    #[error("request failed: {0}")]
    Http(String),

    /// The spreadsheet API answered with a non-success status.
    #[error("spreadsheet API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// No spreadsheet with the configured name is visible to the credential.
    #[error("spreadsheet not found: {0}")]
    SpreadsheetNotFound(String),

    /// The spreadsheet has no tab with the selected month's name.
    #[error("worksheet tab not found: {0}")]
    TabNotFound(String),

    /// The local workbook could not be read or written.
    #[error("workbook error: {0}")]
    Workbook(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the invsheet library.
pub type Result<T> = std::result::Result<T, InvsheetError>;
