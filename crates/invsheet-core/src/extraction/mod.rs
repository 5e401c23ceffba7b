//! Field extraction through a hosted text-generation model.

mod gemini;
pub mod prompt;
pub mod reply;

pub use gemini::GeminiClient;
pub use prompt::{build_prompt, instruction};
pub use reply::{parse_json_reply, parse_line_reply, parse_reply, sanitize_value};

use async_trait::async_trait;

use crate::error::ModelError;
use crate::models::record::ExtractedRecord;

/// Result of extracting one invoice.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Extracted fields.
    pub record: ExtractedRecord,
    /// Normalized document text sent to the model.
    pub document_text: String,
    /// Raw model reply.
    pub reply: String,
    /// Extraction warnings.
    pub warnings: Vec<String>,
    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

/// A remote chat-style text completion endpoint.
///
/// Every call is an independent, history-free conversation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Send a single prompt and return the plain-text reply.
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}
