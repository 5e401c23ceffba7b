//! Google Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::TextGenerator;
use crate::error::ModelError;
use crate::models::config::ModelConfig;

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    generation: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    /// Build a client from the model configuration.
    pub fn new(api_key: impl Into<String>, config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::MissingApiKey(config.api_key_env.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Http(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            generation: GenerationConfig {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
                response_mime_type: config.response_mime_type().to_string(),
            },
        })
    }

    /// Point the client at a different endpoint root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: &self.generation,
        }
    }
}

fn reply_text(response: GenerateResponse) -> Result<String, ModelError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::Blocked(reason));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ModelError::EmptyReply);
    };
    if let Some(reason) = &candidate.finish_reason {
        debug!("Candidate finished with {}", reason);
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ModelError::EmptyReply);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        info!("Requesting completion from {} ({} prompt chars)", self.model, prompt.len());

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Http(format!("invalid response body: {}", e)))?;
        let text = reply_text(parsed)?;
        debug!("Received {} reply chars", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn client() -> GeminiClient {
        GeminiClient::new("test-key", &ModelConfig::default()).unwrap()
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = GeminiClient::new("  ", &ModelConfig::default());
        assert!(matches!(result, Err(ModelError::MissingApiKey(name)) if name == "GEMINI_API_KEY"));
    }

    #[test]
    fn test_request_body_shape() {
        let client = client();
        let body = serde_json::to_value(client.request_body("hello")).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {
                    "temperature": 1.0,
                    "topP": 0.95f32,
                    "topK": 64,
                    "maxOutputTokens": 8192,
                    "responseMimeType": "text/plain"
                }
            })
        );
        assert_eq!(
            client.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_reply_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "PO Number: 1\n"}, {"text": "Remarks: ok"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(reply_text(response).unwrap(), "PO Number: 1\nRemarks: ok");
    }

    #[test]
    fn test_reply_text_blocked_and_empty() {
        let blocked: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(reply_text(blocked), Err(ModelError::Blocked(r)) if r == "SAFETY"));

        assert!(matches!(
            reply_text(GenerateResponse::default()),
            Err(ModelError::EmptyReply)
        ));
    }

    #[tokio::test]
    async fn test_generate_round_trip() {
        let app = Router::new().fallback(
            |uri: Uri, headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                assert_eq!(uri.path(), "/v1beta/models/gemini-1.5-flash:generateContent");
                assert_eq!(headers["x-goog-api-key"], "test-key");
                let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or("");
                axum::Json(json!({
                    "candidates": [{"content": {"parts": [{"text": format!("Remarks: {}", prompt.len())}]}}]
                }))
            },
        );
        let base = serve(app).await;

        let reply = client().with_base_url(base).generate("abcd").await.unwrap();
        assert_eq!(reply, "Remarks: 4");
    }

    #[tokio::test]
    async fn test_generate_api_error() {
        let app = Router::new().fallback(|| async { (StatusCode::FORBIDDEN, "bad key") });
        let base = serve(app).await;

        let result = client().with_base_url(base).generate("x").await;
        assert!(matches!(result, Err(ModelError::Api { status: 403, body }) if body == "bad key"));
    }
}
