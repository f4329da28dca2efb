//! Google Gemini `generateContent` adapter.
//!
//! No teacher file talks to Gemini directly; this is enriched from the
//! wider pack's Gemini REST shape (`contents[].parts[].text`,
//! `systemInstruction`, `candidates[].content.parts`) applied in the same
//! two-step send/parse style as the Anthropic and OpenAI adapters.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

use crate::anthropic::classify_reqwest_error;
use crate::{validate_model_family, ChatRequest, ChatResponse, ProviderAdapter, RawContent, TokenCounts};

const DEFAULT_MODEL: &str = "gemini-1.5-pro";
const MAX_TOKENS_CEILING: u32 = 8192;
const MODEL_FAMILY: &str = "gemini";

#[derive(Clone)]
pub struct GoogleAdapter {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl GoogleAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: impl Into<String>) -> Self {
        Self { api_key, client: reqwest::Client::new(), model: model.into() }
    }

    fn endpoint(&self) -> String {
        format!("https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}", self.model, self.api_key)
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut contents = Vec::new();
        if let Some(extra) = &request.messages {
            for m in extra {
                let role = if m.role == "assistant" { "model" } else { "user" };
                contents.push(serde_json::json!({"role": role, "parts": [{"text": m.content}]}));
            }
        }
        contents.push(serde_json::json!({"role": "user", "parts": [{"text": request.user}]}));

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.effective_max_tokens(MAX_TOKENS_CEILING),
            },
        });
        // Gemini has no `developer` role; it is dropped silently per §4.E.
        if let Some(system) = &request.system {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        if let Some(temp) = request.temperature {
            body["generationConfig"]["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    parts: Option<Vec<Part>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    fn model_family(&self) -> &str {
        MODEL_FAMILY
    }

    async fn call(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse, ClassifiedError> {
        let body = self.build_body(request);

        let send = self.client.post(self.endpoint()).json(&body).send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("google")),
            result = send => result.map_err(|e| classify_reqwest_error("google", &e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status.as_u16()), message: &body_text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("google API error {status}: {body_text}")).with_provider("google"));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid google response body: {e}")).with_provider("google"))?;

        // Gemini never echoes the model identity in the response body, so
        // family validation checks the configured model instead of a
        // reported one.
        validate_model_family("google", MODEL_FAMILY, &self.model)?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "google returned no candidates").with_provider("google"))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(RawContent::Refusal("blocked by safety filter".to_string()).into_text("google").unwrap_err());
        }

        let parts: Vec<String> = candidate
            .content
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if parts.is_empty() {
            return Err(ClassifiedError::new(ErrorKind::Unknown, "empty response from google").with_provider("google"));
        }
        let text = RawContent::Parts(parts).into_text("google")?;

        let tokens = parsed
            .usage_metadata
            .map(|u| TokenCounts { prompt: u.prompt_token_count, completion: u.candidates_token_count, total: u.total_token_count })
            .unwrap_or_default();

        Ok(ChatResponse { text, tokens, model: self.model.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_instruction_is_separate_from_contents() {
        let adapter = GoogleAdapter::new("key".to_string());
        let req = ChatRequest::new("hi").with_system("be concise");
        let body = adapter.build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be concise");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let adapter = GoogleAdapter::new("key".to_string());
        let mut req = ChatRequest::new("hi");
        req.messages = Some(vec![crate::ChatMessage { role: "assistant".to_string(), content: "prior reply".to_string() }]);
        let body = adapter.build_body(&req);
        assert_eq!(body["contents"][0]["role"], "model");
    }
}
