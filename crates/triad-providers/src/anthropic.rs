//! Anthropic Messages API adapter.
//!
//! Wire shape and error handling lifted directly from
//! `ob-agentic::anthropic_client::AnthropicClient`, generalized behind
//! `ProviderAdapter` and the common `ChatRequest`/`ChatResponse` shape.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

use crate::{validate_model_family, ChatRequest, ChatResponse, ProviderAdapter, RawContent, TokenCounts};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS_CEILING: u32 = 8192;
const MODEL_FAMILY: &str = "claude";

#[derive(Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: impl Into<String>) -> Self {
        Self { api_key, client: reqwest::Client::new(), model: model.into() }
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(extra) = &request.messages {
            for m in extra {
                messages.push(serde_json::json!({"role": m.role, "content": m.content}));
            }
        }
        messages.push(serde_json::json!({"role": "user", "content": request.user}));

        let mut body = serde_json::json!({
            "model": &self.model,
            "max_tokens": request.effective_max_tokens(MAX_TOKENS_CEILING),
            "messages": messages,
        });
        // Anthropic has no `developer` role and no JSON response_format
        // mode — both are dropped silently, per §4.E.
        if let Some(system) = &request.system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model_family(&self) -> &str {
        MODEL_FAMILY
    }

    async fn call(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse, ClassifiedError> {
        let body = self.build_body(request);

        let send = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("anthropic")),
            result = send => result.map_err(|e| classify_reqwest_error("anthropic", &e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status.as_u16()), message: &body_text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("anthropic API error {status}: {body_text}")).with_provider("anthropic"));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid anthropic response body: {e}")).with_provider("anthropic"))?;

        validate_model_family("anthropic", MODEL_FAMILY, &parsed.model)?;

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return RawContent::Refusal("model declined to respond".to_string())
                .into_text("anthropic")
                .map(|text| ChatResponse { text, tokens: TokenCounts::default(), model: parsed.model });
        }

        let parts: Vec<String> = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.clone())
            .collect();
        if parts.is_empty() {
            return Err(ClassifiedError::new(ErrorKind::Unknown, "empty response from anthropic").with_provider("anthropic"));
        }
        let text = RawContent::Parts(parts).into_text("anthropic")?;

        let tokens = parsed
            .usage
            .map(|u| TokenCounts { prompt: u.input_tokens, completion: u.output_tokens, total: u.input_tokens + u.output_tokens })
            .unwrap_or_default();

        Ok(ChatResponse { text, tokens, model: parsed.model })
    }
}

pub(crate) fn classify_reqwest_error(provider: &str, err: &reqwest::Error) -> ClassifiedError {
    let input = ClassifyInput {
        http_status: err.status().map(|s| s.as_u16()),
        message: &err.to_string(),
        was_cancelled: false,
        explicit_tag: if err.is_timeout() { Some("timeout") } else { None },
    };
    ClassifiedError::new(classify(&input), err.to_string()).with_provider(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_body_dropping_unsupported_fields() {
        let adapter = AnthropicAdapter::new("test-key".to_string());
        let req = ChatRequest::new("hello").with_system("be terse");
        let body = adapter.build_body(&req);
        assert_eq!(body["system"], "be terse");
        assert!(body.get("developer").is_none());
    }

    #[test]
    fn name_and_family() {
        let adapter = AnthropicAdapter::new("k".to_string());
        assert_eq!(adapter.name(), "anthropic");
        assert_eq!(adapter.model_family(), "claude");
    }
}
