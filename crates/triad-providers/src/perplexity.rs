//! Perplexity `sonar` adapter.
//!
//! Perplexity's chat completions endpoint is OpenAI-wire-compatible, so
//! this mirrors [`crate::openai::OpenAiAdapter`]'s body shape against a
//! different base URL and model family, per the §9 design note allowing
//! enrichment from the rest of the pack when no teacher file exists for a
//! vendor. Perplexity's response adds `citations` alongside `choices`,
//! which the briefing stage consumes separately — this adapter only
//! surfaces normalized chat text.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

use crate::anthropic::classify_reqwest_error;
use crate::{validate_model_family, ChatRequest, ChatResponse, ProviderAdapter, RawContent, TokenCounts};

const DEFAULT_MODEL: &str = "sonar";
const MAX_TOKENS_CEILING: u32 = 4096;
const MODEL_FAMILY: &str = "sonar";

#[derive(Clone)]
pub struct PerplexityAdapter {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl PerplexityAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: impl Into<String>) -> Self {
        Self { api_key, client: reqwest::Client::new(), model: model.into() }
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
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
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
    #[serde(default)]
    citations: Vec<String>,
}

#[async_trait]
impl ProviderAdapter for PerplexityAdapter {
    fn name(&self) -> &'static str {
        "perplexity"
    }

    fn model_family(&self) -> &str {
        MODEL_FAMILY
    }

    async fn call(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse, ClassifiedError> {
        let body = self.build_body(request);

        let send = self
            .client
            .post("https://api.perplexity.ai/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("perplexity")),
            result = send => result.map_err(|e| classify_reqwest_error("perplexity", &e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status.as_u16()), message: &body_text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("perplexity API error {status}: {body_text}")).with_provider("perplexity"));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid perplexity response body: {e}")).with_provider("perplexity"))?;

        validate_model_family("perplexity", MODEL_FAMILY, &parsed.model)?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "perplexity returned no choices").with_provider("perplexity"))?;

        let content = choice.message.content.unwrap_or_default();
        let mut text = RawContent::PlainString(content).into_text("perplexity")?;
        if !parsed.citations.is_empty() {
            text.push_str("\n\nSources:\n");
            for (i, url) in parsed.citations.iter().enumerate() {
                text.push_str(&format!("[{}] {}\n", i + 1, url));
            }
        }

        let tokens = parsed
            .usage
            .map(|u| TokenCounts { prompt: u.prompt_tokens, completion: u.completion_tokens, total: u.total_tokens })
            .unwrap_or_default();

        Ok(ChatResponse { text, tokens, model: parsed.model })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_is_first() {
        let adapter = PerplexityAdapter::new("key".to_string());
        let req = ChatRequest::new("hi").with_system("be factual");
        let body = adapter.build_body(&req);
        assert_eq!(body["messages"][0]["role"], "system");
    }
}
