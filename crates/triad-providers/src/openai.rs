//! OpenAI Chat Completions adapter.
//!
//! Grounded in `ob-agentic::openai_client::OpenAiClient` and
//! `rust/src/ai/openai.rs` — same two-step send/parse shape as Anthropic,
//! but OpenAI's message array carries `system`/`developer`/`user` roles
//! directly and supports a native JSON response mode.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

use crate::anthropic::classify_reqwest_error;
use crate::{validate_model_family, ChatRequest, ChatResponse, ProviderAdapter, RawContent, ResponseFormat, TokenCounts};

const DEFAULT_MODEL: &str = "gpt-4o";
const MAX_TOKENS_CEILING: u32 = 16384;
const MODEL_FAMILY: &str = "gpt";

#[derive(Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: impl Into<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        if let Some(developer) = &request.developer {
            messages.push(serde_json::json!({"role": "developer", "content": developer}));
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
        if matches!(request.response_format, Some(ResponseFormat::JsonObject)) {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
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
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model_family(&self) -> &str {
        MODEL_FAMILY
    }

    async fn call(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse, ClassifiedError> {
        let body = self.build_body(request);

        let send = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("openai")),
            result = send => result.map_err(|e| classify_reqwest_error("openai", &e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status.as_u16()), message: &body_text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("openai API error {status}: {body_text}")).with_provider("openai"));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid openai response body: {e}")).with_provider("openai"))?;

        validate_model_family("openai", MODEL_FAMILY, &parsed.model)?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "openai returned no choices").with_provider("openai"))?;

        let text = if let Some(refusal) = choice.message.refusal {
            RawContent::Refusal(refusal).into_text("openai")?
        } else if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ClassifiedError::new(ErrorKind::Client, "openai content filter triggered").with_provider("openai"));
        } else {
            let content = choice.message.content.unwrap_or_default();
            RawContent::PlainString(content).into_text("openai")?
        };

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
    fn json_response_format_is_forwarded() {
        let adapter = OpenAiAdapter::new("key".to_string());
        let req = ChatRequest::new("give me json").with_response_format(ResponseFormat::JsonObject);
        let body = adapter.build_body(&req);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn system_and_developer_become_separate_messages() {
        let adapter = OpenAiAdapter::new("key".to_string());
        let mut req = ChatRequest::new("hi").with_system("sys");
        req.developer = Some("dev".to_string());
        let body = adapter.build_body(&req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "developer");
    }
}
