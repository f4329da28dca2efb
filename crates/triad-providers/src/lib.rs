//! §4.E Provider Adapter Set — a uniform call contract over each external
//! AI vendor. Every adapter builds its own wire request from the common
//! `ChatRequest` shape (dropping fields the vendor doesn't support),
//! enforces the token-budget floor/ceiling, validates model identity, and
//! normalizes whatever shape of response the vendor returns (string,
//! parsed object, array-of-parts) into plain text before handing it back.
//!
//! Grounded in the teacher's per-vendor client modules
//! (`ob-agentic::anthropic_client`, `ob-agentic::openai_client`,
//! `ai::openai::OpenAiClient`), generalized into one trait instead of one
//! bespoke struct per vendor with no shared contract.

pub mod anthropic;
pub mod google;
pub mod json_extract;
pub mod openai;
pub mod perplexity;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use triad_errors::ClassifiedError;

/// Minimum token budget every adapter must honor (§4.E).
pub const MIN_TOKEN_BUDGET: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The common request shape every adapter accepts. Not all vendors honor
/// every field — unsupported ones are dropped silently by the adapter, per
/// §4.E.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub developer: Option<String>,
    pub user: String,
    pub messages: Option<Vec<ChatMessage>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into(), ..Default::default() }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// The effective max_tokens after clamping to the adapter's floor/ceiling.
    pub fn effective_max_tokens(&self, vendor_ceiling: u32) -> u32 {
        self.max_tokens.unwrap_or(vendor_ceiling).clamp(MIN_TOKEN_BUDGET, vendor_ceiling)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub tokens: TokenCounts,
    pub model: String,
}

/// Uniform call contract every vendor adapter implements (§4.E).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Routing key, e.g. "anthropic", "openai" — what the gate/breaker/
    /// hedged router key on.
    fn name(&self) -> &'static str;

    /// The model family this adapter was configured for, used to validate
    /// the response's reported model identity matches what was requested.
    fn model_family(&self) -> &str;

    async fn call(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse, ClassifiedError>;
}

/// Whichever shape of "content" a vendor's wire response used, normalized
/// to plain text. Models the §9 design note: "runtime reflection / duck
/// typing of adapter responses" becomes an explicit tagged union with one
/// extract-text function per vendor, rather than downstream code probing
/// the JSON shape itself.
#[derive(Debug, Clone)]
pub enum RawContent {
    PlainString(String),
    Parts(Vec<String>),
    /// The vendor reported a non-text safety refusal instead of content.
    Refusal(String),
}

impl RawContent {
    /// Collapse to text, or a classified CLIENT error if it was a refusal.
    pub fn into_text(self, vendor: &str) -> Result<String, ClassifiedError> {
        match self {
            RawContent::PlainString(s) => Ok(s),
            RawContent::Parts(parts) => Ok(parts.join("")),
            RawContent::Refusal(reason) => Err(ClassifiedError::new(
                triad_errors::ErrorKind::Client,
                format!("{vendor} safety refusal: {reason}"),
            )
            .with_provider(vendor)),
        }
    }
}

/// Validate that the response's reported model string belongs to the
/// requested family (e.g. response model "claude-3-5-sonnet-20241022"
/// belongs to family "claude"). Mismatch is CLIENT-classified per §4.E.
pub fn validate_model_family(vendor: &str, expected_family: &str, reported_model: &str) -> Result<(), ClassifiedError> {
    if reported_model.to_ascii_lowercase().contains(&expected_family.to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(ClassifiedError::new(
            triad_errors::ErrorKind::Client,
            format!("model identity mismatch: expected family '{expected_family}', got '{reported_model}'"),
        )
        .with_provider(vendor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_max_tokens_clamps_to_floor_and_ceiling() {
        let req = ChatRequest::new("hi").with_max_tokens(4);
        assert_eq!(req.effective_max_tokens(4096), MIN_TOKEN_BUDGET);

        let req = ChatRequest::new("hi").with_max_tokens(100_000);
        assert_eq!(req.effective_max_tokens(4096), 4096);

        let req = ChatRequest::new("hi").with_max_tokens(500);
        assert_eq!(req.effective_max_tokens(4096), 500);
    }

    #[test]
    fn refusal_content_surfaces_as_client_error() {
        let err = RawContent::Refusal("disallowed content".into()).into_text("anthropic").unwrap_err();
        assert_eq!(err.kind, triad_errors::ErrorKind::Client);
    }

    #[test]
    fn parts_are_joined_in_order() {
        let text = RawContent::Parts(vec!["hello ".into(), "world".into()]).into_text("openai").unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn model_family_validation() {
        assert!(validate_model_family("anthropic", "claude", "claude-3-5-sonnet-20241022").is_ok());
        assert!(validate_model_family("anthropic", "claude", "gpt-4o").is_err());
    }
}
