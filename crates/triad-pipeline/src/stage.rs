//! §4.F Stage Runner — runs one pipeline stage under its role's deadline,
//! racing (or singly calling) providers via [`triad_routing::HedgedRouter`],
//! parsing the winning response, and handing the caller either a typed
//! output or a classified error ready to propagate to the orchestrator.
//!
//! Grounded in `ob_workflow::engine`'s single `try_advance` driving many
//! transition definitions: one `StageRunner::run` generic over the output
//! type serves all four LLM stages instead of one near-duplicate function
//! per stage. This is implementation-level sharing only — stage order
//! itself stays the fixed §4.G sequence.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use triad_errors::{ClassifiedError, ErrorKind};
use triad_providers::{ChatRequest, ProviderAdapter};
use triad_routing::{HedgedRouter, RouterMode, RouterOutcome, Role};

pub struct StageOutcome<O> {
    pub output: O,
    pub provider: String,
    pub latency_ms: u64,
}

/// The provider registry a stage runner draws candidates from, keyed by
/// the adapter's routing name (matches [`ProviderAdapter::name`]).
pub type ProviderRegistry = HashMap<String, Arc<dyn ProviderAdapter>>;

pub struct StageRunner {
    router: HedgedRouter,
    providers: ProviderRegistry,
}

impl StageRunner {
    pub fn new(router: HedgedRouter, providers: ProviderRegistry) -> Self {
        Self { router, providers }
    }

    /// Runs `role` against `candidate_names` (already filtered to the
    /// providers configured for this role), building the request once and
    /// parsing whichever provider wins the race (or the sole call, for
    /// single mode) through `parse`.
    pub async fn run<O, P>(
        &self,
        role: Role,
        candidate_names: &[String],
        request: ChatRequest,
        parse: P,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<O>, ClassifiedError>
    where
        O: Send + 'static,
        P: Fn(&str) -> Result<O, ClassifiedError> + Send + Sync,
    {
        let policy = triad_routing::default_policy(role);
        let timeout = Some(policy.timeout);

        let raw: RouterOutcome<String> = match policy.mode {
            RouterMode::Hedged => self
                .router
                .execute(candidate_names, timeout, cancel, |provider, token| {
                    let request = request.clone();
                    let adapter = self.providers.get(&provider).cloned();
                    Box::pin(async move {
                        let adapter = adapter.ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "no adapter registered for provider").with_provider(&provider))?;
                        adapter.call(&request, &token).await.map(|r| r.text)
                    })
                })
                .await
                .map_err(|composite| {
                    tracing::warn!(role = ?role, providers = composite.per_provider.len(), "hedged stage exhausted all candidates");
                    ClassifiedError::new(composite.kind, composite.to_string())
                })?,
            RouterMode::Single => {
                let provider = candidate_names.first().ok_or_else(|| ClassifiedError::new(ErrorKind::Server, "no candidate provider configured"))?.clone();
                let adapter = self.providers.get(&provider).cloned();
                self.router
                    .execute_single(&provider, timeout, cancel, move |provider, token| {
                        let request = request.clone();
                        Box::pin(async move {
                            let adapter = adapter.ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "no adapter registered for provider").with_provider(&provider))?;
                            adapter.call(&request, &token).await.map(|r| r.text)
                        })
                    })
                    .await?
            }
        };

        let output = parse(&raw.response)?;
        Ok(StageOutcome { output, provider: raw.provider, latency_ms: raw.latency_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use triad_providers::ChatResponse;
    use triad_routing::CircuitBreaker;
    use triad_routing::ConcurrencyGate;

    struct EchoAdapter(&'static str);

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        fn name(&self) -> &'static str {
            self.0
        }
        fn model_family(&self) -> &str {
            "test"
        }
        async fn call(&self, request: &ChatRequest, _cancel: &CancellationToken) -> Result<ChatResponse, ClassifiedError> {
            Ok(ChatResponse { text: format!("echo:{}", request.user), tokens: Default::default(), model: "test-model".to_string() })
        }
    }

    fn runner(names: &[&str]) -> StageRunner {
        let mut providers: ProviderRegistry = HashMap::new();
        for name in names {
            providers.insert(name.to_string(), Arc::new(EchoAdapter(Box::leak(name.to_string().into_boxed_str()))) as Arc<dyn ProviderAdapter>);
        }
        StageRunner::new(HedgedRouter::new(Arc::new(ConcurrencyGate::new()), Arc::new(CircuitBreaker::new())), providers)
    }

    #[tokio::test]
    async fn single_mode_calls_the_one_candidate_and_parses_its_output() {
        let runner = runner(&["anthropic"]);
        let candidates = vec!["anthropic".to_string()];
        let outcome = runner
            .run(
                Role::StrategyCore,
                &candidates,
                ChatRequest::new("hello"),
                |text| Ok::<_, ClassifiedError>(text.to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.output, "echo:hello");
        assert_eq!(outcome.provider, "anthropic");
    }

    #[tokio::test]
    async fn hedged_mode_races_candidates_and_returns_first_success() {
        let runner = runner(&["anthropic", "openai"]);
        let candidates = vec!["anthropic".to_string(), "openai".to_string()];
        let outcome = runner
            .run(
                Role::StrategyTactical,
                &candidates,
                ChatRequest::new("race"),
                |text| Ok::<_, ClassifiedError>(text.to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.output.starts_with("echo:race"));
    }

    #[tokio::test]
    async fn parse_failure_surfaces_as_classified_error() {
        let runner = runner(&["anthropic"]);
        let candidates = vec!["anthropic".to_string()];
        let err = runner
            .run(
                Role::StrategyCore,
                &candidates,
                ChatRequest::new("hello"),
                |_text| Err::<String, _>(ClassifiedError::new(ErrorKind::Client, "bad output shape")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Client);
    }
}
