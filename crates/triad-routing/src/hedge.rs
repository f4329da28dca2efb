//! §4.D Hedged Router — race a request across N providers and take the
//! first success, cancelling the rest.
//!
//! The promise-based "race with listener-on-abort" pattern from the
//! original system (§9 Design Notes) becomes a task group here: each branch
//! owns a clone of a shared `CancellationToken`, the winner cancels the
//! token tree, and every branch releases its gate permit on exit regardless
//! of outcome (via `GatePermit`'s `Drop`). There is no global event loop —
//! cancellation is explicit and the race itself is driven by
//! `FuturesUnordered` plus `tokio::select!` against the master deadline.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use triad_errors::{ClassifiedError, ErrorKind};

use crate::breaker::CircuitBreaker;
use crate::gate::ConcurrencyGate;

pub type CallFuture<T> = Pin<Box<dyn Future<Output = Result<T, ClassifiedError>> + Send>>;

/// The successful outcome of a hedged (or single) call.
#[derive(Debug, Clone)]
pub struct RouterOutcome<T> {
    pub response: T,
    pub provider: String,
    pub latency_ms: u64,
}

/// Every candidate failed (or none were available). Carries the worst
/// component classification per §4.D step 4.
#[derive(Debug)]
pub struct CompositeError {
    pub kind: ErrorKind,
    pub per_provider: HashMap<String, ClassifiedError>,
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all {} candidate(s) failed, worst={}", self.per_provider.len(), self.kind)
    }
}
impl std::error::Error for CompositeError {}

/// Races a logical request across providers, honoring per-provider
/// concurrency gates and circuit breakers.
pub struct HedgedRouter {
    gate: Arc<ConcurrencyGate>,
    breaker: Arc<CircuitBreaker>,
}

impl HedgedRouter {
    pub fn new(gate: Arc<ConcurrencyGate>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { gate, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// §4.D `execute`: race `candidates` (already the full configured
    /// provider list for this role — breaker filtering happens here)
    /// concurrently, returning the first success and cancelling the rest.
    ///
    /// `make_call(provider, token)` must build the future that performs the
    /// actual provider call; `make_call` itself must not block.
    pub async fn execute<T, F>(
        &self,
        candidates: &[String],
        timeout: Option<Duration>,
        parent_cancel: &CancellationToken,
        make_call: F,
    ) -> Result<RouterOutcome<T>, CompositeError>
    where
        T: Send + 'static,
        F: Fn(String, CancellationToken) -> CallFuture<T>,
    {
        let available: Vec<String> = self.breaker.filter_available(candidates);
        if available.is_empty() {
            return Err(CompositeError { kind: ErrorKind::Server, per_provider: HashMap::new() });
        }

        let master = parent_cancel.child_token();
        let _timeout_guard = timeout.map(|d| spawn_deadline(master.clone(), d));

        let mut in_flight = FuturesUnordered::new();
        for provider in &available {
            let provider = provider.clone();
            let token = master.child_token();
            let gate = self.gate.clone();
            let started = Instant::now();
            let fut = make_call(provider.clone(), token.clone());
            in_flight.push(async move {
                let permit = match gate.acquire(&provider, &token).await {
                    Ok(p) => p,
                    Err(e) => return (provider, Err(e), started.elapsed()),
                };
                let result = fut.await;
                drop(permit);
                (provider, result, started.elapsed())
            });
        }

        let mut per_provider = HashMap::new();
        while let Some((provider, result, elapsed)) = in_flight.next().await {
            match result {
                Ok(response) => {
                    self.breaker.record_success(&provider);
                    master.cancel();
                    tracing::info!(provider = %provider, latency_ms = elapsed.as_millis() as u64, "hedged race won");
                    return Ok(RouterOutcome { response, provider, latency_ms: elapsed.as_millis() as u64 });
                }
                Err(e) => {
                    if e.kind.affects_circuit() {
                        self.breaker.record_failure(&provider, e.kind);
                    }
                    tracing::debug!(provider = %provider, kind = %e.kind, "hedged candidate failed");
                    per_provider.insert(provider, e);
                }
            }
        }

        let worst = per_provider.values().cloned().collect::<Vec<_>>();
        Err(CompositeError { kind: ClassifiedError::worst_of(&worst), per_provider })
    }

    /// §4.D `executeSingle`: the non-hedged variant for accuracy-critical
    /// roles. Still goes through the gate and breaker for that one provider.
    pub async fn execute_single<T, F>(
        &self,
        provider: &str,
        timeout: Option<Duration>,
        parent_cancel: &CancellationToken,
        make_call: F,
    ) -> Result<RouterOutcome<T>, ClassifiedError>
    where
        T: Send + 'static,
        F: FnOnce(String, CancellationToken) -> CallFuture<T>,
    {
        if !self.breaker.is_available(provider) {
            return Err(ClassifiedError::new(ErrorKind::Server, "circuit open").with_provider(provider));
        }

        let token = parent_cancel.child_token();
        let _timeout_guard = timeout.map(|d| spawn_deadline(token.clone(), d));

        let started = Instant::now();
        let permit = self.gate.acquire(provider, &token).await?;
        let result = make_call(provider.to_string(), token.clone()).await;
        drop(permit);

        match result {
            Ok(response) => {
                self.breaker.record_success(provider);
                Ok(RouterOutcome { response, provider: provider.to_string(), latency_ms: started.elapsed().as_millis() as u64 })
            }
            Err(e) => {
                if e.kind.affects_circuit() {
                    self.breaker.record_failure(provider, e.kind);
                }
                Err(e)
            }
        }
    }
}

/// Spawns a task that cancels `token` after `delay`. Dropping the returned
/// guard aborts the task (if the call already finished, there's no point
/// letting the sleep linger).
fn spawn_deadline(token: CancellationToken, delay: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn router() -> HedgedRouter {
        HedgedRouter::new(Arc::new(ConcurrencyGate::new()), Arc::new(CircuitBreaker::new()))
    }

    #[tokio::test]
    async fn first_success_wins_and_cancels_others() {
        let router = router();
        let candidates = vec!["fast".to_string(), "slow".to_string()];
        let cancel_seen = Arc::new(AtomicUsize::new(0));
        let cancel_seen2 = cancel_seen.clone();

        let outcome = router
            .execute(&candidates, None, &CancellationToken::new(), move |provider, token| {
                let cancel_seen = cancel_seen2.clone();
                Box::pin(async move {
                    if provider == "fast" {
                        Ok::<_, ClassifiedError>("fast-response".to_string())
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(5)) => Ok("slow-response".to_string()),
                            _ = token.cancelled() => {
                                cancel_seen.fetch_add(1, Ordering::SeqCst);
                                Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled"))
                            }
                        }
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(outcome.provider, "fast");
        assert_eq!(outcome.response, "fast-response");
    }

    #[tokio::test]
    async fn all_failing_yields_composite_error_with_worst_kind() {
        let router = router();
        let candidates = vec!["a".to_string(), "b".to_string()];

        let err = router
            .execute(&candidates, None, &CancellationToken::new(), |provider, _token| {
                Box::pin(async move {
                    if provider == "a" {
                        Err(ClassifiedError::new(ErrorKind::Client, "bad request"))
                    } else {
                        Err(ClassifiedError::new(ErrorKind::Server, "internal error"))
                    }
                })
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.per_provider.len(), 2);
    }

    #[tokio::test]
    async fn open_circuit_providers_are_excluded_from_candidate_set() {
        let router = router();
        router.breaker().record_failure("bad", ErrorKind::Server);
        for _ in 0..5 {
            router.breaker().record_failure("bad", ErrorKind::Server);
        }
        assert!(!router.breaker().is_available("bad"));

        let candidates = vec!["bad".to_string()];
        let err = router
            .execute(&candidates, None, &CancellationToken::new(), |_p, _t| {
                Box::pin(async move { Ok::<_, ClassifiedError>("should never run".to_string()) })
            })
            .await
            .unwrap_err();
        assert!(err.per_provider.is_empty(), "excluded candidates produce no per-provider error, just NO_PROVIDERS");
    }

    #[tokio::test]
    async fn timeout_cancels_in_flight_calls() {
        let router = router();
        let candidates = vec!["slow".to_string()];
        let observed_cancel = Arc::new(AtomicUsize::new(0));
        let observed_cancel2 = observed_cancel.clone();

        let err = router
            .execute(&candidates, Some(Duration::from_millis(30)), &CancellationToken::new(), move |_p, token| {
                let observed_cancel = observed_cancel2.clone();
                Box::pin(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => Ok::<_, ClassifiedError>("too slow".to_string()),
                        _ = token.cancelled() => {
                            observed_cancel.fetch_add(1, Ordering::SeqCst);
                            Err(ClassifiedError::new(ErrorKind::Aborted, "deadline"))
                        }
                    }
                })
            })
            .await
            .unwrap_err();

        assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
        assert_eq!(err.per_provider.len(), 1);
    }
}
