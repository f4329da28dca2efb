//! §4.B Concurrency Gate — a per-key slot counter with a FIFO waiter queue
//! and cancellation support.
//!
//! Built on `tokio::sync::Semaphore`, which already gives us the two hard
//! invariants for free: `active[key] <= max_concurrent[key]` (the semaphore
//! can never hand out more permits than it holds) and FIFO fairness among
//! waiters on the same key. The gate's own job is keyed lookup, the
//! queue-timeout race, and cancellation — and making sure a permit always
//! gets released exactly once, which we get from RAII (`Drop`) rather than
//! asking callers to remember to call `release`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use triad_errors::{ClassifiedError, ErrorKind};

const DEFAULT_MAX_CONCURRENT: usize = 10;
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// A held slot. Dropping it returns the slot to its key's pool — this is
/// what guarantees "every successful acquire is paired with exactly one
/// release" even on error/panic paths in the caller.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Explicit release, for call sites that want to name the moment a slot
    /// is returned rather than relying on scope exit. Equivalent to drop.
    pub fn release(self) {
        drop(self);
    }
}

struct KeyState {
    semaphore: Arc<Semaphore>,
}

/// Per-provider (or any string-keyed resource) concurrency gate.
pub struct ConcurrencyGate {
    keys: Mutex<HashMap<String, KeyState>>,
    default_max_concurrent: usize,
    per_key_max_concurrent: HashMap<String, usize>,
    queue_timeout: Duration,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            default_max_concurrent: DEFAULT_MAX_CONCURRENT,
            per_key_max_concurrent: HashMap::new(),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
        }
    }

    pub fn with_default_max_concurrent(mut self, n: usize) -> Self {
        self.default_max_concurrent = n;
        self
    }

    pub fn with_key_max_concurrent(mut self, key: impl Into<String>, n: usize) -> Self {
        self.per_key_max_concurrent.insert(key.into(), n);
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    fn max_for(&self, key: &str) -> usize {
        self.per_key_max_concurrent
            .get(key)
            .copied()
            .unwrap_or(self.default_max_concurrent)
    }

    async fn semaphore_for(&self, key: &str) -> Arc<Semaphore> {
        let mut keys = self.keys.lock().await;
        keys.entry(key.to_string())
            .or_insert_with(|| KeyState { semaphore: Arc::new(Semaphore::new(self.max_for(key))) })
            .semaphore
            .clone()
    }

    /// Acquire a slot for `key`. Resolves once a slot is free, fails with
    /// `TIMEOUT` if `queue_timeout` elapses first, or `ABORTED` if
    /// `cancel` fires first.
    pub async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<GatePermit, ClassifiedError> {
        let semaphore = self.semaphore_for(key).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(ClassifiedError::new(ErrorKind::Aborted, format!("acquire cancelled for key '{key}'")).with_provider(key))
            }
            result = semaphore.acquire_owned() => {
                let permit = result.expect("semaphore is never closed for the lifetime of the gate");
                Ok(GatePermit { _permit: permit })
            }
            _ = tokio::time::sleep(self.queue_timeout) => {
                Err(ClassifiedError::new(
                    ErrorKind::Timeout,
                    format!("gate queue timeout ({:?}) exceeded for key '{key}'", self.queue_timeout),
                ).with_provider(key))
            }
        }
    }

    /// Currently-available slots for `key` (active = max - available).
    pub async fn available_permits(&self, key: &str) -> usize {
        let semaphore = self.semaphore_for(key).await;
        semaphore.available_permits()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_max_concurrent() {
        let gate = Arc::new(ConcurrencyGate::new().with_default_max_concurrent(2));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                let permit = gate.acquire("provider-a", &token).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn queue_timeout_yields_timeout_error() {
        let gate = ConcurrencyGate::new()
            .with_default_max_concurrent(1)
            .with_queue_timeout(Duration::from_millis(30));
        let token = CancellationToken::new();
        let _held = gate.acquire("provider-a", &token).await.unwrap();

        let err = gate.acquire("provider-a", &token).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn cancellation_yields_aborted_error() {
        let gate = ConcurrencyGate::new().with_default_max_concurrent(1);
        let token = CancellationToken::new();
        let _held = gate.acquire("provider-a", &token).await.unwrap();

        let waiter_token = CancellationToken::new();
        let waiter_token_clone = waiter_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waiter_token_clone.cancel();
        });

        let err = gate.acquire("provider-a", &waiter_token).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_the_slot_for_the_next_waiter() {
        let gate = ConcurrencyGate::new().with_default_max_concurrent(1);
        let token = CancellationToken::new();
        let held = gate.acquire("provider-a", &token).await.unwrap();
        assert_eq!(gate.available_permits("provider-a").await, 0);
        held.release();
        assert_eq!(gate.available_permits("provider-a").await, 1);
    }

    #[tokio::test]
    async fn independent_keys_do_not_contend() {
        let gate = ConcurrencyGate::new().with_default_max_concurrent(1);
        let token = CancellationToken::new();
        let _a = gate.acquire("provider-a", &token).await.unwrap();
        let _b = gate.acquire("provider-b", &token).await.unwrap();
    }
}
