//! §4.C Circuit Breaker — a per-key CLOSED -> OPEN -> HALF_OPEN -> CLOSED/OPEN
//! state machine that temporarily removes a failing provider from hedged
//! race candidacy.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use triad_errors::ErrorKind;

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_RESET: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct KeyState {
    state: State,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl KeyState {
    fn closed() -> Self {
        Self { state: State::Closed, consecutive_failures: 0, open_until: None }
    }
}

/// Per-key circuit breaker. All critical sections are a single `Mutex` lock
/// with no `.await` inside, per §5's "small critical sections; no I/O under
/// the lock".
pub struct CircuitBreaker {
    keys: Mutex<HashMap<String, KeyState>>,
    threshold: u32,
    reset: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self { keys: Mutex::new(HashMap::new()), threshold: DEFAULT_THRESHOLD, reset: DEFAULT_RESET }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_reset(mut self, reset: Duration) -> Self {
        self.reset = reset;
        self
    }

    /// Whether `key` may currently be offered as a hedged-race candidate.
    /// Transitions OPEN -> HALF_OPEN on the first check after `open_until`
    /// has elapsed, per §4.C.
    pub fn is_available(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().expect("circuit breaker mutex poisoned");
        let entry = keys.entry(key.to_string()).or_insert_with(KeyState::closed);

        match entry.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let open_until = entry.open_until.expect("OPEN state always carries open_until");
                if Instant::now() >= open_until {
                    entry.state = State::HalfOpen;
                    tracing::info!(provider = key, "circuit half-open, allowing trial request");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call. Resets the failure counter and collapses
    /// HALF_OPEN -> CLOSED.
    pub fn record_success(&self, key: &str) {
        let mut keys = self.keys.lock().expect("circuit breaker mutex poisoned");
        let entry = keys.entry(key.to_string()).or_insert_with(KeyState::closed);
        if entry.state != State::Closed {
            tracing::info!(provider = key, from = ?entry.state, "circuit closed after success");
        }
        entry.state = State::Closed;
        entry.consecutive_failures = 0;
        entry.open_until = None;
    }

    /// Record a failure. Only failures whose classifier kind is
    /// circuit-affecting count (§4.A); others are no-ops here.
    pub fn record_failure(&self, key: &str, kind: ErrorKind) {
        if !kind.affects_circuit() {
            return;
        }
        let mut keys = self.keys.lock().expect("circuit breaker mutex poisoned");
        let entry = keys.entry(key.to_string()).or_insert_with(KeyState::closed);

        match entry.state {
            State::HalfOpen => {
                // Trial call failed: collapse straight back to OPEN.
                entry.state = State::Open;
                entry.open_until = Some(Instant::now() + self.reset);
                tracing::warn!(provider = key, "circuit trial failed, reopening");
            }
            State::Closed | State::Open => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.threshold {
                    entry.state = State::Open;
                    entry.open_until = Some(Instant::now() + self.reset);
                    tracing::warn!(provider = key, failures = entry.consecutive_failures, "circuit opened");
                }
            }
        }
    }

    /// Filter a candidate set down to providers whose circuit is available.
    pub fn filter_available<'a>(&self, candidates: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        candidates.into_iter().filter(|c| self.is_available(c)).cloned().collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new().with_threshold(3);
        for _ in 0..2 {
            breaker.record_failure("p", ErrorKind::Server);
            assert!(breaker.is_available("p"));
        }
        breaker.record_failure("p", ErrorKind::Server);
        assert!(!breaker.is_available("p"));
    }

    #[test]
    fn non_circuit_affecting_kinds_never_open_it() {
        let breaker = CircuitBreaker::new().with_threshold(1);
        breaker.record_failure("p", ErrorKind::Aborted);
        breaker.record_failure("p", ErrorKind::Client);
        assert!(breaker.is_available("p"));
    }

    #[test]
    fn success_resets_failure_counter() {
        let breaker = CircuitBreaker::new().with_threshold(3);
        breaker.record_failure("p", ErrorKind::Server);
        breaker.record_failure("p", ErrorKind::Server);
        breaker.record_success("p");
        breaker.record_failure("p", ErrorKind::Server);
        assert!(breaker.is_available("p"), "should need 3 fresh failures after a success reset it");
    }

    #[test]
    fn half_opens_after_reset_elapses_and_a_failure_reopens_it() {
        let breaker = CircuitBreaker::new().with_threshold(1).with_reset(Duration::from_millis(20));
        breaker.record_failure("p", ErrorKind::Server);
        assert!(!breaker.is_available("p"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.is_available("p"), "should half-open after reset window");
        breaker.record_failure("p", ErrorKind::Server);
        assert!(!breaker.is_available("p"), "a failed trial call should reopen it");
    }

    #[test]
    fn half_open_success_closes_it() {
        let breaker = CircuitBreaker::new().with_threshold(1).with_reset(Duration::from_millis(20));
        breaker.record_failure("p", ErrorKind::Server);
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.is_available("p"));
        breaker.record_success("p");
        // A fresh single failure shouldn't reopen immediately post-close
        // unless threshold is 1 again — verify it actually went CLOSED by
        // checking consecutive_failures was reset (needs >=1 to reopen).
        breaker.record_failure("p", ErrorKind::Server);
        assert!(!breaker.is_available("p"));
    }

    #[test]
    fn independent_keys_isolated() {
        let breaker = CircuitBreaker::new().with_threshold(1);
        breaker.record_failure("p1", ErrorKind::Server);
        assert!(!breaker.is_available("p1"));
        assert!(breaker.is_available("p2"));
    }
}
