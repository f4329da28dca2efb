//! §4.A Error Classifier and §7 error taxonomy.
//!
//! The classifier is pure and side-effect free: given whatever an adapter
//! boundary observed about a failure, it returns an `ErrorKind` plus two
//! derived booleans (`should_retry`, `affects_circuit`). Every other
//! component (gate, breaker, hedged router, stage runner) consumes this
//! classification; none of them re-derive it.
//!
//! Modeled on `ai::AiError` (the teacher's thiserror enum with
//! `RateLimitError`/`TimeoutError`/`AuthenticationError` variants) and
//! `sem_os_core::error::SemOsError::http_status`, generalized into the fixed
//! policy table spec.md §4.A specifies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The seven classifier buckets, fixed policy per §4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Aborted,
    Timeout,
    Throttled,
    Server,
    Client,
    Network,
    Unknown,
}

impl ErrorKind {
    /// Whether a caller (hedged router / stage runner) should retry after
    /// seeing this kind.
    pub fn should_retry(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Server | ErrorKind::Network | ErrorKind::Unknown)
    }

    /// Whether recording this outcome should count against the provider's
    /// circuit breaker.
    pub fn affects_circuit(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Throttled | ErrorKind::Server | ErrorKind::Network)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Throttled => "THROTTLED",
            ErrorKind::Server => "SERVER",
            ErrorKind::Client => "CLIENT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the classifier is given to work with at an adapter boundary. All
/// fields are optional/best-effort — adapters don't always have all of them.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInput<'a> {
    pub http_status: Option<u16>,
    pub message: &'a str,
    /// An explicit kind tag the caller already knows, e.g. "cancelled".
    pub explicit_tag: Option<&'a str>,
    pub was_cancelled: bool,
}

/// Classify an observed failure into one of the seven `ErrorKind`s, per the
/// fixed trigger table in §4.A. Order matters: cancellation and explicit
/// tags are checked before falling back to status-code/message heuristics.
pub fn classify(input: &ClassifyInput<'_>) -> ErrorKind {
    if input.was_cancelled || input.explicit_tag == Some("cancelled") {
        return ErrorKind::Aborted;
    }
    if let Some(tag) = input.explicit_tag {
        match tag {
            "timeout" | "deadline_exceeded" => return ErrorKind::Timeout,
            "throttled" | "rate_limited" => return ErrorKind::Throttled,
            _ => {}
        }
    }

    let msg = input.message.to_ascii_lowercase();

    if let Some(status) = input.http_status {
        if status == 429 {
            return ErrorKind::Throttled;
        }
        if (500..600).contains(&status) {
            return ErrorKind::Server;
        }
        if (400..500).contains(&status) {
            return ErrorKind::Client;
        }
    }

    if msg.contains("rate limit") || msg.contains("quota exceeded") {
        return ErrorKind::Throttled;
    }
    if msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline") {
        return ErrorKind::Timeout;
    }
    if msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("dns")
        || msg.contains("network")
    {
        return ErrorKind::Network;
    }

    ErrorKind::Unknown
}

/// A classified failure, carrying enough context for logging and for the
/// hedged router's composite-error aggregation (§4.D step 4).
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), provider: None }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// The worst of a set of per-provider failures, used to classify a
    /// composite "all candidates failed" error (§4.D step 4). "Worst" means
    /// the kind least likely to resolve itself: a CLIENT error for every
    /// provider is more informative (and more final) than a mix that
    /// includes a retriable SERVER error, so SERVER/NETWORK/TIMEOUT outrank
    /// CLIENT/THROTTLED which outrank UNKNOWN/ABORTED.
    pub fn worst_of(errors: &[ClassifiedError]) -> ErrorKind {
        fn severity(kind: ErrorKind) -> u8 {
            match kind {
                ErrorKind::Server => 6,
                ErrorKind::Network => 5,
                ErrorKind::Timeout => 4,
                ErrorKind::Throttled => 3,
                ErrorKind::Client => 2,
                ErrorKind::Unknown => 1,
                ErrorKind::Aborted => 0,
            }
        }
        errors
            .iter()
            .map(|e| e.kind)
            .max_by_key(|k| severity(*k))
            .unwrap_or(ErrorKind::Unknown)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(p) => write!(f, "[{}] {}: {}", p, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ClassifiedError {}

/// §7 error taxonomy at the core's surface. Each variant carries a
/// classifier kind plus a human-readable reason.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("incomplete snapshot: {0}")]
    IncompleteSnapshot(String),

    #[error("strategist failed: {0}")]
    StrategistFailed(String),

    #[error("consolidation failed: {0}")]
    ConsolidationFailed(String),

    #[error("planner failed: {0}")]
    PlannerFailed(String),

    #[error("enrichment failed: {0}")]
    EnrichmentFailed(String),

    #[error("persist failed: {0}")]
    PersistFailed(String),

    #[error("no providers available: {0}")]
    NoProvidersAvailable(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
}

impl PipelineError {
    /// The classifier kind this error code carries, per §7.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SnapshotNotFound(_) => ErrorKind::Client,
            PipelineError::IncompleteSnapshot(_) => ErrorKind::Client,
            PipelineError::StrategistFailed(_) => ErrorKind::Server,
            PipelineError::ConsolidationFailed(_) => ErrorKind::Server,
            PipelineError::PlannerFailed(_) => ErrorKind::Server,
            PipelineError::EnrichmentFailed(_) => ErrorKind::Server,
            PipelineError::PersistFailed(_) => ErrorKind::Server,
            PipelineError::NoProvidersAvailable(_) => ErrorKind::Server,
            PipelineError::BudgetExceeded(_) => ErrorKind::Timeout,
        }
    }

    /// Wire code, e.g. `"strategist_failed"` — the error-code string the
    /// (out-of-scope) HTTP layer would surface verbatim in a 4xx/5xx body.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::SnapshotNotFound(_) => "snapshot_not_found",
            PipelineError::IncompleteSnapshot(_) => "incomplete_snapshot",
            PipelineError::StrategistFailed(_) => "strategist_failed",
            PipelineError::ConsolidationFailed(_) => "consolidation_failed",
            PipelineError::PlannerFailed(_) => "planner_failed",
            PipelineError::EnrichmentFailed(_) => "enrichment_failed",
            PipelineError::PersistFailed(_) => "persist_failed",
            PipelineError::NoProvidersAvailable(_) => "no_providers_available",
            PipelineError::BudgetExceeded(_) => "budget_exceeded",
        }
    }

    /// The status an out-of-scope HTTP layer would map this to (§6, §7).
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::SnapshotNotFound(_) => 404,
            PipelineError::IncompleteSnapshot(_) => 400,
            _ => 500,
        }
    }
}
