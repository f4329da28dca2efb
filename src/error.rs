//! Top-level error taxonomy aggregation — the thin wrapper `BlocksService`
//! and the demo binary see, unifying `PipelineError`, `StoreError`, and
//! configuration failures behind one `thiserror` enum the way
//! `sem_os_core::error::SemOsError` aggregates its crate's sub-errors.

use triad_errors::PipelineError;
use triad_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, thiserror::Error)]
pub enum TriadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("request already in flight for this snapshot")]
    AlreadyInFlight,

    /// The attached-to run (driven by a different in-process caller) failed;
    /// this caller gets the same terminal outcome rather than re-running.
    #[error("upstream pipeline run failed: {0}")]
    UpstreamFailed(String),
}

impl TriadError {
    /// Wire error code an out-of-scope HTTP layer would surface (§6, §7).
    pub fn code(&self) -> &'static str {
        match self {
            TriadError::Config(_) => "invalid_config",
            TriadError::Pipeline(e) => e.code(),
            TriadError::Store(_) => "persist_failed",
            TriadError::AlreadyInFlight => "already_in_flight",
            TriadError::UpstreamFailed(_) => "upstream_failed",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            TriadError::Config(_) => 500,
            TriadError::Pipeline(e) => e.http_status(),
            TriadError::Store(_) => 500,
            TriadError::AlreadyInFlight => 202,
            TriadError::UpstreamFailed(_) => 502,
        }
    }
}
