use thiserror::Error;

/// Errors a `StateStore` implementation can return. Kept separate from
/// `triad_errors::PipelineError` because the store speaks in terms of rows
/// and constraints, not provider-call classification; the pipeline layer
/// maps `StoreError::TransactionFailed` onto `PipelineError::PersistFailed`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("compare-and-swap precondition failed: expected status did not match")]
    CasMismatch,

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
