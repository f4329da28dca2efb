//! §4.K State Store Interface — typed operations the core pipeline
//! consumes. The trait is the seam between pure pipeline logic and a
//! concrete backend; `MemoryStore` backs tests, `PostgresStore` backs
//! production.
//!
//! Grounded in `bpmn_lite_core::store::ProcessStore`: one `#[async_trait]`
//! port with a method per concern, rather than leaking SQL or connection
//! pooling into the orchestrator.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad_types::{Briefing, IdempotencyRecord, Ranking, RankingCandidate, Snapshot, Strategy, StrategyStatus, TriadJob};

use crate::error::StoreError;

/// Stable place data cached across pipeline runs (§4.H step 5).
#[derive(Debug, Clone)]
pub struct PlaceCacheEntry {
    pub place_id: String,
    pub name: String,
    pub formatted_address: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

/// Cached weekday opening-hours descriptions for a place.
#[derive(Debug, Clone)]
pub struct HoursCacheEntry {
    pub place_id: String,
    pub regular_opening_hours: Vec<String>,
    pub current_opening_hours: Vec<String>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_snapshot(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Snapshot>, StoreError>;

    /// Inserts a pending Strategy row if one doesn't already exist for
    /// `snapshot_id`; a no-op (not an error) if it does (§4.G step 3).
    async fn ensure_strategy_pending(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Strategy, StoreError>;

    /// Updates a Strategy row, but only if its current status equals
    /// `expected_status` (compare-and-swap). Enforces the monotonic
    /// status lifecycle invariant from the outside.
    async fn upsert_strategy_cas(&self, strategy: &Strategy, expected_status: StrategyStatus, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn load_strategy(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Strategy>, StoreError>;

    async fn upsert_briefing(&self, briefing: &Briefing, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn load_briefing(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Briefing>, StoreError>;

    /// §4.I: atomically inserts `ranking` and all `candidates` in one
    /// transaction. On any failure the whole write rolls back and no
    /// Ranking is observable to readers.
    async fn insert_ranking(&self, ranking: &Ranking, candidates: &[RankingCandidate], cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn load_ranking(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<(Ranking, Vec<RankingCandidate>)>, StoreError>;

    /// §4.J layer 1: insert-if-absent on the `snapshot_id` unique
    /// constraint. Returns the existing row (with `Inserted = false`
    /// semantics left to the caller via equality on `created_at`) when one
    /// already exists, so the orchestrator can distinguish "I am the first
    /// writer" from "someone beat me to it".
    async fn upsert_triad_job(&self, job: &TriadJob, cancel: &CancellationToken) -> Result<TriadJob, StoreError>;

    async fn update_triad_job_status(&self, snapshot_id: Uuid, status: triad_types::TriadJobStatus, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn load_triad_job(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<TriadJob>, StoreError>;

    async fn upsert_place_cache(&self, entry: &PlaceCacheEntry, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn upsert_hours_cache(&self, entry: &HoursCacheEntry, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// §4.J layer 2: stores a terminal HTTP response under `key` for a
    /// caller-enforced TTL window.
    async fn put_idempotency_record(&self, record: &IdempotencyRecord, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn get_idempotency_record(&self, key: &str, cancel: &CancellationToken) -> Result<Option<IdempotencyRecord>, StoreError>;
}
