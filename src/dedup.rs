//! §4.J layer 1 — initiation dedup. The `TriadJob` unique-on-`snapshot_id`
//! insert decides who the first writer is; everyone else either attaches to
//! the in-process waiter map (same process, concurrent callers) or learns
//! the job is already queued/running elsewhere (from the store alone).
//!
//! Grounded in `ob-workflow`'s state-machine-plus-store split: the store is
//! the durable source of truth, the in-process map is purely an optimization
//! so same-process callers don't all poll the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad_pipeline::PipelineRunOutcome;
use triad_store::{StateStore, StoreError};
use triad_types::{TriadJob, TriadJobStatus};

pub type DedupResult = Result<PipelineRunOutcome, String>;

pub enum DedupLease {
    /// This caller won the race and must drive the pipeline run, then call
    /// [`Dedup::complete`].
    First,
    /// Another in-process task is already running this snapshot; await this
    /// receiver for its result.
    Attach(watch::Receiver<Option<Arc<DedupResult>>>),
    /// A `TriadJob` row already existed (inserted by a different process, or
    /// a previous call whose in-process entry has since been cleaned up).
    AlreadyQueued(TriadJobStatus),
}

pub struct Dedup {
    store: Arc<dyn StateStore>,
    waiters: Mutex<HashMap<Uuid, watch::Sender<Option<Arc<DedupResult>>>>>,
}

impl Dedup {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store, waiters: Mutex::new(HashMap::new()) }
    }

    pub async fn begin(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<DedupLease, StoreError> {
        {
            let waiters = self.waiters.lock().await;
            if let Some(tx) = waiters.get(&snapshot_id) {
                return Ok(DedupLease::Attach(tx.subscribe()));
            }
        }

        let job = TriadJob::queued(snapshot_id, "blocks");
        let existing = self.store.upsert_triad_job(&job, cancel).await?;
        if existing.created_at != job.created_at {
            return Ok(DedupLease::AlreadyQueued(existing.status));
        }

        let (tx, _rx) = watch::channel(None);
        self.waiters.lock().await.insert(snapshot_id, tx);
        let _ = self.store.update_triad_job_status(snapshot_id, TriadJobStatus::Running, cancel).await;
        Ok(DedupLease::First)
    }

    /// Publishes the result to attached waiters and clears the in-process
    /// entry. Always call this from the first writer once its run settles,
    /// success or failure, so waiters don't hang and the map doesn't leak.
    pub async fn complete(&self, snapshot_id: Uuid, result: DedupResult, cancel: &CancellationToken) {
        let status = if result.is_ok() { TriadJobStatus::Done } else { TriadJobStatus::Failed };
        if let Err(e) = self.store.update_triad_job_status(snapshot_id, status, cancel).await {
            tracing::warn!(snapshot_id = %snapshot_id, error = %e, "failed to record terminal triad job status");
        }
        if let Some(tx) = self.waiters.lock().await.remove(&snapshot_id) {
            let _ = tx.send(Some(Arc::new(result)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triad_store::MemoryStore;

    #[tokio::test]
    async fn first_caller_gets_first_lease_second_attaches() {
        let dedup = Dedup::new(Arc::new(MemoryStore::new()));
        let snapshot_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        assert!(matches!(dedup.begin(snapshot_id, &cancel).await.unwrap(), DedupLease::First));
        match dedup.begin(snapshot_id, &cancel).await.unwrap() {
            DedupLease::Attach(_) => {}
            _ => panic!("expected Attach"),
        }
    }

    #[tokio::test]
    async fn completing_publishes_result_to_attached_waiters() {
        let dedup = Dedup::new(Arc::new(MemoryStore::new()));
        let snapshot_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        assert!(matches!(dedup.begin(snapshot_id, &cancel).await.unwrap(), DedupLease::First));
        let mut rx = match dedup.begin(snapshot_id, &cancel).await.unwrap() {
            DedupLease::Attach(rx) => rx,
            _ => panic!("expected Attach"),
        };

        dedup.complete(snapshot_id, Err("boom".to_string()), &cancel).await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().as_ref().unwrap().is_err());
    }

    #[tokio::test]
    async fn a_fresh_snapshot_id_can_be_claimed_again_after_completion() {
        let dedup = Dedup::new(Arc::new(MemoryStore::new()));
        let snapshot_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        assert!(matches!(dedup.begin(snapshot_id, &cancel).await.unwrap(), DedupLease::First));
        dedup.complete(snapshot_id, Err("boom".to_string()), &cancel).await;

        // the in-process entry is gone, but the TriadJob row persists, so a
        // second attempt on the same snapshot now sees it already queued.
        match dedup.begin(snapshot_id, &cancel).await.unwrap() {
            DedupLease::AlreadyQueued(_) => {}
            other => panic!("expected AlreadyQueued, got a fresh lease: {}", matches!(other, DedupLease::First)),
        }
    }
}
