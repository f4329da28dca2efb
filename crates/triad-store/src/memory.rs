//! In-process `StateStore` for tests — no network, no database. Grounded
//! in `bpmn_lite_core::store_memory::MemoryStore`: one `Mutex`-guarded
//! set of `HashMap`s behind the same port trait the Postgres backend
//! implements, so pipeline tests exercise real orchestration logic
//! against a fake that enforces the same constraints (unique snapshot_id,
//! CAS on status).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad_types::{Briefing, IdempotencyRecord, Ranking, RankingCandidate, Snapshot, Strategy, StrategyStatus, TriadJob, TriadJobStatus};

use crate::error::StoreError;
use crate::ports::{HoursCacheEntry, PlaceCacheEntry, StateStore};

#[derive(Default)]
struct Inner {
    snapshots: HashMap<Uuid, Snapshot>,
    strategies: HashMap<Uuid, Strategy>,
    briefings: HashMap<Uuid, Briefing>,
    rankings: HashMap<Uuid, (Ranking, Vec<RankingCandidate>)>,
    triad_jobs: HashMap<Uuid, TriadJob>,
    place_cache: HashMap<String, PlaceCacheEntry>,
    hours_cache: HashMap<String, HoursCacheEntry>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_snapshot(&self, snapshot: Snapshot) {
        self.inner.lock().unwrap().snapshots.insert(snapshot.snapshot_id, snapshot);
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_snapshot(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Snapshot>, StoreError> {
        check_cancel(cancel)?;
        Ok(self.inner.lock().unwrap().snapshots.get(&snapshot_id).cloned())
    }

    async fn ensure_strategy_pending(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Strategy, StoreError> {
        check_cancel(cancel)?;
        let mut guard = self.inner.lock().unwrap();
        if let Some(existing) = guard.strategies.get(&snapshot_id) {
            return Ok(existing.clone());
        }
        let strategy = Strategy {
            snapshot_id,
            status: StrategyStatus::Pending,
            minstrategy: None,
            consolidated_strategy: None,
            error_code: None,
            error_message: None,
            attempt: 0,
            latency_ms: None,
        };
        guard.strategies.insert(snapshot_id, strategy.clone());
        Ok(strategy)
    }

    async fn upsert_strategy_cas(&self, strategy: &Strategy, expected_status: StrategyStatus, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        let mut guard = self.inner.lock().unwrap();
        let current_status = guard.strategies.get(&strategy.snapshot_id).map(|s| s.status);
        match current_status {
            Some(status) if status == expected_status => {
                guard.strategies.insert(strategy.snapshot_id, strategy.clone());
                Ok(())
            }
            Some(_) => Err(StoreError::CasMismatch),
            None => Err(StoreError::NotFound),
        }
    }

    async fn load_strategy(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Strategy>, StoreError> {
        check_cancel(cancel)?;
        Ok(self.inner.lock().unwrap().strategies.get(&snapshot_id).cloned())
    }

    async fn upsert_briefing(&self, briefing: &Briefing, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        self.inner.lock().unwrap().briefings.insert(briefing.snapshot_id, briefing.clone());
        Ok(())
    }

    async fn load_briefing(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Briefing>, StoreError> {
        check_cancel(cancel)?;
        Ok(self.inner.lock().unwrap().briefings.get(&snapshot_id).cloned())
    }

    async fn insert_ranking(&self, ranking: &Ranking, candidates: &[RankingCandidate], cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        let mut guard = self.inner.lock().unwrap();
        if guard.rankings.contains_key(&ranking.snapshot_id) {
            return Err(StoreError::Conflict(format!("ranking already exists for snapshot {}", ranking.snapshot_id)));
        }
        // Dense, unique rank within the ranking (§3 invariant 1) — reject
        // the whole write atomically if the caller violated it, mirroring
        // the Postgres unique constraint on (ranking_id, rank).
        let mut ranks: Vec<u32> = candidates.iter().map(|c| c.rank).collect();
        ranks.sort_unstable();
        let expected: Vec<u32> = (1..=candidates.len() as u32).collect();
        if ranks != expected {
            return Err(StoreError::TransactionFailed("candidate ranks are not a dense 1..=n sequence".to_string()));
        }
        guard.rankings.insert(ranking.snapshot_id, (ranking.clone(), candidates.to_vec()));
        Ok(())
    }

    async fn load_ranking(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<(Ranking, Vec<RankingCandidate>)>, StoreError> {
        check_cancel(cancel)?;
        Ok(self.inner.lock().unwrap().rankings.get(&snapshot_id).cloned())
    }

    async fn upsert_triad_job(&self, job: &TriadJob, cancel: &CancellationToken) -> Result<TriadJob, StoreError> {
        check_cancel(cancel)?;
        let mut guard = self.inner.lock().unwrap();
        if let Some(existing) = guard.triad_jobs.get(&job.snapshot_id) {
            return Ok(existing.clone());
        }
        guard.triad_jobs.insert(job.snapshot_id, job.clone());
        Ok(job.clone())
    }

    async fn update_triad_job_status(&self, snapshot_id: Uuid, status: TriadJobStatus, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        let mut guard = self.inner.lock().unwrap();
        let job = guard.triad_jobs.get_mut(&snapshot_id).ok_or(StoreError::NotFound)?;
        job.status = status;
        Ok(())
    }

    async fn load_triad_job(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<TriadJob>, StoreError> {
        check_cancel(cancel)?;
        Ok(self.inner.lock().unwrap().triad_jobs.get(&snapshot_id).cloned())
    }

    async fn upsert_place_cache(&self, entry: &PlaceCacheEntry, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        self.inner.lock().unwrap().place_cache.insert(entry.place_id.clone(), entry.clone());
        Ok(())
    }

    async fn upsert_hours_cache(&self, entry: &HoursCacheEntry, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        self.inner.lock().unwrap().hours_cache.insert(entry.place_id.clone(), entry.clone());
        Ok(())
    }

    async fn put_idempotency_record(&self, record: &IdempotencyRecord, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        self.inner.lock().unwrap().idempotency.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn get_idempotency_record(&self, key: &str, cancel: &CancellationToken) -> Result<Option<IdempotencyRecord>, StoreError> {
        check_cancel(cancel)?;
        Ok(self.inner.lock().unwrap().idempotency.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_strategy(snapshot_id: Uuid) -> Strategy {
        Strategy {
            snapshot_id,
            status: StrategyStatus::Pending,
            minstrategy: None,
            consolidated_strategy: None,
            error_code: None,
            error_message: None,
            attempt: 0,
            latency_ms: None,
        }
    }

    #[tokio::test]
    async fn ensure_strategy_pending_is_idempotent() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let first = store.ensure_strategy_pending(id, &cancel).await.unwrap();
        let second = store.ensure_strategy_pending(id, &cancel).await.unwrap();
        assert_eq!(first.snapshot_id, second.snapshot_id);
    }

    #[tokio::test]
    async fn cas_rejects_stale_expected_status() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        store.ensure_strategy_pending(id, &cancel).await.unwrap();

        let mut updated = sample_strategy(id);
        updated.status = StrategyStatus::Ok;
        store.upsert_strategy_cas(&updated, StrategyStatus::Pending, &cancel).await.unwrap();

        let mut stale_update = sample_strategy(id);
        stale_update.status = StrategyStatus::Failed;
        let err = store.upsert_strategy_cas(&stale_update, StrategyStatus::Pending, &cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::CasMismatch));
    }

    #[tokio::test]
    async fn insert_ranking_rejects_duplicate_snapshot() {
        let store = MemoryStore::new();
        let snapshot_id = Uuid::new_v4();
        let ranking = Ranking {
            ranking_id: Uuid::new_v4(),
            snapshot_id,
            user_id: None,
            city: None,
            model_name: "test".to_string(),
            correlation_id: Uuid::new_v4(),
            scoring_ms: 1,
            planner_ms: 1,
            total_ms: 2,
            timed_out: false,
            path_taken: "full".to_string(),
            extras: None,
            created_at: Utc::now(),
        };
        let cancel = CancellationToken::new();
        store.insert_ranking(&ranking, &[], &cancel).await.unwrap();
        let err = store.insert_ranking(&ranking, &[], &cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn triad_job_upsert_returns_existing_on_second_writer() {
        let store = MemoryStore::new();
        let snapshot_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let first = store.upsert_triad_job(&TriadJob::queued(snapshot_id, "blocks"), &cancel).await.unwrap();
        let second = store.upsert_triad_job(&TriadJob::queued(snapshot_id, "blocks"), &cancel).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }
}
