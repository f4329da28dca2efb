//! §4.G Pipeline Orchestrator — the fixed stage sequence from a loaded
//! snapshot to a persisted ranking. This module owns steps 2-13; step 1
//! (dedup/idempotency) is the caller's concern (`triad::dedup`), since it
//! spans concurrent *invocations* of a run, not one run's internals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad_errors::PipelineError;
use triad_geo::{enrich_venues, EnrichmentClients, PlannedVenue};
use triad_providers::ChatRequest;
use triad_routing::Role;
use triad_store::{StateStore, StoreError};
use triad_types::{Briefing, DistanceSource, Ranking, RankingCandidate, Snapshot, Strategy, StrategyStatus};

use crate::grading::{rank_and_grade, GradingConfig};
use crate::json_parsing::parse_json_output;
use crate::planner_schema::{self, RawPlannerOutput};
use crate::prewarm::{spawn_prewarm, SubFetch};
use crate::stage::StageRunner;

pub struct OrchestratorConfig {
    pub total_budget: Duration,
    pub role_candidates: HashMap<Role, Vec<String>>,
    pub grading: GradingConfig,
}

pub struct PipelineOrchestrator {
    stage_runner: StageRunner,
    store: Arc<dyn StateStore>,
    geo: EnrichmentClients,
    config: OrchestratorConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineRunOutcome {
    pub ranking: Ranking,
    pub candidates: Vec<RankingCandidate>,
    pub path_taken: &'static str,
}

impl PipelineOrchestrator {
    pub fn new(stage_runner: StageRunner, store: Arc<dyn StateStore>, geo: EnrichmentClients, config: OrchestratorConfig) -> Self {
        Self { stage_runner, store, geo, config }
    }

    /// Runs the full stage sequence for `snapshot_id`. `sub_fetches` feeds
    /// step 4's fire-and-forget briefing pre-warm; pass an empty vec where
    /// no sub-fetch sources are wired up.
    pub async fn run(&self, snapshot_id: Uuid, sub_fetches: Vec<SubFetch>, parent_cancel: &CancellationToken) -> Result<PipelineRunOutcome, PipelineError> {
        let run_cancel = parent_cancel.child_token();
        match tokio::time::timeout(self.config.total_budget, self.run_inner(snapshot_id, sub_fetches, &run_cancel)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                run_cancel.cancel();
                Err(PipelineError::BudgetExceeded(format!("pipeline exceeded {:?} for snapshot {snapshot_id}", self.config.total_budget)))
            }
        }
    }

    async fn run_inner(&self, snapshot_id: Uuid, sub_fetches: Vec<SubFetch>, cancel: &CancellationToken) -> Result<PipelineRunOutcome, PipelineError> {
        let started = Instant::now();
        let correlation_id = Uuid::new_v4();

        // Step 2: snapshot load.
        let snapshot = self
            .store
            .load_snapshot(snapshot_id, cancel)
            .await
            .map_err(store_err_to_persist_failed)?
            .ok_or_else(|| PipelineError::SnapshotNotFound(snapshot_id.to_string()))?;

        if !snapshot.has_required_fields() {
            return Err(PipelineError::IncompleteSnapshot(format!("snapshot {snapshot_id} is missing lat/lng/timezone")));
        }

        // Step 3: ensure Strategy row.
        let mut strategy = self.store.ensure_strategy_pending(snapshot_id, cancel).await.map_err(store_err_to_persist_failed)?;

        // Step 4: fire-and-forget briefing pre-warm.
        let prewarm = spawn_prewarm(sub_fetches, cancel);

        // Step 5: optional holiday check, soft-fail.
        self.run_holiday_check(&snapshot, cancel).await;

        // Step 6: strategist (hard-required).
        let minstrategy = match self.run_strategist(&snapshot, cancel).await {
            Ok(text) => text,
            Err(e) => {
                strategy.status = StrategyStatus::Failed;
                strategy.error_code = Some("strategist_failed".to_string());
                strategy.error_message = Some(e.to_string());
                strategy.attempt += 1;
                let _ = self.store.upsert_strategy_cas(&strategy, StrategyStatus::Pending, cancel).await;
                prewarm.cancel_remaining();
                return Err(PipelineError::StrategistFailed(e.to_string()));
            }
        };
        strategy.minstrategy = Some(minstrategy.clone());
        strategy.attempt += 1;

        // Step 7: briefer (soft-required).
        let (briefing, path_has_briefing) = match self.run_briefer(&snapshot, &prewarm.snapshot(), cancel).await {
            Ok(briefing) => (briefing, true),
            Err(e) => {
                tracing::warn!(snapshot_id = %snapshot_id, error = %e, "briefer stage failed, proceeding with empty briefing");
                strategy.error_message = Some(format!("briefer warning: {e}"));
                (Briefing::empty(snapshot_id), false)
            }
        };
        let _ = self.store.upsert_briefing(&briefing, cancel).await;

        // Step 8: consolidator (hard-required).
        let consolidated = match self.run_consolidator(&minstrategy, &briefing, cancel).await {
            Ok(text) => text,
            Err(e) => {
                strategy.status = StrategyStatus::Failed;
                strategy.error_code = Some("consolidation_failed".to_string());
                strategy.error_message = Some(e.to_string());
                let _ = self.store.upsert_strategy_cas(&strategy, StrategyStatus::Pending, cancel).await;
                prewarm.cancel_remaining();
                return Err(PipelineError::ConsolidationFailed(e.to_string()));
            }
        };
        strategy.consolidated_strategy = Some(consolidated);
        strategy.status = StrategyStatus::Ok;
        if let Err(e) = self.store.upsert_strategy_cas(&strategy, StrategyStatus::Pending, cancel).await {
            prewarm.cancel_remaining();
            return Err(store_err_to_persist_failed(e));
        }

        prewarm.cancel_remaining();

        // Step 9: tactical planner (hard-required).
        let planner_started = Instant::now();
        let planner_output = self.run_planner(&snapshot, cancel).await?;
        let planner_ms = planner_started.elapsed().as_millis() as u64;

        // Step 10: venue enrichment (H).
        let planned: Vec<PlannedVenue> = planner_output
            .venues
            .into_iter()
            .map(|v| PlannedVenue {
                name: v.name,
                lat: v.lat,
                lng: v.lng,
                category: v.category,
                pro_tips: v.pro_tips,
                staging_name: v.staging_name,
                staging_lat: v.staging_lat,
                staging_lng: v.staging_lng,
                staging_tips: v.strategic_timing,
            })
            .collect();

        let scoring_started = Instant::now();
        let enriched = enrich_venues(&self.geo, &planned, snapshot.lat, snapshot.lng, snapshot.timezone.as_deref().unwrap_or("UTC"), cancel).await;

        if enriched.iter().all(|v| v.distance_source == DistanceSource::EnrichmentFailed) {
            return Err(PipelineError::EnrichmentFailed(format!("every venue failed enrichment for snapshot {snapshot_id}")));
        }

        // Step 11: rank/grade.
        let ranking_id = Uuid::new_v4();
        let candidates = rank_and_grade(&self.config.grading, ranking_id, snapshot_id, enriched);
        let scoring_ms = scoring_started.elapsed().as_millis() as u64;

        let path_taken = if path_has_briefing { "full" } else { "no_briefing" };
        let ranking = Ranking {
            ranking_id,
            snapshot_id,
            user_id: None,
            city: snapshot.city.clone(),
            model_name: "triad-pipeline".to_string(),
            correlation_id,
            scoring_ms,
            planner_ms,
            total_ms: started.elapsed().as_millis() as u64,
            timed_out: false,
            path_taken: path_taken.to_string(),
            extras: None,
            created_at: chrono::Utc::now(),
        };

        // Step 12: persist ranking, atomically.
        self.store.insert_ranking(&ranking, &candidates, cancel).await.map_err(|e| PipelineError::PersistFailed(e.to_string()))?;

        Ok(PipelineRunOutcome { ranking, candidates, path_taken })
    }

    async fn run_holiday_check(&self, snapshot: &Snapshot, cancel: &CancellationToken) {
        let Some(candidates) = self.config.role_candidates.get(&Role::Holiday) else { return };
        if candidates.is_empty() {
            return;
        }
        let request = ChatRequest::new(format!(
            "Is {} on {} a US federal or major regional holiday? Respond as JSON {{\"is_holiday\": bool, \"holiday_name\": string|null}}.",
            snapshot.city.as_deref().unwrap_or("this location"),
            snapshot.created_at.date_naive()
        ))
        .with_response_format(triad_providers::ResponseFormat::JsonObject);

        let _ = self
            .stage_runner
            .run::<(bool, Option<String>), _>(Role::Holiday, candidates, request, |text| parse_json_output(text).map(|v| (v["is_holiday"].as_bool().unwrap_or(false), v["holiday_name"].as_str().map(str::to_string))), cancel)
            .await;
    }

    async fn run_strategist(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> Result<String, PipelineError> {
        let candidates = self.candidates_for(Role::StrategyCore)?;
        let request = ChatRequest::new(format!(
            "Write a short strategic narrative for a rideshare driver at ({}, {}) in {}, timezone {}.",
            snapshot.lat,
            snapshot.lng,
            snapshot.city.as_deref().unwrap_or("an unspecified city"),
            snapshot.timezone.as_deref().unwrap_or("UTC")
        ));
        self.stage_runner
            .run(Role::StrategyCore, candidates, request, |text| Ok(text.to_string()), cancel)
            .await
            .map(|o| o.output)
            .map_err(|e| PipelineError::StrategistFailed(e.to_string()))
    }

    async fn run_briefer(&self, snapshot: &Snapshot, prewarmed: &crate::prewarm::PrewarmedBriefingInputs, cancel: &CancellationToken) -> Result<Briefing, triad_errors::ClassifiedError> {
        let candidates = self
            .config
            .role_candidates
            .get(&Role::BriefingEvents)
            .map(Vec::as_slice)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| triad_errors::ClassifiedError::new(triad_errors::ErrorKind::Server, "no providers configured for role briefing_events"))?;
        let request = ChatRequest::new(format!(
            "Summarize events, traffic, and news relevant to a rideshare driver near ({}, {}). Known inputs: weather={:?} traffic={:?} news={:?} events={:?} school_closures={:?}. Respond as JSON {{\"events\": [string], \"news\": [string], \"traffic\": [string], \"school_closures\": [string], \"weather_summary\": string|null}}.",
            snapshot.lat, snapshot.lng, prewarmed.weather, prewarmed.traffic, prewarmed.news, prewarmed.events, prewarmed.school_closures
        ))
        .with_response_format(triad_providers::ResponseFormat::JsonObject);

        let snapshot_id = snapshot.snapshot_id;
        self.stage_runner
            .run(Role::BriefingEvents, candidates, request, move |text| {
                let value = parse_json_output(text)?;
                Ok(Briefing {
                    snapshot_id,
                    events: string_array(&value, "events"),
                    news: string_array(&value, "news"),
                    traffic: string_array(&value, "traffic"),
                    school_closures: string_array(&value, "school_closures"),
                    weather_summary: value["weather_summary"].as_str().map(str::to_string),
                    status: StrategyStatus::Ok,
                    created_at: chrono::Utc::now(),
                })
            }, cancel)
            .await
            .map(|o| o.output)
    }

    async fn run_consolidator(&self, minstrategy: &str, briefing: &Briefing, cancel: &CancellationToken) -> Result<String, PipelineError> {
        let candidates = self.candidates_for(Role::StrategyTactical)?;
        let request = ChatRequest::new(format!(
            "Combine this strategic narrative with the current briefing into one consolidated strategy.\nNarrative: {minstrategy}\nEvents: {:?}\nTraffic: {:?}",
            briefing.events, briefing.traffic
        ));
        self.stage_runner
            .run(Role::StrategyTactical, candidates, request, |text| Ok(text.to_string()), cancel)
            .await
            .map(|o| o.output)
            .map_err(|e| PipelineError::ConsolidationFailed(e.to_string()))
    }

    async fn run_planner(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> Result<RawPlannerOutput, PipelineError> {
        let candidates = self.candidates_for(Role::VenueScorer)?;
        let request = ChatRequest::new(format!(
            "Propose 1 to {} tactical venues near ({}, {}) for a rideshare driver, each with 1 to {} pro tips. Respond as JSON {{\"venues\": [...]}}.",
            planner_schema::MAX_VENUES,
            snapshot.lat,
            snapshot.lng,
            planner_schema::MAX_PRO_TIPS
        ))
        .with_response_format(triad_providers::ResponseFormat::JsonObject);

        let outcome = self
            .stage_runner
            .run(Role::VenueScorer, candidates, request, |text| {
                let value = parse_json_output(text)?;
                serde_json::from_value::<RawPlannerOutput>(value)
                    .map_err(|e| triad_errors::ClassifiedError::new(triad_errors::ErrorKind::Client, format!("planner output schema mismatch: {e}")))
            }, cancel)
            .await
            .map_err(|e| PipelineError::PlannerFailed(e.to_string()))?;

        planner_schema::validate(&outcome.output).map_err(|e| PipelineError::PlannerFailed(e.to_string()))?;
        Ok(outcome.output)
    }

    fn candidates_for(&self, role: Role) -> Result<&[String], PipelineError> {
        self.config
            .role_candidates
            .get(&role)
            .map(Vec::as_slice)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PipelineError::NoProvidersAvailable(format!("no providers configured for role {}", role.as_str())))
    }
}

fn string_array(value: &serde_json::Value, field: &str) -> Vec<String> {
    value[field].as_array().map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default()
}

fn store_err_to_persist_failed(err: StoreError) -> PipelineError {
    PipelineError::PersistFailed(err.to_string())
}
