//! Root crate: configuration (§6), top-level error taxonomy aggregation,
//! §4.J idempotency/dedup (both layers), and `BlocksService` — the
//! library-level facade a (non-core, out-of-scope) HTTP layer would call
//! from a `POST /blocks` handler.

pub mod config;
pub mod dedup;
pub mod error;
pub mod idempotency;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad_geo::{EnrichmentClients, GeocodingClient, PlacesClient, RoutesClient, TomTomClient};
use triad_pipeline::prewarm::SubFetchFuture;
use triad_pipeline::{OrchestratorConfig, PipelineOrchestrator, PipelineRunOutcome, ProviderRegistry, StageRunner, SubFetch};
use triad_providers::{anthropic::AnthropicAdapter, google::GoogleAdapter, openai::OpenAiAdapter, perplexity::PerplexityAdapter, ChatRequest, ProviderAdapter};
use triad_routing::{CircuitBreaker, ConcurrencyGate, HedgedRouter, Role};
use triad_store::StateStore;
use triad_types::{Snapshot, TriadJobStatus};

pub use config::Config;
pub use error::TriadError;

use dedup::{Dedup, DedupLease};
use idempotency::IdempotencyCache;

/// Status the facade reports for calls that don't complete synchronously
/// (§6's `POST /blocks` `202 {status: pending|queued}` contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlocksStatus {
    Pending,
    Queued,
}

pub enum BlocksOutcome {
    Ranked(PipelineRunOutcome),
    InFlight(BlocksStatus),
}

/// The library-level facade a `POST /blocks` handler would call: checks the
/// idempotency cache, runs (or attaches to) the dedup'd pipeline, and caches
/// the terminal response.
pub struct BlocksService {
    store: Arc<dyn StateStore>,
    dedup: Dedup,
    idempotency: IdempotencyCache,
    orchestrator: PipelineOrchestrator,
    /// Retained alongside the copy moved into `StageRunner` so briefing
    /// sub-fetches (§4.G step 4) can call an adapter directly, bypassing
    /// the hedged/single stage machinery that's only meaningful for the
    /// pipeline's own named roles.
    providers: ProviderRegistry,
    geocoding: Arc<GeocodingClient>,
    tomtom: Option<Arc<TomTomClient>>,
    sub_fetch_deadline: Duration,
}

impl BlocksService {
    pub fn new(config: &Config, store: Arc<dyn StateStore>) -> Self {
        let providers = build_provider_registry(config);
        let role_candidates = build_role_candidates(config, &providers);
        let gate = Arc::new(ConcurrencyGate::new());
        let breaker = Arc::new(CircuitBreaker::new());
        let stage_runner = StageRunner::new(HedgedRouter::new(gate, breaker), providers.clone());

        let geo = EnrichmentClients {
            places: PlacesClient::new(config.provider_api_keys.google.clone().unwrap_or_default()),
            routes: RoutesClient::new(config.provider_api_keys.google.clone().unwrap_or_default()),
        };
        let geocoding = Arc::new(GeocodingClient::new(config.provider_api_keys.google.clone().unwrap_or_default()));
        let tomtom = config.provider_api_keys.tomtom.clone().map(|key| Arc::new(TomTomClient::new(key)));

        let orchestrator = PipelineOrchestrator::new(
            stage_runner,
            store.clone(),
            geo,
            OrchestratorConfig { total_budget: config.llm_total_budget, role_candidates, grading: config.grading_config() },
        );

        Self {
            store: store.clone(),
            dedup: Dedup::new(store.clone()),
            idempotency: IdempotencyCache::new(store, idempotency::DEFAULT_TTL),
            orchestrator,
            providers,
            geocoding,
            tomtom,
            sub_fetch_deadline: config.briefing_timeout,
        }
    }

    /// Builds the §4.G step 4 briefing sub-fetches for a loaded snapshot:
    /// traffic from TomTom when configured, and weather/news/events/
    /// school-closures from whichever provider is registered, each with a
    /// field-scoped prompt. A reverse-geocoded address (when available)
    /// grounds the LLM prompts in a human-readable location rather than
    /// bare coordinates.
    async fn build_sub_fetches(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> Vec<SubFetch> {
        let mut fetches = Vec::new();
        let lat = snapshot.lat;
        let lng = snapshot.lng;

        let place_name = match self.geocoding.reverse_geocode(lat, lng, cancel).await {
            Ok(result) => result.formatted_address,
            Err(_) => snapshot.city.clone().unwrap_or_else(|| format!("({lat}, {lng})")),
        };

        if let Some(tomtom) = self.tomtom.clone() {
            fetches.push(SubFetch {
                field: "traffic",
                deadline: self.sub_fetch_deadline,
                fetch: Box::new(move |cancel| {
                    Box::pin(async move {
                        match tomtom.flow_at_point(lat, lng, &cancel).await {
                            Ok(flow) => Some(format!(
                                "current speed {:.0} km/h vs free-flow {:.0} km/h (congestion ratio {:.2})",
                                flow.current_speed_kmh,
                                flow.free_flow_speed_kmh,
                                flow.congestion_ratio()
                            )),
                            Err(_) => None,
                        }
                    }) as SubFetchFuture
                }),
            });
        }

        if let Some(provider) = self.providers.values().next().cloned() {
            let prompts = [
                ("weather", format!("One sentence: current weather near {place_name}.")),
                ("news", format!("One sentence: notable breaking local news near {place_name} relevant to a rideshare driver.")),
                ("events", format!("One sentence: major events happening today near {place_name}.")),
                ("school_closures", format!("One sentence: any school closures today near {place_name}, or \"none\" if none known.")),
            ];
            for (field, prompt) in prompts {
                let provider = provider.clone();
                let request = ChatRequest::new(prompt);
                fetches.push(SubFetch {
                    field,
                    deadline: self.sub_fetch_deadline,
                    fetch: Box::new(move |cancel| Box::pin(async move { provider.call(&request, &cancel).await.ok().map(|r| r.text) }) as SubFetchFuture),
                });
            }
        }

        fetches
    }

    /// The `POST /blocks` entry point: `idempotency_key` defaults to
    /// `snapshot_id`'s string form per §4.J layer 2 when the caller didn't
    /// supply an explicit `x-idempotency-key`.
    pub async fn handle_blocks_request(&self, snapshot_id: Uuid, idempotency_key: Option<String>, cancel: &CancellationToken) -> Result<BlocksOutcome, TriadError> {
        let key = idempotency_key.unwrap_or_else(|| snapshot_id.to_string());

        if let Some(cached) = self.idempotency.get(&key, cancel).await? {
            let outcome: PipelineRunOutcome = serde_json::from_value(cached.body).map_err(|_| TriadError::AlreadyInFlight)?;
            return Ok(BlocksOutcome::Ranked(outcome));
        }

        match self.dedup.begin(snapshot_id, cancel).await? {
            DedupLease::First => {
                let sub_fetches = match self.store.load_snapshot(snapshot_id, cancel).await {
                    Ok(Some(snapshot)) => self.build_sub_fetches(&snapshot, cancel).await,
                    _ => Vec::new(),
                };
                let result = self.orchestrator.run(snapshot_id, sub_fetches, cancel).await;
                match &result {
                    Ok(outcome) => {
                        if let Ok(body) = serde_json::to_value(outcome) {
                            let _ = self.idempotency.put(key, 200, body, cancel).await;
                        }
                        self.dedup.complete(snapshot_id, Ok(outcome.clone()), cancel).await;
                    }
                    Err(e) => {
                        self.dedup.complete(snapshot_id, Err(e.to_string()), cancel).await;
                    }
                }
                Ok(BlocksOutcome::Ranked(result?))
            }
            DedupLease::Attach(mut rx) => {
                rx.changed().await.map_err(|_| TriadError::AlreadyInFlight)?;
                let result = rx.borrow().clone().ok_or(TriadError::AlreadyInFlight)?;
                match Arc::try_unwrap(result).unwrap_or_else(|arc| (*arc).clone()) {
                    Ok(outcome) => Ok(BlocksOutcome::Ranked(outcome)),
                    Err(message) => Err(TriadError::UpstreamFailed(message)),
                }
            }
            DedupLease::AlreadyQueued(status) => Ok(BlocksOutcome::InFlight(match status {
                TriadJobStatus::Queued => BlocksStatus::Queued,
                _ => BlocksStatus::Pending,
            })),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}

fn build_provider_registry(config: &Config) -> ProviderRegistry {
    let mut registry: ProviderRegistry = HashMap::new();
    if let Some(key) = &config.provider_api_keys.anthropic {
        registry.insert("anthropic".to_string(), Arc::new(AnthropicAdapter::new(key.clone())) as Arc<dyn ProviderAdapter>);
    }
    if let Some(key) = &config.provider_api_keys.openai {
        registry.insert("openai".to_string(), Arc::new(OpenAiAdapter::new(key.clone())) as Arc<dyn ProviderAdapter>);
    }
    if let Some(key) = &config.provider_api_keys.google {
        registry.insert("google".to_string(), Arc::new(GoogleAdapter::new(key.clone())) as Arc<dyn ProviderAdapter>);
    }
    if let Some(key) = &config.provider_api_keys.perplexity {
        registry.insert("perplexity".to_string(), Arc::new(PerplexityAdapter::new(key.clone())) as Arc<dyn ProviderAdapter>);
    }
    registry
}

/// Every configured provider is a hedging candidate for the hedged roles;
/// `strategy_core` and `venue_scorer` run single, so they get only the
/// first configured provider (whichever insertion order the registry
/// produced, since a `HashMap` has none to rely on — stable selection is a
/// config-surface concern, not this function's).
fn build_role_candidates(_config: &Config, providers: &ProviderRegistry) -> HashMap<Role, Vec<String>> {
    let all: Vec<String> = providers.keys().cloned().collect();
    let mut map = HashMap::new();
    for role in [Role::StrategyTactical, Role::BriefingEvents, Role::BriefingTraffic, Role::Holiday] {
        map.insert(role, all.clone());
    }
    for role in [Role::StrategyCore, Role::VenueScorer, Role::Enrichment] {
        map.insert(role, all.first().cloned().into_iter().collect());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_roles_get_at_most_one_candidate() {
        let mut providers: ProviderRegistry = HashMap::new();
        providers.insert("anthropic".to_string(), Arc::new(AnthropicAdapter::new("key".to_string())) as Arc<dyn ProviderAdapter>);
        providers.insert("openai".to_string(), Arc::new(OpenAiAdapter::new("key".to_string())) as Arc<dyn ProviderAdapter>);
        let config = Config {
            database_url: String::new(),
            llm_router_mode_default: triad_routing::RouterMode::Hedged,
            llm_hedged_timeout: std::time::Duration::from_secs(8),
            llm_max_concurrent_per_provider: 4,
            llm_total_budget: std::time::Duration::from_secs(180),
            planner_deadline: std::time::Duration::from_secs(180),
            briefing_timeout: std::time::Duration::from_secs(8),
            triad_timeout: std::time::Duration::from_secs(180),
            value_base_rate_per_min: 1.0,
            value_default_trip_min: 15.0,
            value_default_wait_min: 5.0,
            value_min_acceptable_per_min: 0.5,
            provider_api_keys: Default::default(),
            role_models: HashMap::new(),
        };
        let candidates = build_role_candidates(&config, &providers);
        assert!(candidates.get(&Role::StrategyCore).unwrap().len() <= 1);
        assert_eq!(candidates.get(&Role::BriefingEvents).unwrap().len(), 2);
    }
}
