//! §6 Configuration surface — environment-variable driven, loaded once at
//! process start via `dotenvy` + `std::env::var`, matching
//! `ob-poc-web::main`'s `DATABASE_URL` pattern.

use std::collections::HashMap;
use std::time::Duration;

use triad_routing::{Role, RouterMode};

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub llm_router_mode_default: RouterMode,
    pub llm_hedged_timeout: Duration,
    pub llm_max_concurrent_per_provider: usize,
    pub llm_total_budget: Duration,

    pub planner_deadline: Duration,
    pub briefing_timeout: Duration,
    pub triad_timeout: Duration,

    pub value_base_rate_per_min: f64,
    pub value_default_trip_min: f64,
    pub value_default_wait_min: f64,
    pub value_min_acceptable_per_min: f64,

    pub provider_api_keys: ProviderApiKeys,

    /// Role -> model name, from the `STRATEGY_*` keys. `Role::Holiday` reads
    /// `STRATEGY_HOLIDAY`, the key spec.md's model table omits by oversight
    /// (see DESIGN.md) since the stage it backs is named explicitly in §4.G.
    pub role_models: HashMap<Role, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
    pub perplexity: Option<String>,
    pub tomtom: Option<String>,
}

impl Config {
    /// Loads `.env` (if present, ignored if not) then reads every recognized
    /// key from the process environment, falling back to spec.md §6's
    /// defaults where a key is unset.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let router_mode = match env_opt("LLM_ROUTER_MODE").as_deref() {
            Some("hedged") => RouterMode::Hedged,
            Some("single") => RouterMode::Single,
            Some(other) => return Err(ConfigError::InvalidValue("LLM_ROUTER_MODE".to_string(), other.to_string())),
            None => RouterMode::Hedged,
        };

        Ok(Self {
            database_url: env_opt("DATABASE_URL").unwrap_or_else(|| "postgresql:///triad".to_string()),

            llm_router_mode_default: router_mode,
            llm_hedged_timeout: env_duration_ms("LLM_HEDGED_TIMEOUT_MS", 8_000)?,
            llm_max_concurrent_per_provider: env_usize("LLM_MAX_CONCURRENT_PER_PROVIDER", 4)?,
            llm_total_budget: env_duration_ms("LLM_TOTAL_BUDGET_MS", 180_000)?,

            planner_deadline: env_duration_ms("PLANNER_DEADLINE_MS", 180_000)?,
            briefing_timeout: env_duration_ms("BRIEFING_TIMEOUT_MS", 8_000)?,
            triad_timeout: env_duration_ms("TRIAD_TIMEOUT_MS", 180_000)?,

            value_base_rate_per_min: env_f64("VALUE_BASE_RATE_PER_MIN", 1.0)?,
            value_default_trip_min: env_f64("VALUE_DEFAULT_TRIP_MIN", 15.0)?,
            value_default_wait_min: env_f64("VALUE_DEFAULT_WAIT_MIN", 5.0)?,
            value_min_acceptable_per_min: env_f64("VALUE_MIN_ACCEPTABLE_PER_MIN", 0.5)?,

            provider_api_keys: ProviderApiKeys {
                anthropic: env_opt("ANTHROPIC_API_KEY"),
                openai: env_opt("OPENAI_API_KEY"),
                google: env_opt("GOOGLE_API_KEY"),
                perplexity: env_opt("PERPLEXITY_API_KEY"),
                tomtom: env_opt("TOMTOM_API_KEY"),
            },

            role_models: role_models_from_env(),
        })
    }

    pub fn grading_config(&self) -> triad_pipeline::GradingConfig {
        triad_pipeline::GradingConfig {
            base_rate_per_min: self.value_base_rate_per_min,
            surge: 1.0,
            default_trip_min: self.value_default_trip_min,
            default_wait_min: self.value_default_wait_min,
            min_acceptable_per_min: self.value_min_acceptable_per_min,
        }
    }
}

fn role_models_from_env() -> HashMap<Role, String> {
    let mut map = HashMap::new();
    for (role, key) in [
        (Role::StrategyCore, "STRATEGY_STRATEGIST"),
        (Role::BriefingEvents, "STRATEGY_BRIEFER"),
        (Role::StrategyTactical, "STRATEGY_CONSOLIDATOR"),
        (Role::VenueScorer, "STRATEGY_VENUE_PLANNER"),
        (Role::Holiday, "STRATEGY_HOLIDAY"),
    ] {
        if let Some(model) = env_opt(key) {
            map.insert(role, model);
        }
    }
    map
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_duration_ms(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(env_u64(key, default_ms)?))
}

fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
        None => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
        None => Ok(default),
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_models_only_includes_set_keys() {
        std::env::remove_var("STRATEGY_STRATEGIST");
        std::env::remove_var("STRATEGY_HOLIDAY");
        std::env::set_var("STRATEGY_STRATEGIST", "claude-3-5-sonnet-20241022");
        let models = role_models_from_env();
        assert_eq!(models.get(&Role::StrategyCore).map(String::as_str), Some("claude-3-5-sonnet-20241022"));
        assert!(!models.contains_key(&Role::Holiday));
        std::env::remove_var("STRATEGY_STRATEGIST");
    }

    #[test]
    fn env_duration_ms_falls_back_to_default_when_unset() {
        std::env::remove_var("DOES_NOT_EXIST_TIMEOUT_MS");
        let d = env_duration_ms("DOES_NOT_EXIST_TIMEOUT_MS", 5_000).unwrap();
        assert_eq!(d, Duration::from_millis(5_000));
    }
}
