//! Role-based routing policy (§4.D): which pipeline role runs hedged vs
//! single, and its default timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The pipeline roles that route through a provider. Matches the
/// `STRATEGY_*` / `*_TIMEOUT_MS` configuration keys in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    StrategyCore,
    StrategyTactical,
    BriefingEvents,
    BriefingTraffic,
    VenueScorer,
    Enrichment,
    /// Optional holiday-check stage (§4.G step 5); not named in spec.md's
    /// illustrative role table but implied by the stage it backs.
    Holiday,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::StrategyCore => "strategy_core",
            Role::StrategyTactical => "strategy_tactical",
            Role::BriefingEvents => "briefing_events",
            Role::BriefingTraffic => "briefing_traffic",
            Role::VenueScorer => "venue_scorer",
            Role::Enrichment => "enrichment",
            Role::Holiday => "holiday",
        }
    }
}

/// Hedged (race N providers) or single (one accuracy-critical provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    Hedged,
    Single,
}

/// Default mode + timeout per role, illustrative-but-overridable per §4.D.
#[derive(Debug, Clone, Copy)]
pub struct RolePolicy {
    pub mode: RouterMode,
    pub timeout: Duration,
}

pub fn default_policy(role: Role) -> RolePolicy {
    match role {
        Role::StrategyTactical | Role::BriefingTraffic | Role::BriefingEvents => {
            RolePolicy { mode: RouterMode::Hedged, timeout: Duration::from_secs(8) }
        }
        Role::StrategyCore => RolePolicy { mode: RouterMode::Single, timeout: Duration::from_secs(30) },
        Role::VenueScorer => RolePolicy { mode: RouterMode::Single, timeout: Duration::from_secs(180) },
        Role::Enrichment => RolePolicy { mode: RouterMode::Single, timeout: Duration::from_secs(15) },
        Role::Holiday => RolePolicy { mode: RouterMode::Hedged, timeout: Duration::from_secs(8) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_spec_table() {
        assert_eq!(default_policy(Role::StrategyTactical).mode, RouterMode::Hedged);
        assert_eq!(default_policy(Role::BriefingEvents).mode, RouterMode::Hedged);
        assert_eq!(default_policy(Role::StrategyCore).mode, RouterMode::Single);
        assert_eq!(default_policy(Role::VenueScorer).mode, RouterMode::Single);
    }
}
