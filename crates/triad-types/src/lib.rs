//! Shared data model for the triad pipeline.
//!
//! Plain serde structs only — no sqlx, no HTTP. Storage crates and provider
//! crates both depend on this crate; it depends on nothing but serde/uuid/
//! chrono, the same "zero business-logic deps" role `ob-poc-types` and
//! `sem_os_core::types` play in the teacher workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse time-of-day bucket a snapshot falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPart {
    Overnight,
    EarlyMorning,
    Morning,
    Midday,
    Afternoon,
    Evening,
    LateNight,
}

/// Nearest-airport context for a snapshot, when the driver is near one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportContext {
    pub code: String,
    pub name: String,
    pub distance_miles: f64,
    pub delay_minutes: Option<i32>,
}

/// An immutable observation of a driver's situation. Created externally
/// (outside the core pipeline) and never mutated once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub formatted_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    /// IANA timezone name, e.g. "America/Chicago".
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub day_part: Option<DayPart>,
    /// Day of week, 0-6 (Sunday = 0, matching chrono's `Weekday::num_days_from_sunday`).
    pub dow: Option<u8>,
    pub weather: Option<serde_json::Value>,
    pub air_quality: Option<serde_json::Value>,
    pub airport_context: Option<AirportContext>,
    pub is_holiday: bool,
    pub holiday_name: Option<String>,
}

impl Snapshot {
    /// Snapshot §4.G step 2: the orchestrator requires `lat`, `lng`, and
    /// `timezone` before it will proceed past the load step.
    pub fn has_required_fields(&self) -> bool {
        self.timezone.as_deref().is_some_and(|tz| !tz.is_empty())
    }
}

/// Monotonic lifecycle of a `Strategy` row: pending -> ok | failed. Never
/// regresses (§3 invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Pending,
    Ok,
    Failed,
}

impl StrategyStatus {
    /// Whether transitioning `self -> next` is allowed under the
    /// monotonic-status invariant.
    pub fn can_transition_to(self, next: StrategyStatus) -> bool {
        matches!(
            (self, next),
            (StrategyStatus::Pending, StrategyStatus::Ok)
                | (StrategyStatus::Pending, StrategyStatus::Failed)
                | (StrategyStatus::Pending, StrategyStatus::Pending)
                | (StrategyStatus::Ok, StrategyStatus::Ok)
                | (StrategyStatus::Failed, StrategyStatus::Failed)
        )
    }
}

/// One per snapshot; mutated by the pipeline across phases (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub snapshot_id: Uuid,
    pub status: StrategyStatus,
    pub minstrategy: Option<String>,
    pub consolidated_strategy: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempt: u32,
    pub latency_ms: Option<u64>,
    pub tokens: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn pending(snapshot_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            snapshot_id,
            status: StrategyStatus::Pending,
            minstrategy: None,
            consolidated_strategy: None,
            error_code: None,
            error_message: None,
            attempt: 0,
            latency_ms: None,
            tokens: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One per snapshot — the briefing of events/news/traffic/closures (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Briefing {
    pub snapshot_id: Uuid,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub news: Vec<String>,
    #[serde(default)]
    pub traffic: Vec<String>,
    #[serde(default)]
    pub school_closures: Vec<String>,
    pub weather_summary: Option<String>,
    pub status: StrategyStatus,
    pub created_at: DateTime<Utc>,
}

impl Briefing {
    /// The empty fallback the orchestrator falls back to when the briefer
    /// stage is unavailable or exhausts its deadline (§4.G step 7).
    pub fn empty(snapshot_id: Uuid) -> Self {
        Self {
            snapshot_id,
            events: Vec::new(),
            news: Vec::new(),
            traffic: Vec::new(),
            school_closures: Vec::new(),
            weather_summary: None,
            status: StrategyStatus::Ok,
            created_at: Utc::now(),
        }
    }
}

/// Where a candidate's coordinates / drive-time figures came from (§3
/// invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSource {
    GoogleRoutesApi,
    EnrichmentFailed,
    Predictive,
    Unknown,
}

/// Value-per-minute letter grade (§4.G step 11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueGrade {
    A,
    B,
    C,
    D,
}

impl ValueGrade {
    /// Fixed thresholds from §4.G step 11: A>=1.0, B>=0.75, C>=0.5, else D.
    pub fn from_value_per_min(value_per_min: f64) -> Self {
        if value_per_min >= 1.0 {
            ValueGrade::A
        } else if value_per_min >= 0.75 {
            ValueGrade::B
        } else if value_per_min >= 0.5 {
            ValueGrade::C
        } else {
            ValueGrade::D
        }
    }
}

/// One per successful pipeline run (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranking {
    pub ranking_id: Uuid,
    pub snapshot_id: Uuid,
    pub user_id: Option<String>,
    pub city: Option<String>,
    pub model_name: String,
    pub correlation_id: Uuid,
    pub scoring_ms: u64,
    pub planner_ms: u64,
    pub total_ms: u64,
    pub timed_out: bool,
    /// Which soft-required stages actually ran ("full" | "no_briefing" | ...).
    pub path_taken: String,
    pub extras: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// N per ranking; `rank` is dense and unique within a ranking (§3 invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingCandidate {
    pub id: Uuid,
    pub ranking_id: Uuid,
    pub snapshot_id: Uuid,
    pub rank: u32,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub place_id: Option<String>,
    pub distance_miles: Option<f64>,
    pub drive_minutes: Option<f64>,
    pub value_per_min: Option<f64>,
    pub value_grade: ValueGrade,
    pub not_worth: bool,
    #[serde(default)]
    pub pro_tips: Vec<String>,
    pub staging_tips: Option<String>,
    pub staging_name: Option<String>,
    pub staging_lat: Option<f64>,
    pub staging_lng: Option<f64>,
    pub business_hours: Option<serde_json::Value>,
    pub closed_reasoning: Option<String>,
    pub distance_source: DistanceSource,
    pub features: serde_json::Value,
}

/// HTTP-response idempotency cache entry (§3, §4.J layer 2). TTL-bounded,
/// enforced by the store, not this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: u16,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Initiation-dedup lifecycle (§3, §4.J layer 1). The unique-on-snapshot_id
/// insert on this row is the dedup primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriadJobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// One per snapshot (unique constraint on `snapshot_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriadJob {
    pub snapshot_id: Uuid,
    pub status: TriadJobStatus,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl TriadJob {
    pub fn queued(snapshot_id: Uuid, kind: impl Into<String>) -> Self {
        Self {
            snapshot_id,
            status: TriadJobStatus::Queued,
            kind: kind.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_status_is_monotonic() {
        assert!(StrategyStatus::Pending.can_transition_to(StrategyStatus::Ok));
        assert!(StrategyStatus::Pending.can_transition_to(StrategyStatus::Failed));
        assert!(!StrategyStatus::Ok.can_transition_to(StrategyStatus::Pending));
        assert!(!StrategyStatus::Failed.can_transition_to(StrategyStatus::Ok));
    }

    #[test]
    fn value_grade_thresholds() {
        assert_eq!(ValueGrade::from_value_per_min(1.2), ValueGrade::A);
        assert_eq!(ValueGrade::from_value_per_min(1.0), ValueGrade::A);
        assert_eq!(ValueGrade::from_value_per_min(0.9), ValueGrade::B);
        assert_eq!(ValueGrade::from_value_per_min(0.75), ValueGrade::B);
        assert_eq!(ValueGrade::from_value_per_min(0.6), ValueGrade::C);
        assert_eq!(ValueGrade::from_value_per_min(0.5), ValueGrade::C);
        assert_eq!(ValueGrade::from_value_per_min(0.1), ValueGrade::D);
    }

    #[test]
    fn snapshot_requires_timezone() {
        let mut snap = Snapshot {
            snapshot_id: Uuid::new_v4(),
            lat: 32.9,
            lng: -96.8,
            formatted_address: None,
            city: None,
            state: None,
            timezone: None,
            created_at: Utc::now(),
            day_part: None,
            dow: None,
            weather: None,
            air_quality: None,
            airport_context: None,
            is_holiday: false,
            holiday_name: None,
        };
        assert!(!snap.has_required_fields());
        snap.timezone = Some("America/Chicago".to_string());
        assert!(snap.has_required_fields());
    }
}
