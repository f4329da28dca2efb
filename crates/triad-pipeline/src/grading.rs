//! §4.G step 11 — rank/grade: derive `value_per_min` for each enriched
//! venue, letter-grade it, mark candidates not worth the drive, and sort.
//!
//! `total_time` is the open question §9 leaves unstated precisely; this
//! implementation takes it as `drive_minutes + default_wait_minutes +
//! default_trip_minutes` — the full cycle time a driver commits to by
//! heading to the venue, waiting for a match, and completing the trip.

use triad_geo::EnrichedVenue;
use triad_types::{DistanceSource, RankingCandidate, ValueGrade};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct GradingConfig {
    pub base_rate_per_min: f64,
    pub surge: f64,
    pub default_trip_min: f64,
    pub default_wait_min: f64,
    pub min_acceptable_per_min: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self { base_rate_per_min: 1.0, surge: 1.0, default_trip_min: 15.0, default_wait_min: 5.0, min_acceptable_per_min: 0.5 }
    }
}

/// `value_per_min = base_rate x surge x trip_minutes / total_time` (§4.G
/// step 11). Returns `None` when `drive_minutes` is unavailable — grading
/// cannot run without it, and the candidate still gets a rank via the
/// `not_worth`-first sort, just with `value_per_min = None`.
pub fn value_per_min(config: &GradingConfig, drive_minutes: Option<f64>) -> Option<f64> {
    let drive_minutes = drive_minutes?;
    let total_time = drive_minutes + config.default_wait_min + config.default_trip_min;
    if total_time <= 0.0 {
        return None;
    }
    Some(config.base_rate_per_min * config.surge * config.default_trip_min / total_time)
}

/// Converts enriched venues into ranked, graded candidates: assigns dense
/// ranks `1..=n` (spec.md's invariant: the multiset of ranks within a
/// ranking equals `{1..|candidates|}`) after sorting by `(not_worth asc,
/// value_per_min desc, distance_miles asc)`.
pub fn rank_and_grade(config: &GradingConfig, ranking_id: Uuid, snapshot_id: Uuid, venues: Vec<EnrichedVenue>) -> Vec<RankingCandidate> {
    let mut scored: Vec<RankingCandidate> = venues
        .into_iter()
        .map(|venue| {
            let vpm = value_per_min(config, venue.drive_minutes);
            let grade = vpm.map(ValueGrade::from_value_per_min).unwrap_or(ValueGrade::D);
            let not_worth = vpm.map(|v| v < config.min_acceptable_per_min).unwrap_or(true);
            RankingCandidate {
                id: Uuid::new_v4(),
                ranking_id,
                snapshot_id,
                rank: 0,
                name: venue.name,
                lat: venue.lat,
                lng: venue.lng,
                place_id: venue.place_id,
                distance_miles: venue.distance_miles,
                drive_minutes: venue.drive_minutes,
                value_per_min: vpm,
                value_grade: grade,
                not_worth,
                pro_tips: venue.pro_tips,
                staging_tips: venue.staging_tips,
                staging_name: venue.staging_name,
                staging_lat: venue.staging_lat,
                staging_lng: venue.staging_lng,
                business_hours: venue.is_open_now.map(|open| serde_json::json!({"is_open_now": open})),
                closed_reasoning: None,
                distance_source: venue.distance_source,
                features: serde_json::json!({"category": venue.category}),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.not_worth
            .cmp(&b.not_worth)
            .then_with(|| b.value_per_min.partial_cmp(&a.value_per_min).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.distance_miles.partial_cmp(&b.distance_miles).unwrap_or(std::cmp::Ordering::Equal))
    });

    for (rank, candidate) in scored.iter_mut().enumerate() {
        candidate.rank = rank as u32 + 1;
    }
    scored
}

/// Whether every candidate's `(lat, lng)` provenance matches its
/// `distance_source`, per §8 property 4. Exposed for property tests in
/// the root crate's test suite.
pub fn coordinates_match_provenance(candidate: &RankingCandidate, planner_lat: f64, planner_lng: f64) -> bool {
    match candidate.distance_source {
        DistanceSource::EnrichmentFailed => (candidate.lat - planner_lat).abs() < f64::EPSILON && (candidate.lng - planner_lng).abs() < f64::EPSILON,
        DistanceSource::GoogleRoutesApi | DistanceSource::Predictive | DistanceSource::Unknown => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(drive_minutes: Option<f64>, distance_miles: Option<f64>) -> EnrichedVenue {
        EnrichedVenue {
            name: "Venue".to_string(),
            lat: 30.0,
            lng: -97.0,
            category: "bar".to_string(),
            pro_tips: vec!["tip".to_string()],
            staging_name: None,
            staging_lat: None,
            staging_lng: None,
            staging_tips: None,
            place_id: Some("place1".to_string()),
            is_open_now: Some(true),
            distance_miles,
            drive_minutes,
            distance_source: DistanceSource::GoogleRoutesApi,
        }
    }

    #[test]
    fn grades_follow_fixed_thresholds() {
        assert_eq!(ValueGrade::from_value_per_min(1.0), ValueGrade::A);
        assert_eq!(ValueGrade::from_value_per_min(0.8), ValueGrade::B);
        assert_eq!(ValueGrade::from_value_per_min(0.6), ValueGrade::C);
        assert_eq!(ValueGrade::from_value_per_min(0.1), ValueGrade::D);
    }

    #[test]
    fn rank_assignment_is_dense_and_starts_at_one() {
        let config = GradingConfig::default();
        let venues = vec![venue(Some(5.0), Some(2.0)), venue(Some(20.0), Some(8.0)), venue(Some(2.0), Some(1.0))];
        let candidates = rank_and_grade(&config, Uuid::new_v4(), Uuid::new_v4(), venues);
        let mut ranks: Vec<u32> = candidates.iter().map(|c| c.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn missing_drive_minutes_is_not_worth_and_sorts_last() {
        let config = GradingConfig::default();
        let venues = vec![venue(Some(5.0), Some(2.0)), venue(None, None)];
        let candidates = rank_and_grade(&config, Uuid::new_v4(), Uuid::new_v4(), venues);
        let missing = candidates.iter().find(|c| c.drive_minutes.is_none()).unwrap();
        assert!(missing.not_worth);
        assert_eq!(missing.rank, 2);
    }

    #[test]
    fn enrichment_failed_requires_planner_coordinates_to_match() {
        let mut candidate = RankingCandidate {
            id: Uuid::new_v4(),
            ranking_id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            rank: 0,
            name: "X".to_string(),
            lat: 30.0,
            lng: -97.0,
            place_id: None,
            distance_miles: None,
            drive_minutes: None,
            value_per_min: None,
            value_grade: ValueGrade::D,
            not_worth: true,
            pro_tips: vec![],
            staging_tips: None,
            staging_name: None,
            staging_lat: None,
            staging_lng: None,
            business_hours: None,
            closed_reasoning: None,
            distance_source: DistanceSource::EnrichmentFailed,
            features: serde_json::Value::Null,
        };
        assert!(coordinates_match_provenance(&candidate, 30.0, -97.0));
        candidate.lat = 31.0;
        assert!(!coordinates_match_provenance(&candidate, 30.0, -97.0));
    }
}
