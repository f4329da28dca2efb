//! Tactical planner output schema (§4.G step 9) — parses and validates the
//! JSON the venue_scorer role returns. Open question resolved (§9): this
//! implementation enforces a cap of 6 venues and 3 pro-tips each, the
//! tighter of the two historical variants the source carried.

use serde::Deserialize;
use triad_errors::{ClassifiedError, ErrorKind};

pub const MAX_VENUES: usize = 6;
pub const MIN_VENUES: usize = 1;
pub const MAX_PRO_TIPS: usize = 3;
pub const MIN_PRO_TIPS: usize = 1;
pub const MAX_TIP_LEN: usize = 280;

const LAT_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
const LNG_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

#[derive(Debug, Clone, Deserialize)]
pub struct RawStagingLocation {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVenue {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub category: String,
    pub pro_tips: Vec<String>,
    #[serde(default)]
    pub staging_name: Option<String>,
    #[serde(default)]
    pub staging_lat: Option<f64>,
    #[serde(default)]
    pub staging_lng: Option<f64>,
    #[serde(default)]
    pub strategic_timing: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPlannerOutput {
    pub venues: Vec<RawVenue>,
    #[serde(default)]
    pub central_staging: Option<RawStagingLocation>,
}

/// Validates a parsed planner response against the schema's bounds. A
/// violation is a `CLIENT` error (§4.G step 9): the model produced output
/// the pipeline cannot act on, not a transport failure.
pub fn validate(output: &RawPlannerOutput) -> Result<(), ClassifiedError> {
    if !(MIN_VENUES..=MAX_VENUES).contains(&output.venues.len()) {
        return Err(client_error(format!(
            "planner returned {} venues, expected {MIN_VENUES}..={MAX_VENUES}",
            output.venues.len()
        )));
    }

    for (index, venue) in output.venues.iter().enumerate() {
        if !LAT_RANGE.contains(&venue.lat) || !LNG_RANGE.contains(&venue.lng) {
            return Err(client_error(format!("venue[{index}] coordinates out of bounds: ({}, {})", venue.lat, venue.lng)));
        }
        if !(MIN_PRO_TIPS..=MAX_PRO_TIPS).contains(&venue.pro_tips.len()) {
            return Err(client_error(format!(
                "venue[{index}] has {} pro_tips, expected {MIN_PRO_TIPS}..={MAX_PRO_TIPS}",
                venue.pro_tips.len()
            )));
        }
        if let Some(overlong) = venue.pro_tips.iter().find(|tip| tip.len() > MAX_TIP_LEN) {
            return Err(client_error(format!("venue[{index}] pro_tip exceeds {MAX_TIP_LEN} chars: {overlong:.60}...")));
        }
        if venue.name.trim().is_empty() {
            return Err(client_error(format!("venue[{index}] has an empty name")));
        }
    }

    if let Some(staging) = &output.central_staging {
        if !LAT_RANGE.contains(&staging.lat) || !LNG_RANGE.contains(&staging.lng) {
            return Err(client_error(format!("central_staging coordinates out of bounds: ({}, {})", staging.lat, staging.lng)));
        }
    }

    Ok(())
}

fn client_error(message: String) -> ClassifiedError {
    ClassifiedError::new(ErrorKind::Client, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(lat: f64, lng: f64, tips: usize) -> RawVenue {
        RawVenue {
            name: "Test Venue".to_string(),
            lat,
            lng,
            category: "bar".to_string(),
            pro_tips: (0..tips).map(|i| format!("tip {i}")).collect(),
            staging_name: None,
            staging_lat: None,
            staging_lng: None,
            strategic_timing: None,
        }
    }

    #[test]
    fn accepts_a_well_formed_output() {
        let output = RawPlannerOutput { venues: vec![venue(30.0, -97.0, 2)], central_staging: None };
        assert!(validate(&output).is_ok());
    }

    #[test]
    fn rejects_too_many_venues() {
        let output = RawPlannerOutput { venues: vec![venue(30.0, -97.0, 2); MAX_VENUES + 1], central_staging: None };
        let err = validate(&output).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Client);
    }

    #[test]
    fn rejects_out_of_bounds_coordinates() {
        let output = RawPlannerOutput { venues: vec![venue(999.0, -97.0, 2)], central_staging: None };
        assert!(validate(&output).is_err());
    }

    #[test]
    fn rejects_zero_pro_tips() {
        let output = RawPlannerOutput { venues: vec![venue(30.0, -97.0, 0)], central_staging: None };
        assert!(validate(&output).is_err());
    }

    #[test]
    fn rejects_empty_venue_list() {
        let output = RawPlannerOutput { venues: vec![], central_staging: None };
        assert!(validate(&output).is_err());
    }
}
