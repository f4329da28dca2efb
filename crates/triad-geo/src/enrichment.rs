//! §4.H Venue Enrichment orchestration: fan out per-venue lookups in
//! parallel, merge by stable key (planner index), and never lose the
//! planner's original coordinates even when every external call fails.

use chrono::{NaiveTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use triad_errors::ClassifiedError;
use triad_types::DistanceSource;

use crate::hours::is_open_now;
use crate::places::PlacesClient;
use crate::routes::RoutesClient;

/// A single tactical-planner venue proposal, prior to enrichment.
#[derive(Debug, Clone)]
pub struct PlannedVenue {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub category: String,
    pub pro_tips: Vec<String>,
    pub staging_name: Option<String>,
    pub staging_lat: Option<f64>,
    pub staging_lng: Option<f64>,
    pub staging_tips: Option<String>,
}

/// Enriched venue, ready to become a `RankingCandidate` once rank/grade
/// (§4.G step 11) is computed.
#[derive(Debug, Clone)]
pub struct EnrichedVenue {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub category: String,
    pub pro_tips: Vec<String>,
    pub staging_name: Option<String>,
    pub staging_lat: Option<f64>,
    pub staging_lng: Option<f64>,
    pub staging_tips: Option<String>,
    pub place_id: Option<String>,
    pub is_open_now: Option<bool>,
    pub distance_miles: Option<f64>,
    pub drive_minutes: Option<f64>,
    pub distance_source: DistanceSource,
}

/// Average surface-street speed assumed for the haversine-distance
/// predictive fallback (§4.G step 10/§9) when the Routes call fails for a
/// venue that Places otherwise resolved fine.
const PREDICTIVE_AVG_SPEED_MPH: f64 = 25.0;

const EARTH_RADIUS_MILES: f64 = 3958.8;

fn haversine_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1_rad, lat2_rad) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_MILES * c
}

pub struct EnrichmentClients {
    pub places: PlacesClient,
    pub routes: RoutesClient,
}

/// Enriches every venue in parallel, preserving planner order in the
/// returned vector (§4.H guarantee: "order of the output list matches the
/// planner's order").
pub async fn enrich_venues(
    clients: &EnrichmentClients,
    venues: &[PlannedVenue],
    origin_lat: f64,
    origin_lng: f64,
    timezone: &str,
    cancel: &CancellationToken,
) -> Vec<EnrichedVenue> {
    let futures = venues.iter().map(|venue| enrich_one(clients, venue, origin_lat, origin_lng, timezone, cancel));
    join_all(futures).await
}

async fn enrich_one(
    clients: &EnrichmentClients,
    venue: &PlannedVenue,
    origin_lat: f64,
    origin_lng: f64,
    timezone: &str,
    cancel: &CancellationToken,
) -> EnrichedVenue {
    let mut result = EnrichedVenue {
        name: venue.name.clone(),
        lat: venue.lat,
        lng: venue.lng,
        category: venue.category.clone(),
        pro_tips: venue.pro_tips.clone(),
        staging_name: venue.staging_name.clone(),
        staging_lat: venue.staging_lat,
        staging_lng: venue.staging_lng,
        staging_tips: venue.staging_tips.clone(),
        place_id: None,
        is_open_now: None,
        distance_miles: None,
        drive_minutes: None,
        distance_source: DistanceSource::EnrichmentFailed,
    };

    match clients.places.find_nearby(venue.lat, venue.lng, &venue.name, cancel).await {
        Ok(Some(place)) => {
            result.place_id = Some(place.place_id.clone());
            result.is_open_now = compute_open_now(&place.current_opening_hours, &place.regular_opening_hours, timezone);
            result.lat = place.lat;
            result.lng = place.lng;
        }
        Ok(None) => tracing::debug!(venue = %venue.name, "places nearby-search found no match"),
        Err(e) => log_recoverable("places", &venue.name, &e),
    }

    match clients.routes.route_with_traffic(origin_lat, origin_lng, result.lat, result.lng, cancel).await {
        Ok(route) => {
            result.distance_miles = Some(route.distance_miles());
            result.drive_minutes = Some(route.duration_minutes());
            result.distance_source = DistanceSource::GoogleRoutesApi;
        }
        Err(e) => {
            log_recoverable("routes", &venue.name, &e);
            let miles = haversine_miles(origin_lat, origin_lng, result.lat, result.lng);
            result.distance_miles = Some(miles);
            result.drive_minutes = Some(miles / PREDICTIVE_AVG_SPEED_MPH * 60.0);
            result.distance_source = DistanceSource::Predictive;
        }
    }

    result
}

fn compute_open_now(current: &[String], regular: &[String], timezone: &str) -> Option<bool> {
    let descriptions = if !current.is_empty() { current } else { regular };
    if descriptions.is_empty() {
        return None;
    }
    let tz: Tz = timezone.parse().ok()?;
    let now = Utc::now().with_timezone(&tz);
    let weekday = now.weekday();
    let time: NaiveTime = now.time();
    Some(is_open_now(descriptions, weekday, time))
}

fn log_recoverable(source: &str, venue: &str, err: &ClassifiedError) {
    tracing::warn!(source, venue, kind = %err.kind, "venue enrichment lookup failed, falling back to enrichment_failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enriched_venue_defaults_to_enrichment_failed_source() {
        let venue = EnrichedVenue {
            name: "Test Venue".to_string(),
            lat: 30.0,
            lng: -97.0,
            category: "bar".to_string(),
            pro_tips: vec![],
            staging_name: None,
            staging_lat: None,
            staging_lng: None,
            staging_tips: None,
            place_id: None,
            is_open_now: None,
            distance_miles: None,
            drive_minutes: None,
            distance_source: DistanceSource::EnrichmentFailed,
        };
        assert_eq!(venue.distance_source, DistanceSource::EnrichmentFailed);
        assert!(venue.place_id.is_none());
    }
}
