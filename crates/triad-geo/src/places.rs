//! Google Places Nearby (New) — §4.H step 2: find the venue's place_id,
//! display name, business status, and opening-hours descriptions, plus a
//! name-similarity score against the planner's proposal.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

const NEARBY_RADIUS_METERS: f64 = 20.0;

#[derive(Debug, Clone)]
pub struct PlaceMatch {
    pub place_id: String,
    pub display_name: String,
    pub business_status: Option<String>,
    pub regular_opening_hours: Vec<String>,
    pub current_opening_hours: Vec<String>,
    pub lat: f64,
    pub lng: f64,
    /// Word-overlap Jaccard similarity between the planner's proposed name
    /// and the resolved name (§4.H step 2). Logged, never filters.
    pub name_similarity: f64,
}

#[derive(serde::Deserialize)]
struct ApiDisplayName {
    text: String,
}

#[derive(serde::Deserialize)]
struct ApiLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(serde::Deserialize)]
struct ApiOpeningHours {
    #[serde(rename = "weekdayDescriptions", default)]
    weekday_descriptions: Vec<String>,
}

#[derive(serde::Deserialize)]
struct ApiPlace {
    id: String,
    #[serde(rename = "displayName")]
    display_name: ApiDisplayName,
    #[serde(rename = "businessStatus")]
    business_status: Option<String>,
    #[serde(rename = "regularOpeningHours")]
    regular_opening_hours: Option<ApiOpeningHours>,
    #[serde(rename = "currentOpeningHours")]
    current_opening_hours: Option<ApiOpeningHours>,
    location: ApiLocation,
}

#[derive(serde::Deserialize, Default)]
struct ApiResponse {
    #[serde(default)]
    places: Vec<ApiPlace>,
}

pub struct PlacesClient {
    api_key: String,
    client: reqwest::Client,
}

impl PlacesClient {
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    /// Nearby search ranked by distance, then picks the closest result.
    pub async fn find_nearby(&self, lat: f64, lng: f64, proposed_name: &str, cancel: &CancellationToken) -> Result<Option<PlaceMatch>, ClassifiedError> {
        let body = serde_json::json!({
            "locationRestriction": {
                "circle": {
                    "center": {"latitude": lat, "longitude": lng},
                    "radius": NEARBY_RADIUS_METERS,
                }
            },
            "rankPreference": "DISTANCE",
        });

        let send = self
            .client
            .post("https://places.googleapis.com/v1/places:searchNearby")
            .header("X-Goog-Api-Key", &self.api_key)
            .header(
                "X-Goog-FieldMask",
                "places.id,places.displayName,places.businessStatus,places.regularOpeningHours,places.currentOpeningHours,places.location",
            )
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("google_places")),
            result = send => result.map_err(|e| classify_reqwest(&e))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status), message: &text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("places API error {status}: {text}")).with_provider("google_places"));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid places response: {e}")).with_provider("google_places"))?;

        let Some(place) = parsed.places.into_iter().next() else {
            return Ok(None);
        };

        let similarity = name_similarity(proposed_name, &place.display_name.text);
        if similarity < 0.3 {
            tracing::warn!(proposed = %proposed_name, resolved = %place.display_name.text, similarity, "venue name mismatch, accepting anyway");
        }

        Ok(Some(PlaceMatch {
            place_id: place.id,
            display_name: place.display_name.text,
            business_status: place.business_status,
            regular_opening_hours: place.regular_opening_hours.map(|h| h.weekday_descriptions).unwrap_or_default(),
            current_opening_hours: place.current_opening_hours.map(|h| h.weekday_descriptions).unwrap_or_default(),
            lat: place.location.latitude,
            lng: place.location.longitude,
            name_similarity: similarity,
        }))
    }
}

/// Word-overlap Jaccard similarity, case-insensitive.
fn name_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn classify_reqwest(err: &reqwest::Error) -> ClassifiedError {
    let input = ClassifyInput {
        http_status: err.status().map(|s| s.as_u16()),
        message: &err.to_string(),
        was_cancelled: false,
        explicit_tag: if err.is_timeout() { Some("timeout") } else { None },
    };
    ClassifiedError::new(classify(&input), err.to_string()).with_provider("google_places")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_score_one() {
        assert_eq!(name_similarity("The Star Bar", "the star bar"), 1.0);
    }

    #[test]
    fn disjoint_names_score_zero() {
        assert_eq!(name_similarity("Coffee Shop", "Gas Station"), 0.0);
    }

    #[test]
    fn partial_overlap_is_fractional() {
        let score = name_similarity("Whataburger Airport Blvd", "Whataburger");
        assert!(score > 0.0 && score < 1.0);
    }
}
