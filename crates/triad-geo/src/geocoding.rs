//! Google Geocoding — reverse geocode only (§4.H step 1); forward geocoding
//! is out of scope here since the core never receives a bare address.

use tokio_util::sync::CancellationToken;
use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReverseGeocodeResult {
    pub formatted_address: String,
    pub place_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct GeocodeComponent {
    #[allow(dead_code)]
    long_name: String,
}

#[derive(serde::Deserialize)]
struct GeocodeEntry {
    formatted_address: String,
    place_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    address_components: Vec<GeocodeComponent>,
}

#[derive(serde::Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeEntry>,
}

pub struct GeocodingClient {
    api_key: String,
    client: reqwest::Client,
}

impl GeocodingClient {
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    /// Reverse-geocodes `(lat, lng)`. Prefers the first result whose
    /// formatted address is not Plus-Code-shaped (§4.H step 1): a Plus
    /// Code reads as `<4 alnum>+<2-3 alnum>` at the start of the string,
    /// e.g. "8Q7X+2F", which is useless to a driver reading a screen.
    pub async fn reverse_geocode(&self, lat: f64, lng: f64, cancel: &CancellationToken) -> Result<ReverseGeocodeResult, ClassifiedError> {
        let send = self
            .client
            .get("https://maps.googleapis.com/maps/api/geocode/json")
            .query(&[("latlng", format!("{lat},{lng}")), ("key", self.api_key.clone())])
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("google_geocoding")),
            result = send => result.map_err(|e| classify_reqwest(&e))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status), message: &body, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("geocoding API error {status}: {body}")).with_provider("google_geocoding"));
        }

        let parsed: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid geocoding response: {e}")).with_provider("google_geocoding"))?;

        if parsed.status != "OK" {
            return Err(ClassifiedError::new(ErrorKind::Server, format!("geocoding status: {}", parsed.status)).with_provider("google_geocoding"));
        }

        let chosen = parsed
            .results
            .iter()
            .find(|r| !is_plus_code_shaped(&r.formatted_address))
            .or_else(|| parsed.results.first())
            .ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "geocoding returned no results").with_provider("google_geocoding"))?;

        Ok(ReverseGeocodeResult { formatted_address: chosen.formatted_address.clone(), place_id: chosen.place_id.clone() })
    }
}

fn is_plus_code_shaped(address: &str) -> bool {
    let Some(plus_idx) = address.find('+') else { return false };
    if plus_idx < 4 {
        return false;
    }
    let prefix = &address[..plus_idx];
    let suffix_start = plus_idx + 1;
    let suffix_end = address[suffix_start..].find(|c: char| !c.is_ascii_alphanumeric()).map(|i| suffix_start + i).unwrap_or(address.len());
    let suffix = &address[suffix_start..suffix_end];
    prefix.len() >= 4 && prefix.chars().all(|c| c.is_ascii_alphanumeric()) && (2..=3).contains(&suffix.len())
}

fn classify_reqwest(err: &reqwest::Error) -> ClassifiedError {
    let input = ClassifyInput {
        http_status: err.status().map(|s| s.as_u16()),
        message: &err.to_string(),
        was_cancelled: false,
        explicit_tag: if err.is_timeout() { Some("timeout") } else { None },
    };
    ClassifiedError::new(classify(&input), err.to_string()).with_provider("google_geocoding")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plus_code_prefix() {
        assert!(is_plus_code_shaped("8Q7X+2F Dallas, TX"));
        assert!(!is_plus_code_shaped("123 Main St, Dallas, TX"));
    }

    #[test]
    fn short_prefix_is_not_a_plus_code() {
        assert!(!is_plus_code_shaped("I+94 Exit 5"));
    }
}
