//! Google Routes — traffic-aware origin→venue routing (§4.H step 4).

use tokio_util::sync::CancellationToken;
use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

const METERS_PER_MILE: f64 = 1609.344;

#[derive(Debug, Clone, Copy)]
pub struct RouteResult {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub traffic_delay_seconds: f64,
}

impl RouteResult {
    pub fn distance_miles(&self) -> f64 {
        self.distance_meters / METERS_PER_MILE
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_seconds / 60.0
    }
}

#[derive(serde::Deserialize)]
struct ApiRoute {
    #[serde(rename = "distanceMeters")]
    distance_meters: f64,
    duration: String,
    #[serde(rename = "staticDuration")]
    static_duration: Option<String>,
}

#[derive(serde::Deserialize, Default)]
struct ApiResponse {
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

pub struct RoutesClient {
    api_key: String,
    client: reqwest::Client,
}

impl RoutesClient {
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    pub async fn route_with_traffic(
        &self,
        origin_lat: f64,
        origin_lng: f64,
        dest_lat: f64,
        dest_lng: f64,
        cancel: &CancellationToken,
    ) -> Result<RouteResult, ClassifiedError> {
        let body = serde_json::json!({
            "origin": {"location": {"latLng": {"latitude": origin_lat, "longitude": origin_lng}}},
            "destination": {"location": {"latLng": {"latitude": dest_lat, "longitude": dest_lng}}},
            "travelMode": "DRIVE",
            "routingPreference": "TRAFFIC_AWARE",
        });

        let send = self
            .client
            .post("https://routes.googleapis.com/directions/v2:computeRoutes")
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", "routes.distanceMeters,routes.duration,routes.staticDuration")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("google_routes")),
            result = send => result.map_err(|e| classify_reqwest(&e))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status), message: &text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("routes API error {status}: {text}")).with_provider("google_routes"));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid routes response: {e}")).with_provider("google_routes"))?;

        let route = parsed
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| ClassifiedError::new(ErrorKind::Server, "routes API returned no routes").with_provider("google_routes"))?;

        let duration_seconds = parse_duration_seconds(&route.duration)?;
        let static_seconds = route.static_duration.as_deref().map(parse_duration_seconds).transpose()?.unwrap_or(duration_seconds);
        let traffic_delay_seconds = (duration_seconds - static_seconds).max(0.0);

        Ok(RouteResult { distance_meters: route.distance_meters, duration_seconds, traffic_delay_seconds })
    }
}

/// Routes API durations arrive as `"123s"`.
fn parse_duration_seconds(raw: &str) -> Result<f64, ClassifiedError> {
    raw.strip_suffix('s')
        .and_then(|digits| digits.parse::<f64>().ok())
        .ok_or_else(|| ClassifiedError::new(ErrorKind::Unknown, format!("unparseable route duration: {raw}")).with_provider("google_routes"))
}

fn classify_reqwest(err: &reqwest::Error) -> ClassifiedError {
    let input = ClassifyInput {
        http_status: err.status().map(|s| s.as_u16()),
        message: &err.to_string(),
        was_cancelled: false,
        explicit_tag: if err.is_timeout() { Some("timeout") } else { None },
    };
    ClassifiedError::new(classify(&input), err.to_string()).with_provider("google_routes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_suffix() {
        assert_eq!(parse_duration_seconds("930s").unwrap(), 930.0);
    }

    #[test]
    fn rejects_malformed_duration() {
        assert!(parse_duration_seconds("15min").is_err());
    }

    #[test]
    fn converts_to_miles_and_minutes() {
        let result = RouteResult { distance_meters: 16093.44, duration_seconds: 900.0, traffic_delay_seconds: 120.0 };
        assert!((result.distance_miles() - 10.0).abs() < 1e-6);
        assert!((result.duration_minutes() - 15.0).abs() < 1e-6);
    }
}
