//! TomTom incidents+flow — feeds the briefing stage's traffic summary
//! (§4.H is venue enrichment proper; this is the `briefing_events` sibling
//! the egress contract in §6 groups alongside it).

use tokio_util::sync::CancellationToken;
use triad_errors::{classify, ClassifiedError, ClassifyInput, ErrorKind};

#[derive(Debug, Clone)]
pub struct TrafficIncident {
    pub category: String,
    pub magnitude: String,
    pub delay_seconds: Option<f64>,
    pub road: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowSegment {
    pub current_speed_kmh: f64,
    pub free_flow_speed_kmh: f64,
}

impl FlowSegment {
    /// 1.0 means free-flowing; lower means more congested.
    pub fn congestion_ratio(&self) -> f64 {
        if self.free_flow_speed_kmh <= 0.0 {
            1.0
        } else {
            (self.current_speed_kmh / self.free_flow_speed_kmh).clamp(0.0, 1.0)
        }
    }
}

#[derive(serde::Deserialize)]
struct IncidentProperties {
    #[serde(rename = "iconCategory")]
    icon_category: Option<serde_json::Value>,
    magnitude: Option<serde_json::Value>,
    #[serde(rename = "delay")]
    delay: Option<f64>,
    #[serde(rename = "roadNumbers", default)]
    road_numbers: Vec<String>,
}

#[derive(serde::Deserialize)]
struct IncidentFeature {
    properties: IncidentProperties,
}

#[derive(serde::Deserialize, Default)]
struct IncidentsResponse {
    #[serde(default)]
    incidents: Vec<IncidentFeature>,
}

#[derive(serde::Deserialize)]
struct FlowSegmentData {
    #[serde(rename = "currentSpeed")]
    current_speed: f64,
    #[serde(rename = "freeFlowSpeed")]
    free_flow_speed: f64,
}

#[derive(serde::Deserialize)]
struct FlowResponse {
    #[serde(rename = "flowSegmentData")]
    flow_segment_data: FlowSegmentData,
}

pub struct TomTomClient {
    api_key: String,
    client: reqwest::Client,
}

impl TomTomClient {
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    pub async fn incidents_in_bbox(
        &self,
        min_lat: f64,
        min_lng: f64,
        max_lat: f64,
        max_lng: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<TrafficIncident>, ClassifiedError> {
        let bbox = format!("{min_lng},{min_lat},{max_lng},{max_lat}");
        let send = self
            .client
            .get("https://api.tomtom.com/traffic/services/5/incidentDetails")
            .query(&[("bbox", bbox.as_str()), ("key", self.api_key.as_str()), ("fields", "{incidents{properties{iconCategory,magnitude,delay,roadNumbers}}}")])
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("tomtom")),
            result = send => result.map_err(|e| classify_reqwest(&e))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status), message: &text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("tomtom incidents error {status}: {text}")).with_provider("tomtom"));
        }

        let parsed: IncidentsResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid tomtom incidents response: {e}")).with_provider("tomtom"))?;

        Ok(parsed
            .incidents
            .into_iter()
            .map(|f| TrafficIncident {
                category: f.properties.icon_category.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string()),
                magnitude: f.properties.magnitude.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string()),
                delay_seconds: f.properties.delay,
                road: f.properties.road_numbers.into_iter().next(),
            })
            .collect())
    }

    pub async fn flow_at_point(&self, lat: f64, lng: f64, cancel: &CancellationToken) -> Result<FlowSegment, ClassifiedError> {
        let point = format!("{lat},{lng}");
        let send = self
            .client
            .get("https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json")
            .query(&[("point", point.as_str()), ("key", self.api_key.as_str())])
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::new(ErrorKind::Aborted, "cancelled before response").with_provider("tomtom")),
            result = send => result.map_err(|e| classify_reqwest(&e))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let kind = classify(&ClassifyInput { http_status: Some(status), message: &text, ..Default::default() });
            return Err(ClassifiedError::new(kind, format!("tomtom flow error {status}: {text}")).with_provider("tomtom"));
        }

        let parsed: FlowResponse = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, format!("invalid tomtom flow response: {e}")).with_provider("tomtom"))?;

        Ok(FlowSegment { current_speed_kmh: parsed.flow_segment_data.current_speed, free_flow_speed_kmh: parsed.flow_segment_data.free_flow_speed })
    }
}

fn classify_reqwest(err: &reqwest::Error) -> ClassifiedError {
    let input = ClassifyInput {
        http_status: err.status().map(|s| s.as_u16()),
        message: &err.to_string(),
        was_cancelled: false,
        explicit_tag: if err.is_timeout() { Some("timeout") } else { None },
    };
    ClassifiedError::new(classify(&input), err.to_string()).with_provider("tomtom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_ratio_clamps_to_unit_interval() {
        let flowing = FlowSegment { current_speed_kmh: 60.0, free_flow_speed_kmh: 60.0 };
        assert_eq!(flowing.congestion_ratio(), 1.0);

        let jammed = FlowSegment { current_speed_kmh: 5.0, free_flow_speed_kmh: 60.0 };
        assert!(jammed.congestion_ratio() < 0.1);
    }

    #[test]
    fn zero_free_flow_speed_does_not_divide_by_zero() {
        let segment = FlowSegment { current_speed_kmh: 20.0, free_flow_speed_kmh: 0.0 };
        assert_eq!(segment.congestion_ratio(), 1.0);
    }
}
