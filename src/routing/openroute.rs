//! OpenRouteService directions adapter.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::RouteProvider;
use crate::geo::{round2, GeoPoint};
use crate::types::{RouteEstimate, RouteSource};

const DIRECTIONS_URL: &str = "https://api.openrouteservice.org/v2/directions/driving-car";

#[derive(Debug, Clone)]
pub struct OpenRouteService {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouteService {
    pub fn new(api_key: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    pub(crate) fn parse(body: &Value) -> anyhow::Result<Option<RouteEstimate>> {
        if let Some(error) = body.get("error") {
            anyhow::bail!("openrouteservice error: {}", error);
        }
        let Some(route) = body.get("routes").and_then(|r| r.get(0)) else {
            return Ok(None);
        };
        let meters = route
            .pointer("/summary/distance")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let seconds = route
            .pointer("/summary/duration")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        Ok(Some(RouteEstimate {
            distance_km: round2(meters / 1000.0),
            duration_min: (seconds / 60.0).floor().max(0.0) as u32,
            source: RouteSource::OpenRoute,
            waypoints: Vec::new(),
            polyline: route.get("geometry").and_then(Value::as_str).map(str::to_string),
        }))
    }
}

#[async_trait]
impl RouteProvider for OpenRouteService {
    fn name(&self) -> &'static str {
        "openroute"
    }

    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> anyhow::Result<Option<RouteEstimate>> {
        // Coordinates are [longitude, latitude].
        let body = json!({
            "coordinates": [
                [origin.longitude, origin.latitude],
                [destination.longitude, destination.latitude],
            ]
        });
        let response = self
            .client
            .post(DIRECTIONS_URL)
            .header("authorization", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouteService HTTP {}: {}", status, text);
        }
        let body: Value = response.json().await?;
        Self::parse(&body)
    }
}
