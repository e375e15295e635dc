//! Google Directions API adapter.

use async_trait::async_trait;
use serde_json::Value;

use super::RouteProvider;
use crate::geo::{round2, GeoPoint};
use crate::types::{RouteEstimate, RouteSource};

const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

#[derive(Debug, Clone)]
pub struct GoogleDirections {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleDirections {
    pub fn new(api_key: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Extract the first leg of the first route.
    pub(crate) fn parse(body: &Value) -> anyhow::Result<Option<RouteEstimate>> {
        match body.get("status").and_then(Value::as_str) {
            Some("OK") => {}
            Some("ZERO_RESULTS") | Some("NOT_FOUND") => return Ok(None),
            Some(other) => anyhow::bail!("directions status {}", other),
            None => anyhow::bail!("directions response has no status"),
        }

        let Some(route) = body.get("routes").and_then(|r| r.get(0)) else {
            return Ok(None);
        };
        let Some(leg) = route.get("legs").and_then(|l| l.get(0)) else {
            return Ok(None);
        };

        let meters = leg
            .pointer("/distance/value")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("leg has no distance"))?;
        let seconds = leg
            .pointer("/duration/value")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("leg has no duration"))?;

        let waypoints = leg
            .get("steps")
            .and_then(Value::as_array)
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| {
                        let lat = s.pointer("/start_location/lat")?.as_f64()?;
                        let lng = s.pointer("/start_location/lng")?.as_f64()?;
                        Some(GeoPoint::new(lat, lng))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(RouteEstimate {
            distance_km: round2(meters / 1000.0),
            duration_min: (seconds / 60.0).floor().max(0.0) as u32,
            source: RouteSource::GoogleMaps,
            waypoints,
            polyline: route
                .pointer("/overview_polyline/points")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }
}

#[async_trait]
impl RouteProvider for GoogleDirections {
    fn name(&self) -> &'static str {
        "google_maps"
    }

    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> anyhow::Result<Option<RouteEstimate>> {
        let origin = format!("{},{}", origin.latitude, origin.longitude);
        let destination = format!("{},{}", destination.latitude, destination.longitude);
        let response = self
            .client
            .get(DIRECTIONS_URL)
            .query(&[
                ("origin", origin.as_str()),
                ("destination", destination.as_str()),
                ("mode", "driving"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Google Directions HTTP {}", status);
        }
        let body: Value = response.json().await?;
        Self::parse(&body)
    }
}
