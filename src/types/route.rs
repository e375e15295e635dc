use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::geo::GeoPoint;

text_enum! {
    pub enum RouteSource {
        GoogleMaps => "google_maps",
        OpenRoute => "openroute",
        Estimated => "estimated",
    }
}

/// A computed route between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_min: u32,
    pub source: RouteSource,
    pub waypoints: Vec<GeoPoint>,
    pub polyline: Option<String>,
}

text_enum! {
    pub enum RouteStatus {
        Active => "active",
        Completed => "completed",
    }
}

/// The route assigned to a donor for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorRoute {
    pub request_id: String,
    pub donor_id: String,
    pub hospital_id: String,
    pub plan: RouteEstimate,
    /// Duration of the first plan. Reroutes never change it; delay
    /// detection compares against it.
    pub planned_duration_min: u32,
    pub status: RouteStatus,
    pub created_at: DateTime<Utc>,
    pub estimated_arrival: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub backup_triggered_at: Option<DateTime<Utc>>,
}

text_enum! {
    pub enum TrackingStatus {
        Tracking => "tracking",
        Arrived => "arrived",
    }
}

/// A position report from the donor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

/// Live tracking state for a donor en route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorTracking {
    pub request_id: String,
    pub donor_id: String,
    pub status: TrackingStatus,
    pub started_at: DateTime<Utc>,
    pub last_location: Option<LocationFix>,
    pub remaining_distance_km: Option<f64>,
    pub estimated_remaining_min: Option<u32>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}
