use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::blood::BloodGroup;
use super::text_enum;
use crate::geo::GeoPoint;

text_enum! {
    /// Ordered from least to most severe.
    pub enum Severity {
        Low => "low",
        Moderate => "moderate",
        High => "high",
        Critical => "critical",
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::High
    }
}

text_enum! {
    /// Where an emergency signal came from.
    pub enum EmergencySource {
        Manual => "manual",
        HospitalAlert => "hospital_alert",
        RareBloodRequest => "rare_blood_request",
        EventFeed => "event_feed",
    }
}

text_enum! {
    pub enum EmergencyStatus {
        Active => "active",
        Resolved => "resolved",
    }
}

/// Persisted record of one handled emergency. Only `status` changes after
/// insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyCase {
    pub id: String,
    pub hospital_id: Option<String>,
    pub blood_group: BloodGroup,
    pub units_needed: u32,
    pub location: GeoPoint,
    pub severity: Severity,
    pub source: EmergencySource,
    pub description: Option<String>,
    pub search_radius_km: f64,
    pub donors_contacted: usize,
    pub total_donors_found: usize,
    pub status: EmergencyStatus,
    pub created_at: DateTime<Utc>,
}

text_enum! {
    pub enum AlertStatus {
        Active => "active",
        Handled => "handled",
    }
}

/// An emergency raised by a hospital itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalAlert {
    pub id: String,
    pub hospital_id: String,
    pub blood_group: BloodGroup,
    pub units_needed: u32,
    pub location: Option<GeoPoint>,
    pub severity: Severity,
    pub description: Option<String>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}
