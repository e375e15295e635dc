//! Trigger payloads accepted by the orchestrator.

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::types::{text_enum, BloodGroup, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowInventoryTrigger {
    pub hospital_id: String,
    pub blood_group: BloodGroup,
    pub units_needed: u32,
}

text_enum! {
    pub enum EmergencyMode {
        /// One explicitly described emergency.
        Manual => "manual",
        /// Scan every automatic signal source.
        Auto => "auto",
    }
}

impl Default for EmergencyMode {
    fn default() -> Self {
        EmergencyMode::Manual
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmergencyTrigger {
    #[serde(rename = "type", default)]
    pub mode: EmergencyMode,
    #[serde(default)]
    pub hospital_id: Option<String>,
    /// Required in manual mode.
    #[serde(default)]
    pub blood_group: Option<BloodGroup>,
    #[serde(default)]
    pub units_needed: Option<u32>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: Option<String>,
}

impl EmergencyTrigger {
    pub fn auto() -> Self {
        Self {
            mode: EmergencyMode::Auto,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorAcceptedTrigger {
    pub request_id: String,
    pub donor_id: String,
    /// Defaults to the hospital named on the originating notification.
    #[serde(default)]
    pub hospital_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorDeclinedTrigger {
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationTrigger {
    pub request_id: String,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalTrigger {
    pub request_id: String,
}

/// Body of a transfer accept or reject call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferDecision {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_trigger_defaults_to_manual() {
        let t: EmergencyTrigger =
            serde_json::from_str(r#"{"hospital_id":"h1","blood_group":"O-","units_needed":4}"#).unwrap();
        assert_eq!(t.mode, EmergencyMode::Manual);
        assert_eq!(t.blood_group, Some(BloodGroup::ONeg));
        assert_eq!(t.severity, None);

        let auto: EmergencyTrigger = serde_json::from_str(r#"{"type":"auto"}"#).unwrap();
        assert_eq!(auto.mode, EmergencyMode::Auto);
    }

    #[test]
    fn test_location_accepts_short_names() {
        let t: LocationTrigger = serde_json::from_str(r#"{"request_id":"r1","lat":12.9,"lon":77.6}"#).unwrap();
        assert_eq!(t.latitude, 12.9);
        assert_eq!(t.longitude, 77.6);
    }
}
