//! External incident signals and their classification.
//!
//! Incidents come from a pluggable [`IncidentFeed`]. An [`IncidentClassifier`]
//! turns the free-text report into an incident type, a likely blood group,
//! a casualty estimate and a confidence. Severity and the unit estimate are
//! derived from that classification by pure functions.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::types::{text_enum, BloodGroup, Severity};

text_enum! {
    pub enum IncidentType {
        Accident => "accident",
        MassCasualty => "mass_casualty",
        Disaster => "disaster",
        Outbreak => "outbreak",
        Other => "other",
    }
}

/// A raw report from an external event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: Option<GeoPoint>,
    /// Hospital the report names, if any.
    pub hospital_id: Option<String>,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentClassification {
    pub incident_type: IncidentType,
    pub blood_group: Option<BloodGroup>,
    pub casualties: u32,
    /// In `[0, 1]`.
    pub confidence: f64,
}

#[async_trait]
pub trait IncidentFeed: Send + Sync + fmt::Debug {
    async fn poll(&self) -> anyhow::Result<Vec<Incident>>;
}

#[async_trait]
pub trait IncidentClassifier: Send + Sync + fmt::Debug {
    async fn classify(&self, incident: &Incident) -> anyhow::Result<IncidentClassification>;
}

/// Severity tier from casualty count and classifier confidence.
pub fn classify_severity(casualties: u32, confidence: f64) -> Severity {
    if casualties >= 50 || confidence > 0.9 {
        Severity::Critical
    } else if casualties >= 10 || confidence > 0.75 {
        Severity::High
    } else if casualties >= 3 || confidence > 0.5 {
        Severity::Moderate
    } else {
        Severity::Low
    }
}

/// Blood units to request for an incident.
pub fn estimate_units(
    casualties: u32,
    severity: Severity,
    incident_type: IncidentType,
    blood_group: BloodGroup,
) -> u32 {
    let casualties = f64::from(casualties);
    let mut units = (casualties * 1.5).round().max(1.0);
    if severity == Severity::Critical {
        units = units.max((casualties * 2.0).round());
    }
    if severity == Severity::Critical
        || matches!(incident_type, IncidentType::MassCasualty | IncidentType::Disaster)
    {
        units = units.max(20.0);
    }
    if blood_group.is_rare() {
        units = (units * 1.25).round();
    }
    units.min(f64::from(u32::MAX)) as u32
}

/// Classifier driven by keyword and number matching in the report text.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    fn incident_type(text: &str) -> (IncidentType, f64) {
        const RULES: &[(&[&str], IncidentType, f64)] = &[
            (&["mass casualty", "stampede", "explosion", "blast"], IncidentType::MassCasualty, 0.85),
            (&["earthquake", "flood", "cyclone", "landslide", "collapse"], IncidentType::Disaster, 0.8),
            (&["accident", "crash", "collision", "derail"], IncidentType::Accident, 0.7),
            (&["outbreak", "dengue", "epidemic"], IncidentType::Outbreak, 0.6),
        ];
        for (keywords, kind, confidence) in RULES {
            if keywords.iter().any(|k| text.contains(k)) {
                return (*kind, *confidence);
            }
        }
        (IncidentType::Other, 0.3)
    }

    /// First number directly followed by a casualty word.
    fn casualties(text: &str) -> u32 {
        const WORDS: &[&str] = &["injured", "casualties", "dead", "hurt", "victims", "people"];
        let tokens: Vec<&str> = text.split_whitespace().collect();
        tokens
            .windows(2)
            .find_map(|pair| {
                let word = pair[1].trim_matches(|c: char| !c.is_alphanumeric());
                if !WORDS.contains(&word) {
                    return None;
                }
                pair[0]
                    .trim_matches(|c: char| !c.is_ascii_digit())
                    .parse::<u32>()
                    .ok()
            })
            .unwrap_or(0)
    }

    fn blood_group(text: &str) -> Option<BloodGroup> {
        let upper = text.to_uppercase();
        // Longest labels first so "AB-" is not read as "B-".
        let mut labels = BloodGroup::ALL;
        labels.sort_by_key(|g| std::cmp::Reverse(g.as_str().len()));
        upper.split_whitespace().find_map(|token| {
            let token = token.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '-'));
            labels.iter().copied().find(|g| token == g.as_str())
        })
    }
}

#[async_trait]
impl IncidentClassifier for KeywordClassifier {
    async fn classify(&self, incident: &Incident) -> anyhow::Result<IncidentClassification> {
        let text = format!("{} {}", incident.title, incident.description).to_lowercase();
        let (incident_type, confidence) = Self::incident_type(&text);
        Ok(IncidentClassification {
            incident_type,
            blood_group: Self::blood_group(&format!("{} {}", incident.title, incident.description)),
            casualties: Self::casualties(&text),
            confidence,
        })
    }
}
