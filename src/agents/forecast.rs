//! Shortage prediction.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Policy;
use crate::types::{BloodGroup, Hospital};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortagePrediction {
    pub hospital_id: String,
    pub hospital_name: String,
    pub blood_group: BloodGroup,
    pub current: u32,
    pub threshold: u32,
    pub predicted_date: DateTime<Utc>,
    pub confidence: f64,
    pub units_needed: u32,
}

/// Pluggable shortage heuristic.
pub trait ShortageEstimator: Send + Sync + fmt::Debug {
    fn predict(&self, hospital: &Hospital, policy: &Policy, now: DateTime<Utc>) -> Vec<ShortagePrediction>;
}

/// Projects stock near its threshold forward at a constant daily usage.
///
/// A group is flagged when its stock is under 1.5x the threshold and would
/// reach the threshold within the prediction horizon.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdTrendEstimator;

impl ShortageEstimator for ThresholdTrendEstimator {
    fn predict(&self, hospital: &Hospital, policy: &Policy, now: DateTime<Utc>) -> Vec<ShortagePrediction> {
        let rate = policy.daily_usage_rate;
        if rate <= 0.0 {
            return Vec::new();
        }
        let horizon = policy.prediction_horizon_days as f64;
        let inventory = hospital.inventory();

        BloodGroup::ALL
            .into_iter()
            .filter_map(|group| {
                let current = inventory.get(group);
                let threshold = policy.threshold(group);
                if f64::from(current) >= f64::from(threshold) * 1.5 {
                    return None;
                }
                let days = ((f64::from(current) - f64::from(threshold)) / rate).max(0.0);
                if days > horizon {
                    return None;
                }
                let confidence = (0.5 + (horizon - days) / horizon * 0.4).min(0.9);
                Some(ShortagePrediction {
                    hospital_id: hospital.id.clone(),
                    hospital_name: hospital.name.clone(),
                    blood_group: group,
                    current,
                    threshold,
                    predicted_date: now + Duration::seconds((days * 86_400.0) as i64),
                    confidence,
                    units_needed: threshold.saturating_sub(current).max(1),
                })
            })
            .collect()
    }
}
