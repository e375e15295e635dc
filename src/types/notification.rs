use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::blood::BloodGroup;
use super::text_enum;

text_enum! {
    /// Which agent path created the notification.
    pub enum NotificationKind {
        /// Low-stock outreach from the inventory monitor.
        BloodRequest => "blood_request",
        /// Emergency outreach from the responder.
        EmergencyRequest => "emergency_request",
    }
}

text_enum! {
    pub enum Priority {
        High => "high",
        Critical => "critical",
    }
}

impl Priority {
    pub fn for_group(group: BloodGroup) -> Self {
        if group.is_rare() {
            Priority::Critical
        } else {
            Priority::High
        }
    }
}

text_enum! {
    pub enum NotificationStatus {
        Pending => "pending",
        Responded => "responded",
    }
}

text_enum! {
    pub enum DonorResponse {
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

/// An outreach notification addressed to one donor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    /// Correlates the donor's reply, route and tracking with this outreach.
    pub request_id: String,
    pub kind: NotificationKind,
    pub donor_id: String,
    pub hospital_id: Option<String>,
    pub blood_group: BloodGroup,
    pub units_needed: u32,
    pub priority: Priority,
    pub distance_km: f64,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub status: NotificationStatus,
    pub response: Option<DonorResponse>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_open(&self) -> bool {
        !self.read && self.status == NotificationStatus::Pending
    }
}
