use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::blood::BloodGroup;
use super::{new_id, text_enum};

text_enum! {
    pub enum TransferStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

/// A proposed stock movement between two hospitals.
///
/// `from_hospital_id` is the hospital that asked for blood and
/// `to_hospital_id` the one asked to provide it; acceptance moves units
/// from `to` into `from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: String,
    pub from_hospital_id: String,
    pub to_hospital_id: String,
    pub blood_group: BloodGroup,
    pub units: u32,
    pub status: TransferStatus,
    pub origin: String,
    pub created_at: DateTime<Utc>,
    pub response_message: Option<String>,
    pub response_time: Option<DateTime<Utc>>,
}

impl TransferRequest {
    pub fn new(
        from_hospital_id: impl Into<String>,
        to_hospital_id: impl Into<String>,
        blood_group: BloodGroup,
        units: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            from_hospital_id: from_hospital_id.into(),
            to_hospital_id: to_hospital_id.into(),
            blood_group,
            units,
            status: TransferStatus::Pending,
            origin: "linkbridge_auto".to_string(),
            created_at,
            response_message: None,
            response_time: None,
        }
    }
}

/// Notice shown to a hospital administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminNotice {
    pub id: String,
    pub hospital_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}
