//! Domain records shared by the store and the agents.
//!
//! Every status-like field is a closed enum that persists as a lowercase
//! text tag. The [`text_enum!`] macro generates the serde mapping together
//! with `as_str`, `Display` and `FromStr`, so a value written by the store
//! always reads back as the same variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declare a closed enum whose variants map one-to-one onto text tags.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::types::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err($crate::types::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

pub mod blood;
pub mod donor;
pub mod emergency;
pub mod hospital;
pub mod notification;
pub mod route;
pub mod transfer;

pub use blood::{BloodGroup, Inventory, InventoryShape};
pub use donor::Donor;
pub use emergency::{
    AlertStatus, EmergencyCase, EmergencySource, EmergencyStatus, HospitalAlert, Severity,
};
pub use hospital::{Hospital, HospitalStatus};
pub use notification::{
    DonorResponse, Notification, NotificationKind, NotificationStatus, Priority,
};
pub use route::{
    DonorRoute, DonorTracking, LocationFix, RouteEstimate, RouteSource, RouteStatus,
    TrackingStatus,
};
pub use transfer::{AdminNotice, TransferRequest, TransferStatus};

/// A text tag did not match any variant of the named enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// One row of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub agent: String,
    pub action: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub details: serde_json::Value,
}

/// Fresh random identifier for a persisted record.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
