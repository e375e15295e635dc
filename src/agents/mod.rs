//! The four coordination agents.
//!
//! Agents share nothing in memory. Each one receives an [`AgentContext`] with
//! the store handle, the clock, the policy and the outreach dispatcher at
//! construction time, and returns typed outcomes the orchestrator inspects.

pub mod broker;
pub mod forecast;
pub mod incidents;
pub mod monitor;
pub mod planner;
pub mod responder;

pub use broker::{RequestCreation, StockOption, SweepReport, TransferBroker, TransferOutcome};
pub use forecast::{ShortageEstimator, ShortagePrediction, ThresholdTrendEstimator};
pub use incidents::{
    Incident, IncidentClassification, IncidentClassifier, IncidentFeed, IncidentType,
    KeywordClassifier,
};
pub use monitor::{DeficitEvent, HospitalScan, InventoryMonitor};
pub use planner::{LocationUpdate, RoutePlanner, RouteRefresh};
pub use responder::{
    EmergencyResponder, HandledCase, ManualEmergency, ResponderReport, SkippedSignal,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::config::Policy;
use crate::error::CoordinationError;
use crate::outreach::Outreach;
use crate::store::Store;
use crate::templates::Templates;
use crate::types::{text_enum, AuditEntry, BloodGroup, Priority};

text_enum! {
    /// Agent names as written to the audit log.
    pub enum AgentKind {
        AutoPulse => "autopulse",
        LinkBridge => "linkbridge",
        RapidAid => "rapidaid",
        PathFinder => "pathfinder",
        Orchestrator => "orchestrator",
    }
}

/// Collaborators shared by every agent.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub policy: Arc<Policy>,
    pub outreach: Arc<Outreach>,
    pub templates: Arc<Templates>,
}

impl AgentContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Append an audit entry. A failed write is logged and otherwise ignored.
    pub fn audit(&self, agent: AgentKind, action: &str, details: Value) {
        let entry = AuditEntry {
            agent: agent.as_str().to_string(),
            action: action.to_string(),
            timestamp: self.now(),
            details,
        };
        if let Err(e) = self.store.log_action(&entry) {
            log::error!("[{}] audit write for {} failed: {}", agent, action, e);
        }
    }
}

/// Outcome of one donor-contact pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSummary {
    pub hospital_id: String,
    pub blood_group: BloodGroup,
    pub units_requested: u32,
    pub priority: Priority,
    /// Eligible donors considered after ranking.
    pub candidates: usize,
    /// Donors that received a new notification.
    pub contacted: Vec<String>,
    /// Donors skipped because an open notification already existed.
    pub skipped_duplicates: usize,
}

/// "Contact nearby donors" capability used as a fallback by the broker and
/// the route planner.
#[async_trait]
pub trait DonorContact: Send + Sync + std::fmt::Debug {
    async fn contact_nearby_donors(
        &self,
        hospital_id: &str,
        blood_group: BloodGroup,
        units_needed: u32,
    ) -> Result<ContactSummary, CoordinationError>;
}
