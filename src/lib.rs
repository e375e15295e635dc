//! # bloodlink
//!
//! Multi-agent orchestration core for inter-hospital blood logistics.
//!
//! Four cooperating agents share one persistent store and are sequenced by
//! the [`Orchestrator`]:
//!
//! - **AutoPulse** ([`agents::monitor`]) compares hospital stock against
//!   per-group thresholds and contacts the nearest eligible donors.
//! - **LinkBridge** ([`agents::broker`]) searches nearby hospitals for surplus
//!   stock and brokers atomic inter-hospital transfers.
//! - **RapidAid** ([`agents::responder`]) handles emergencies, contacting every
//!   eligible donor inside a severity-scaled radius.
//! - **PathFinder** ([`agents::planner`]) plans donor routes, tracks live
//!   positions and reacts to delays.
//!
//! Side effects that must not be duplicated (donor notifications, pending
//! transfer requests, stock moves) are enforced by the store with unique
//! constraints and conditional updates rather than check-then-act reads.

pub mod agents;
pub mod clock;
pub mod config;
pub mod error;
pub mod explain;
pub mod geo;
pub mod orchestrator;
pub mod outreach;
pub mod routing;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod templates;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Policy, Settings};
pub use error::CoordinationError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, WorkflowOutcome, WorkflowReport};
pub use store::{SqliteStore, Store};
pub use types::BloodGroup;

/// Library version reported by the HTTP surface.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
