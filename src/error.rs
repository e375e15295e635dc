//! Error taxonomy shared by the store, the agents and the orchestrator.

use thiserror::Error;

use crate::types::{BloodGroup, UnknownVariant};

/// Errors raised while coordinating a workflow step.
///
/// The orchestrator never lets one of these escape to its caller; every
/// variant is folded into a structured failure by
/// [`crate::orchestrator::WorkflowOutcome::failed`].
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// A hospital, donor, request or route does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The providing hospital no longer holds enough units.
    #[error("insufficient {blood_group} stock at hospital {hospital_id}: {requested} units requested")]
    InsufficientStock {
        hospital_id: String,
        blood_group: BloodGroup,
        requested: u32,
    },

    /// The request was already accepted or rejected.
    #[error("{entity} {id} was already processed")]
    AlreadyProcessed { entity: &'static str, id: String },

    /// The entity exists but is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The trigger payload was missing or carried an unusable value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external provider failed and no fallback applied.
    #[error("{provider} unavailable: {message}")]
    Upstream { provider: &'static str, message: String },

    /// The workflow exceeded its soft time limit.
    #[error("workflow timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// SQLite failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message template failed to render.
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    /// A persisted enum value was not recognised.
    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),
}

impl CoordinationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
