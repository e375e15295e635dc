//! Workflow outcomes.
//!
//! Every orchestrated workflow ends in exactly one [`WorkflowOutcome`]
//! variant, including failures, so callers match on a closed set instead
//! of probing loosely shaped maps.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::broker::TransferOutcome;
use crate::agents::planner::RouteRefresh;
use crate::agents::{
    ContactSummary, HandledCase, LocationUpdate, RequestCreation, ShortagePrediction,
    SkippedSignal, StockOption, SweepReport,
};
use crate::error::CoordinationError;
use crate::types::{text_enum, BloodGroup, DonorRoute, DonorTracking, TransferRequest};

text_enum! {
    /// Failure category reported to callers.
    pub enum FailureKind {
        NotFound => "not_found",
        InsufficientStock => "insufficient_stock",
        AlreadyProcessed => "already_processed",
        InvalidState => "invalid_state",
        InvalidInput => "invalid_input",
        Upstream => "upstream",
        Timeout => "timeout",
        Internal => "internal",
    }
}

impl From<&CoordinationError> for FailureKind {
    fn from(error: &CoordinationError) -> Self {
        match error {
            CoordinationError::NotFound { .. } => FailureKind::NotFound,
            CoordinationError::InsufficientStock { .. } => FailureKind::InsufficientStock,
            CoordinationError::AlreadyProcessed { .. } => FailureKind::AlreadyProcessed,
            CoordinationError::InvalidState(_) => FailureKind::InvalidState,
            CoordinationError::InvalidInput(_) => FailureKind::InvalidInput,
            CoordinationError::Upstream { .. } => FailureKind::Upstream,
            CoordinationError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Internal,
        }
    }
}

/// Nearby-stock search run on behalf of an emergency case or a predicted
/// shortage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCheck {
    pub hospital_id: String,
    pub blood_group: BloodGroup,
    pub units_needed: u32,
    pub has_stock_nearby: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TransferOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub hospital_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    TransferAvailable {
        hospital_id: String,
        blood_group: BloodGroup,
        units_needed: u32,
        options: Vec<StockOption>,
        recommended: StockOption,
        request: RequestCreation,
    },
    DonorSearchInitiated {
        hospitals_checked: usize,
        contact: ContactSummary,
    },
    EmergencyHandled {
        cases: Vec<HandledCase>,
        skipped: Vec<SkippedSignal>,
        stock_checks: Vec<StockCheck>,
    },
    RoutePlanned {
        route: DonorRoute,
    },
    LocationUpdated {
        update: LocationUpdate,
    },
    Arrived {
        tracking: DonorTracking,
    },
    DonorDeclined {
        request_id: String,
        donor_id: String,
    },
    TransferAccepted {
        request: TransferRequest,
    },
    TransferRejected {
        request: TransferRequest,
        fallback: Option<ContactSummary>,
    },
    InventoryScanned {
        hospitals_scanned: usize,
        deficits: usize,
        failures: Vec<ScanFailure>,
        /// One low-inventory outcome per deficit.
        results: Vec<WorkflowOutcome>,
    },
    StockSwept {
        report: SweepReport,
    },
    RoutesRefreshed {
        refresh: RouteRefresh,
    },
    ShortagesPrepared {
        predictions: Vec<ShortagePrediction>,
        stock_checks: Vec<StockCheck>,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

impl WorkflowOutcome {
    pub fn failed(error: &CoordinationError) -> Self {
        WorkflowOutcome::Failed {
            kind: FailureKind::from(error),
            error: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WorkflowOutcome::Failed { .. })
    }

    /// The serialized `action` tag.
    pub fn action(&self) -> &'static str {
        match self {
            WorkflowOutcome::TransferAvailable { .. } => "transfer_available",
            WorkflowOutcome::DonorSearchInitiated { .. } => "donor_search_initiated",
            WorkflowOutcome::EmergencyHandled { .. } => "emergency_handled",
            WorkflowOutcome::RoutePlanned { .. } => "route_planned",
            WorkflowOutcome::LocationUpdated { .. } => "location_updated",
            WorkflowOutcome::Arrived { .. } => "arrived",
            WorkflowOutcome::DonorDeclined { .. } => "donor_declined",
            WorkflowOutcome::TransferAccepted { .. } => "transfer_accepted",
            WorkflowOutcome::TransferRejected { .. } => "transfer_rejected",
            WorkflowOutcome::InventoryScanned { .. } => "inventory_scanned",
            WorkflowOutcome::StockSwept { .. } => "stock_swept",
            WorkflowOutcome::RoutesRefreshed { .. } => "routes_refreshed",
            WorkflowOutcome::ShortagesPrepared { .. } => "shortages_prepared",
            WorkflowOutcome::Failed { .. } => "failed",
        }
    }

    /// Flat fields used by the explanation template for this outcome.
    pub fn summary(&self) -> Value {
        match self {
            WorkflowOutcome::TransferAvailable {
                blood_group,
                units_needed,
                options,
                recommended,
                request,
                ..
            } => json!({
                "recommended_name": recommended.hospital_name,
                "available_units": recommended.available_units,
                "distance_km": recommended.distance_km,
                "blood_group": blood_group,
                "units": units_needed,
                "options": options.len(),
                "request_created": matches!(request, RequestCreation::Created { .. }),
            }),
            WorkflowOutcome::DonorSearchInitiated { contact, .. } => json!({
                "units": contact.units_requested,
                "blood_group": contact.blood_group,
                "contacted": contact.contacted.len(),
                "candidates": contact.candidates,
                "priority": contact.priority,
                "skipped": contact.skipped_duplicates,
            }),
            WorkflowOutcome::EmergencyHandled {
                cases,
                skipped,
                stock_checks,
            } => json!({
                "handled": cases.len(),
                "donors_contacted": cases.iter().map(|c| c.donors_contacted).sum::<usize>(),
                "stock_checks": stock_checks.len(),
                "stock_found": stock_checks.iter().filter(|c| c.has_stock_nearby).count(),
                "skipped": skipped.len(),
            }),
            WorkflowOutcome::RoutePlanned { route } => json!({
                "request_id": route.request_id,
                "distance_km": route.plan.distance_km,
                "duration_min": route.plan.duration_min,
                "source": route.plan.source,
                "eta": route.estimated_arrival.format("%H:%M UTC").to_string(),
            }),
            WorkflowOutcome::LocationUpdated { update } => json!({
                "request_id": update.request_id,
                "remaining_km": update.remaining_distance_km,
                "remaining_min": update.estimated_remaining_min,
                "delayed": update.delayed,
                "backup": update.backup_triggered,
            }),
            WorkflowOutcome::Arrived { tracking } => json!({
                "request_id": tracking.request_id,
                "arrived_at": tracking
                    .actual_arrival
                    .map(|t| t.format("%H:%M UTC").to_string())
                    .unwrap_or_else(|| "an unknown time".to_string()),
            }),
            WorkflowOutcome::DonorDeclined { request_id, .. } => json!({ "request_id": request_id }),
            WorkflowOutcome::TransferAccepted { request } => json!({
                "request_id": request.id,
                "units": request.units,
                "blood_group": request.blood_group,
                "provider": request.to_hospital_id,
                "requester": request.from_hospital_id,
            }),
            WorkflowOutcome::TransferRejected { request, fallback } => json!({
                "request_id": request.id,
                "units": request.units,
                "blood_group": request.blood_group,
                "fallback_contacted": fallback.as_ref().map_or(0, |f| f.contacted.len()),
            }),
            WorkflowOutcome::InventoryScanned {
                hospitals_scanned,
                deficits,
                failures,
                ..
            } => json!({
                "hospitals": hospitals_scanned,
                "deficits": deficits,
                "failures": failures.len(),
            }),
            WorkflowOutcome::StockSwept { report } => json!({
                "hospitals_scanned": report.hospitals_scanned,
                "deficits_checked": report.deficits_checked,
                "stock_found": report.stock_found,
            }),
            WorkflowOutcome::RoutesRefreshed { refresh } => json!({
                "checked": refresh.checked,
                "updated": refresh.updated,
            }),
            WorkflowOutcome::ShortagesPrepared {
                predictions,
                stock_checks,
            } => json!({
                "predictions": predictions.len(),
                "stock_found": stock_checks.iter().filter(|c| c.has_stock_nearby).count(),
            }),
            WorkflowOutcome::Failed { kind, error } => json!({ "kind": kind, "error": error }),
        }
    }
}

/// What a workflow returns to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: WorkflowOutcome,
    pub explanation: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::Templates;
    use crate::types::BloodGroup;

    #[test]
    fn test_failure_kinds() {
        let missing = CoordinationError::not_found("hospital", "h1");
        let outcome = WorkflowOutcome::failed(&missing);
        assert!(outcome.is_failure());
        assert_eq!(outcome.action(), "failed");
        match outcome {
            WorkflowOutcome::Failed { kind, error } => {
                assert_eq!(kind, FailureKind::NotFound);
                assert_eq!(error, "hospital not found: h1");
            }
            other => panic!("unexpected {:?}", other),
        }

        let short = CoordinationError::InsufficientStock {
            hospital_id: "k".into(),
            blood_group: BloodGroup::APos,
            requested: 3,
        };
        assert_eq!(FailureKind::from(&short), FailureKind::InsufficientStock);
        assert_eq!(
            FailureKind::from(&CoordinationError::Timeout { seconds: 5 }),
            FailureKind::Timeout
        );
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = WorkflowReport {
            success: true,
            outcome: WorkflowOutcome::StockSwept {
                report: SweepReport {
                    hospitals_scanned: 3,
                    deficits_checked: 1,
                    stock_found: 1,
                },
            },
            explanation: "done".into(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["action"], "stock_swept");
        assert_eq!(value["report"]["hospitals_scanned"], 3);
        assert_eq!(value["explanation"], "done");
    }

    #[test]
    fn test_every_summary_renders_its_template() {
        let templates = Templates::new().unwrap();
        let outcomes = vec![
            WorkflowOutcome::StockSwept {
                report: SweepReport::default(),
            },
            WorkflowOutcome::RoutesRefreshed {
                refresh: RouteRefresh {
                    checked: 2,
                    updated: 1,
                },
            },
            WorkflowOutcome::ShortagesPrepared {
                predictions: Vec::new(),
                stock_checks: Vec::new(),
            },
            WorkflowOutcome::InventoryScanned {
                hospitals_scanned: 2,
                deficits: 0,
                failures: Vec::new(),
                results: Vec::new(),
            },
            WorkflowOutcome::EmergencyHandled {
                cases: Vec::new(),
                skipped: Vec::new(),
                stock_checks: Vec::new(),
            },
            WorkflowOutcome::DonorDeclined {
                request_id: "r1".into(),
                donor_id: "d1".into(),
            },
            WorkflowOutcome::failed(&CoordinationError::InvalidInput("bad".into())),
        ];
        for outcome in outcomes {
            let name = format!("explain/{}", outcome.action());
            let text = templates.render(&name, &outcome.summary()).unwrap();
            assert!(!text.is_empty(), "{name}");
        }
    }
}
