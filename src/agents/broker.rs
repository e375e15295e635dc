//! LinkBridge: nearby-stock search and inter-hospital transfers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::monitor::find_deficits;
use super::{AgentContext, AgentKind, ContactSummary, DonorContact};
use crate::error::CoordinationError;
use crate::geo::{nearest, round2};
use crate::templates::{TRANSFER_NOTICE_BODY, TRANSFER_NOTICE_TITLE};
use crate::types::{
    new_id, AdminNotice, BloodGroup, Hospital, HospitalStatus, InventoryShape, TransferRequest,
};

/// A hospital able to cover the requested units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockOption {
    pub hospital_id: String,
    pub hospital_name: String,
    pub hospital_code: Option<String>,
    pub address: Option<String>,
    pub distance_km: f64,
    pub available_units: u32,
}

/// Whether the search wrote a new transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestCreation {
    Created { request_id: String },
    /// A pending request for the same pair and group already exists.
    AlreadyPending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Options sorted nearest first; a request was sent to the first one.
    Offered {
        options: Vec<StockOption>,
        recommended: StockOption,
        request: RequestCreation,
    },
    NoStockFound { hospitals_checked: usize },
}

impl TransferOutcome {
    pub fn has_stock_nearby(&self) -> bool {
        matches!(self, TransferOutcome::Offered { .. })
    }
}

/// A rejected request and the donor search run in its place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRejection {
    pub request: TransferRequest,
    pub fallback: Option<ContactSummary>,
}

/// Counts from one periodic sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub hospitals_scanned: usize,
    pub deficits_checked: usize,
    pub stock_found: usize,
}

#[derive(Debug, Clone)]
pub struct TransferBroker {
    ctx: AgentContext,
    donors: Arc<dyn DonorContact>,
}

impl TransferBroker {
    pub fn new(ctx: AgentContext, donors: Arc<dyn DonorContact>) -> Self {
        Self { ctx, donors }
    }

    /// Look for active hospitals in range holding at least `units_needed`
    /// units and send one transfer request to the nearest.
    pub fn find_stock(
        &self,
        hospital_id: &str,
        blood_group: BloodGroup,
        units_needed: u32,
    ) -> Result<TransferOutcome, CoordinationError> {
        let requester = self
            .ctx
            .store
            .get_hospital(hospital_id)?
            .ok_or_else(|| CoordinationError::not_found("hospital", hospital_id))?;
        let origin = requester.location.ok_or_else(|| {
            CoordinationError::InvalidState(format!("hospital {} has no location", requester.id))
        })?;
        let units = units_needed.max(1);

        let others = self
            .ctx
            .store
            .list_hospitals(Some(HospitalStatus::Active))?
            .into_iter()
            .filter(|h| h.id != requester.id);
        let nearby = nearest(origin, others, Some(self.ctx.policy.broker_radius_km));
        let hospitals_checked = nearby.len();

        let options: Vec<StockOption> = nearby
            .into_iter()
            .filter_map(|ranked| {
                let available_units = ranked.item.inventory().get(blood_group);
                (available_units >= units).then(|| StockOption {
                    hospital_id: ranked.item.id,
                    hospital_name: ranked.item.name,
                    hospital_code: ranked.item.code,
                    address: ranked.item.address,
                    distance_km: round2(ranked.distance_km),
                    available_units,
                })
            })
            .collect();

        log::info!(
            "[LINKBRIDGE] {} needs {} x {}: {} hospitals in range, {} with stock",
            requester.id,
            units,
            blood_group,
            hospitals_checked,
            options.len()
        );
        self.ctx.audit(
            AgentKind::LinkBridge,
            "checked_nearby_stock",
            json!({
                "hospital_id": requester.id,
                "blood_group": blood_group,
                "units_needed": units,
                "hospitals_checked": hospitals_checked,
                "hospitals_with_stock": options.len(),
            }),
        );

        let Some(recommended) = options.first().cloned() else {
            return Ok(TransferOutcome::NoStockFound { hospitals_checked });
        };
        let request = self.create_request(&requester, &recommended, blood_group, units)?;
        Ok(TransferOutcome::Offered {
            options,
            recommended,
            request,
        })
    }

    fn create_request(
        &self,
        requester: &Hospital,
        provider: &StockOption,
        blood_group: BloodGroup,
        units: u32,
    ) -> Result<RequestCreation, CoordinationError> {
        let now = self.ctx.now();
        let request = TransferRequest::new(&requester.id, &provider.hospital_id, blood_group, units, now);
        if !self.ctx.store.insert_transfer_request(&request)? {
            log::info!(
                "[LINKBRIDGE] Pending {} request from {} to {} already exists",
                blood_group,
                requester.id,
                provider.hospital_id
            );
            return Ok(RequestCreation::AlreadyPending);
        }

        let context = json!({
            "requester_name": requester.name,
            "units": units,
            "blood_group": blood_group.as_str(),
            "request_id": request.id,
        });
        let notice = AdminNotice {
            id: new_id(),
            hospital_id: provider.hospital_id.clone(),
            kind: "inter_hospital_request".to_string(),
            title: self.ctx.templates.render(TRANSFER_NOTICE_TITLE, &context)?,
            body: self.ctx.templates.render(TRANSFER_NOTICE_BODY, &context)?,
            request_id: Some(request.id.clone()),
            created_at: now,
            read: false,
        };
        if let Err(e) = self.ctx.store.insert_admin_notice(&notice) {
            log::warn!(
                "[LINKBRIDGE] Notice for transfer {} to {} failed: {}",
                request.id,
                provider.hospital_id,
                e
            );
        }

        self.ctx.audit(
            AgentKind::LinkBridge,
            "transfer_request_created",
            json!({
                "request_id": request.id,
                "from_hospital": request.from_hospital_id,
                "to_hospital": request.to_hospital_id,
                "blood_group": blood_group,
                "units": units,
            }),
        );
        Ok(RequestCreation::Created {
            request_id: request.id,
        })
    }

    /// Move the units and mark the request accepted.
    ///
    /// Fails with `InsufficientStock` when the provider no longer holds the
    /// units; the request then stays pending.
    pub fn accept_transfer(
        &self,
        request_id: &str,
        message: Option<&str>,
    ) -> Result<TransferRequest, CoordinationError> {
        let request = self
            .ctx
            .store
            .accept_transfer(request_id, message, self.ctx.now())?;
        log::info!(
            "[LINKBRIDGE] Transfer {} accepted: {} x {} from {} to {}",
            request.id,
            request.units,
            request.blood_group,
            request.to_hospital_id,
            request.from_hospital_id
        );
        self.ctx.audit(
            AgentKind::LinkBridge,
            "transfer_accepted",
            json!({
                "request_id": request.id,
                "from_hospital": request.from_hospital_id,
                "to_hospital": request.to_hospital_id,
                "blood_group": request.blood_group,
                "units": request.units,
            }),
        );
        Ok(request)
    }

    /// Mark the request rejected and contact donors for the requester.
    pub async fn reject_transfer(
        &self,
        request_id: &str,
        message: Option<&str>,
    ) -> Result<TransferRejection, CoordinationError> {
        let request = self
            .ctx
            .store
            .reject_transfer(request_id, message, self.ctx.now())?;
        self.ctx.audit(
            AgentKind::LinkBridge,
            "transfer_rejected",
            json!({ "request_id": request.id, "reason": message }),
        );

        let fallback = match self
            .donors
            .contact_nearby_donors(&request.from_hospital_id, request.blood_group, request.units)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::warn!(
                    "[LINKBRIDGE] Donor fallback after rejecting {} failed: {}",
                    request.id,
                    e
                );
                None
            }
        };
        Ok(TransferRejection { request, fallback })
    }

    /// Search nearby stock for every deficit at every active hospital.
    ///
    /// Hospitals with an empty or malformed inventory are skipped, and one
    /// failed search does not stop the sweep.
    pub fn sweep(&self) -> Result<SweepReport, CoordinationError> {
        let hospitals = self.ctx.store.list_hospitals(Some(HospitalStatus::Active))?;
        let mut report = SweepReport {
            hospitals_scanned: hospitals.len(),
            ..SweepReport::default()
        };

        for hospital in &hospitals {
            if hospital.inventory_shape() != InventoryShape::Mapping {
                continue;
            }
            for deficit in find_deficits(&self.ctx.policy, &hospital.id, &hospital.inventory()) {
                report.deficits_checked += 1;
                match self.find_stock(&hospital.id, deficit.blood_group, deficit.deficit) {
                    Ok(outcome) if outcome.has_stock_nearby() => report.stock_found += 1,
                    Ok(_) => {}
                    Err(e) => log::warn!(
                        "[LINKBRIDGE] Sweep search for {} at {} failed: {}",
                        deficit.blood_group,
                        hospital.id,
                        e
                    ),
                }
            }
        }

        self.ctx.audit(
            AgentKind::LinkBridge,
            "periodic_stock_check",
            json!({
                "hospitals_scanned": report.hospitals_scanned,
                "deficits_checked": report.deficits_checked,
                "stock_found": report.stock_found,
            }),
        );
        Ok(report)
    }
}
