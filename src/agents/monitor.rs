//! AutoPulse: inventory monitoring and nearest-donor outreach.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AgentContext, AgentKind, ContactSummary, DonorContact};
use crate::config::Policy;
use crate::error::CoordinationError;
use crate::geo::{nearest, round2};
use crate::outreach::OutreachMessage;
use crate::templates::{DONOR_REQUEST_BODY, DONOR_REQUEST_TITLE};
use crate::types::{
    new_id, BloodGroup, Hospital, HospitalStatus, Inventory, InventoryShape, Notification,
    NotificationKind, NotificationStatus, Priority,
};

/// One blood group below its threshold at one hospital.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeficitEvent {
    pub hospital_id: String,
    pub blood_group: BloodGroup,
    pub current: u32,
    pub threshold: u32,
    /// `threshold - current`, always at least 1.
    pub deficit: u32,
}

/// Groups of `inventory` strictly below their threshold, in canonical order.
pub fn find_deficits(policy: &Policy, hospital_id: &str, inventory: &Inventory) -> Vec<DeficitEvent> {
    BloodGroup::ALL
        .into_iter()
        .filter_map(|group| {
            let current = inventory.get(group);
            let threshold = policy.threshold(group);
            (current < threshold).then(|| DeficitEvent {
                hospital_id: hospital_id.to_string(),
                blood_group: group,
                current,
                threshold,
                deficit: threshold - current,
            })
        })
        .collect()
}

/// Result of scanning one hospital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalScan {
    pub hospital_id: String,
    pub hospital_name: String,
    pub shape: InventoryShape,
    pub inventory: Inventory,
    pub deficits: Vec<DeficitEvent>,
}

#[derive(Debug, Clone)]
pub struct InventoryMonitor {
    ctx: AgentContext,
}

impl InventoryMonitor {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    pub fn active_hospital_ids(&self) -> Result<Vec<String>, CoordinationError> {
        let hospitals = self.ctx.store.list_hospitals(Some(HospitalStatus::Active))?;
        log::info!("[AUTOPULSE] Found {} active hospitals to monitor", hospitals.len());
        Ok(hospitals.into_iter().map(|h| h.id).collect())
    }

    /// Compare one hospital's stock against the thresholds.
    ///
    /// A malformed inventory document is read as all-zero.
    pub fn scan_hospital(&self, hospital_id: &str) -> Result<HospitalScan, CoordinationError> {
        let hospital = self.load_hospital(hospital_id)?;
        if !hospital.is_active() {
            return Err(CoordinationError::InvalidState(format!(
                "hospital {} is {}",
                hospital.id, hospital.status
            )));
        }

        let (inventory, shape) = Inventory::coerce(&hospital.inventory_document);
        match shape {
            InventoryShape::Malformed => log::warn!(
                "[AUTOPULSE] Hospital {} has inventory in an unsupported shape, treating as empty",
                hospital.id
            ),
            InventoryShape::Empty => log::info!("[AUTOPULSE] Hospital {} has empty inventory", hospital.id),
            InventoryShape::Mapping => {}
        }

        let deficits = find_deficits(&self.ctx.policy, &hospital.id, &inventory);
        for d in &deficits {
            log::info!(
                "[AUTOPULSE] Low stock at {}: {} (current: {}, threshold: {}, deficit: {})",
                hospital.id,
                d.blood_group,
                d.current,
                d.threshold,
                d.deficit
            );
        }
        if !deficits.is_empty() {
            self.ctx.audit(
                AgentKind::AutoPulse,
                "low_stock_detected",
                json!({
                    "hospital_id": hospital.id,
                    "hospital_name": hospital.name,
                    "low_stock_groups": deficits,
                }),
            );
        }

        Ok(HospitalScan {
            hospital_id: hospital.id,
            hospital_name: hospital.name,
            shape,
            inventory,
            deficits,
        })
    }

    fn load_hospital(&self, hospital_id: &str) -> Result<Hospital, CoordinationError> {
        self.ctx
            .store
            .get_hospital(hospital_id)?
            .ok_or_else(|| CoordinationError::not_found("hospital", hospital_id))
    }
}

#[async_trait]
impl DonorContact for InventoryMonitor {
    /// Notify the nearest eligible donors of `blood_group`, skipping donors
    /// that already hold an open notification from this hospital.
    async fn contact_nearby_donors(
        &self,
        hospital_id: &str,
        blood_group: BloodGroup,
        units_needed: u32,
    ) -> Result<ContactSummary, CoordinationError> {
        let hospital = self.load_hospital(hospital_id)?;
        let origin = hospital.location.ok_or_else(|| {
            CoordinationError::InvalidState(format!("hospital {} has no location", hospital.id))
        })?;

        let now = self.ctx.now();
        let policy = &self.ctx.policy;
        let units = units_needed.max(1);
        let priority = Priority::for_group(blood_group);

        let eligible = self
            .ctx
            .store
            .donors_by_blood_group(blood_group)?
            .into_iter()
            .filter(|d| d.is_eligible_at(now, policy.donor_cooldown()));
        let targets: Vec<_> = nearest(origin, eligible, None)
            .into_iter()
            .take(policy.monitor_contact_limit)
            .collect();

        let mut contacted = Vec::new();
        let mut skipped_duplicates = 0;
        for target in &targets {
            let donor = &target.item;
            let distance_km = round2(target.distance_km);
            let context = json!({
                "hospital_name": hospital.name,
                "blood_group": blood_group.as_str(),
                "distance_km": distance_km,
            });
            let message = self.ctx.templates.render(DONOR_REQUEST_BODY, &context)?;
            let notification = Notification {
                id: new_id(),
                request_id: new_id(),
                kind: NotificationKind::BloodRequest,
                donor_id: donor.id.clone(),
                hospital_id: Some(hospital.id.clone()),
                blood_group,
                units_needed: units,
                priority,
                distance_km,
                title: self.ctx.templates.render(DONOR_REQUEST_TITLE, &context)?,
                message: message.clone(),
                created_at: now,
                read: false,
                status: NotificationStatus::Pending,
                response: None,
                responded_at: None,
            };

            if !self.ctx.store.insert_notification_unless_open(&notification)? {
                log::info!(
                    "[AUTOPULSE] Donor {} already has an open {} request from {}",
                    donor.id,
                    blood_group,
                    hospital.id
                );
                skipped_duplicates += 1;
                continue;
            }
            self.ctx.outreach.dispatch(OutreachMessage {
                donor_id: donor.id.clone(),
                phone: donor.phone.clone(),
                body: message,
                request_id: notification.request_id.clone(),
                hospital_id: Some(hospital.id.clone()),
                blood_group,
                emergency: false,
            });
            contacted.push(donor.id.clone());
        }

        log::info!(
            "[AUTOPULSE] Contacted {} of {} donors for {} at {} (priority {})",
            contacted.len(),
            targets.len(),
            blood_group,
            hospital.id,
            priority
        );
        self.ctx.audit(
            AgentKind::AutoPulse,
            "auto_contacted_donors",
            json!({
                "hospital_id": hospital.id,
                "blood_group": blood_group,
                "donors_contacted": contacted.len(),
                "skipped_duplicates": skipped_duplicates,
            }),
        );

        Ok(ContactSummary {
            hospital_id: hospital.id,
            blood_group,
            units_requested: units,
            priority,
            candidates: targets.len(),
            contacted,
            skipped_duplicates,
        })
    }
}
