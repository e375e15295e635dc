//! Persistent store boundary.
//!
//! Agents read and write exclusively through [`Store`]. Operations that
//! guard against duplicated side effects are expressed as single atomic
//! calls (`insert_*` returning whether a row was written, conditional
//! stock moves, conditional status flips) so callers never rely on a
//! read-then-write sequence.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CoordinationError;
use crate::types::{
    AdminNotice, AuditEntry, BloodGroup, Donor, DonorResponse, DonorRoute, DonorTracking,
    EmergencyCase, EmergencyStatus, Hospital, HospitalAlert, HospitalStatus, LocationFix,
    Notification, RouteEstimate, TransferRequest,
};

pub type StoreResult<T> = Result<T, CoordinationError>;

/// Position and estimates written on each tracking update.
#[derive(Debug, Clone, Copy)]
pub struct TrackingProgress {
    pub fix: LocationFix,
    pub remaining_distance_km: f64,
    pub estimated_remaining_min: u32,
    pub estimated_arrival: DateTime<Utc>,
}

/// Storage operations used by the agents.
pub trait Store: Send + Sync + fmt::Debug {
    // -- hospitals ---------------------------------------------------------

    fn insert_hospital(&self, hospital: &Hospital) -> StoreResult<()>;

    fn get_hospital(&self, id: &str) -> StoreResult<Option<Hospital>>;

    /// Hospitals with the given status, or all hospitals.
    fn list_hospitals(&self, status: Option<HospitalStatus>) -> StoreResult<Vec<Hospital>>;

    /// Overwrite one group's stock. A non-mapping inventory is replaced by a
    /// mapping first. Returns `false` when the hospital does not exist.
    fn set_stock(&self, hospital_id: &str, group: BloodGroup, units: u32) -> StoreResult<bool>;

    /// Decrement stock by `units` only if at least `units` are held.
    /// Returns `false` when the balance was insufficient or the hospital
    /// does not exist; nothing changes in that case.
    fn withdraw_stock(&self, hospital_id: &str, group: BloodGroup, units: u32) -> StoreResult<bool>;

    /// Increment stock by `units`.
    fn deposit_stock(&self, hospital_id: &str, group: BloodGroup, units: u32) -> StoreResult<bool>;

    // -- donors ------------------------------------------------------------

    fn insert_donor(&self, donor: &Donor) -> StoreResult<()>;

    fn get_donor(&self, id: &str) -> StoreResult<Option<Donor>>;

    fn donors_by_blood_group(&self, group: BloodGroup) -> StoreResult<Vec<Donor>>;

    // -- notifications -----------------------------------------------------

    /// Insert unless the same donor, hospital and group already has an
    /// unread pending blood request.
    fn insert_notification_unless_open(&self, notification: &Notification) -> StoreResult<bool>;

    /// Insert unless the same donor, hospital and group was notified at or
    /// after `since`.
    fn insert_notification_unless_recent(
        &self,
        notification: &Notification,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;

    fn find_notification_by_request(&self, request_id: &str) -> StoreResult<Option<Notification>>;

    /// Record the donor's reply. Only pending notifications change.
    fn record_donor_response(
        &self,
        request_id: &str,
        response: DonorResponse,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Pending, unanswered notifications for the given groups created in
    /// `[created_after, created_before]`.
    fn unanswered_notifications(
        &self,
        groups: &[BloodGroup],
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Notification>>;

    fn notifications_for_donor(&self, donor_id: &str) -> StoreResult<Vec<Notification>>;

    // -- transfers ---------------------------------------------------------

    /// Insert unless a pending request exists for the same from, to and
    /// group.
    fn insert_transfer_request(&self, request: &TransferRequest) -> StoreResult<bool>;

    fn get_transfer_request(&self, id: &str) -> StoreResult<Option<TransferRequest>>;

    fn transfer_requests_from(&self, hospital_id: &str) -> StoreResult<Vec<TransferRequest>>;

    /// Move the requested units from the provider to the requester and mark
    /// the request accepted, all or nothing.
    fn accept_transfer(
        &self,
        id: &str,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest>;

    fn reject_transfer(
        &self,
        id: &str,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest>;

    fn insert_admin_notice(&self, notice: &AdminNotice) -> StoreResult<()>;

    fn admin_notices(&self, hospital_id: &str) -> StoreResult<Vec<AdminNotice>>;

    // -- emergencies -------------------------------------------------------

    fn insert_emergency_case(&self, case: &EmergencyCase) -> StoreResult<()>;

    fn get_emergency_case(&self, id: &str) -> StoreResult<Option<EmergencyCase>>;

    fn emergency_cases(&self) -> StoreResult<Vec<EmergencyCase>>;

    fn set_emergency_status(&self, id: &str, status: EmergencyStatus) -> StoreResult<bool>;

    fn insert_hospital_alert(&self, alert: &HospitalAlert) -> StoreResult<()>;

    /// Active alerts raised at or after `since`.
    fn active_hospital_alerts(&self, since: DateTime<Utc>) -> StoreResult<Vec<HospitalAlert>>;

    fn mark_alert_handled(&self, id: &str) -> StoreResult<bool>;

    // -- routes and tracking -----------------------------------------------

    /// Insert the route for a request. Returns `false` and leaves the stored
    /// row untouched when the request already has one.
    fn insert_route(&self, route: &DonorRoute) -> StoreResult<bool>;

    fn get_route(&self, request_id: &str) -> StoreResult<Option<DonorRoute>>;

    /// Replace the current plan, keeping the originally planned duration.
    fn replace_route_plan(
        &self,
        request_id: &str,
        plan: &RouteEstimate,
        estimated_arrival: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Claim the delay backup for an active route. Succeeds when no backup
    /// was triggered yet, or when the last one happened at or before
    /// `rearm_before`.
    fn claim_delay_backup(
        &self,
        request_id: &str,
        at: DateTime<Utc>,
        rearm_before: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    fn complete_route(&self, request_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Active routes created at or after `created_after`.
    fn active_routes(&self, created_after: DateTime<Utc>) -> StoreResult<Vec<DonorRoute>>;

    /// Start tracking a request. Existing tracking is never reset; returns
    /// `false` in that case.
    fn start_tracking(&self, tracking: &DonorTracking) -> StoreResult<bool>;

    fn get_tracking(&self, request_id: &str) -> StoreResult<Option<DonorTracking>>;

    /// Store a position update. Only tracking that has not arrived changes.
    fn record_progress(
        &self,
        request_id: &str,
        progress: &TrackingProgress,
    ) -> StoreResult<bool>;

    /// Mark arrival. Only tracking that has not arrived changes.
    fn mark_arrived(&self, request_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Replace the dashboard feed entry for a request.
    fn publish_update(
        &self,
        request_id: &str,
        hospital_id: &str,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn latest_update(&self, request_id: &str) -> StoreResult<Option<Value>>;

    // -- audit -------------------------------------------------------------

    fn log_action(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Audit entries, optionally filtered by action, oldest first.
    fn audit_entries(&self, action: Option<&str>) -> StoreResult<Vec<AuditEntry>>;
}
