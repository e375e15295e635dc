//! Workflow sequencing over the four agents.
//!
//! The orchestrator owns one instance of each agent, built once from an
//! [`OrchestratorBuilder`]. Each public handler runs one workflow under the
//! policy's soft timeout and always returns a [`WorkflowReport`]: agent
//! errors and timeouts become [`WorkflowOutcome::Failed`] and already
//! committed side effects are left in place.

mod outcome;
mod triggers;

pub use outcome::{FailureKind, ScanFailure, StockCheck, WorkflowOutcome, WorkflowReport};
pub use triggers::{
    ArrivalTrigger, DonorAcceptedTrigger, DonorDeclinedTrigger, EmergencyMode, EmergencyTrigger,
    LocationTrigger, LowInventoryTrigger, TransferDecision,
};

use std::future::Future;
use std::sync::Arc;

use serde_json::json;

use crate::agents::{
    AgentContext, AgentKind, DonorContact, EmergencyResponder, HandledCase, IncidentClassifier,
    IncidentFeed, InventoryMonitor, ManualEmergency, RoutePlanner, ShortageEstimator,
    ThresholdTrendEstimator, TransferBroker, TransferOutcome,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Policy;
use crate::error::CoordinationError;
use crate::explain::{Explainer, Narrator};
use crate::outreach::{LogNotifier, Notifier, Outreach};
use crate::routing::{GeometricRouter, RouteProvider, RouteResolver};
use crate::store::Store;
use crate::templates::Templates;
use crate::types::{BloodGroup, DonorResponse, HospitalStatus};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Wires the agents around one store.
///
/// Without notifiers, outreach is written to the log. Without route
/// providers, only the geometric estimate is used.
#[derive(Debug)]
pub struct OrchestratorBuilder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    notifiers: Vec<Arc<dyn Notifier>>,
    route_providers: Vec<Arc<dyn RouteProvider>>,
    explainer: Option<Arc<dyn Explainer>>,
    feed: Option<Arc<dyn IncidentFeed>>,
    classifier: Option<Arc<dyn IncidentClassifier>>,
    estimator: Arc<dyn ShortageEstimator>,
}

impl OrchestratorBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy: Policy::default(),
            notifiers: Vec::new(),
            route_providers: Vec::new(),
            explainer: None,
            feed: None,
            classifier: None,
            estimator: Arc::new(ThresholdTrendEstimator),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn route_provider(mut self, provider: Arc<dyn RouteProvider>) -> Self {
        self.route_providers.push(provider);
        self
    }

    pub fn explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = Some(explainer);
        self
    }

    pub fn incident_feed(mut self, feed: Arc<dyn IncidentFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IncidentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn ShortageEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn build(self) -> Result<Orchestrator, CoordinationError> {
        let templates = Arc::new(Templates::new()?);
        let notifiers = if self.notifiers.is_empty() {
            vec![Arc::new(LogNotifier) as Arc<dyn Notifier>]
        } else {
            self.notifiers
        };
        let routes = Arc::new(RouteResolver::new(
            self.route_providers,
            GeometricRouter::new(self.policy.minutes_per_km),
        ));
        let ctx = AgentContext {
            store: self.store,
            clock: self.clock,
            policy: Arc::new(self.policy),
            outreach: Arc::new(Outreach::new(notifiers)),
            templates: templates.clone(),
        };

        let monitor = Arc::new(InventoryMonitor::new(ctx.clone()));
        let broker = TransferBroker::new(ctx.clone(), monitor.clone());
        let mut responder = EmergencyResponder::new(ctx.clone());
        if let Some(feed) = self.feed {
            responder = responder.with_feed(feed);
        }
        if let Some(classifier) = self.classifier {
            responder = responder.with_classifier(classifier);
        }
        let planner = RoutePlanner::new(ctx.clone(), routes, monitor.clone());

        log::info!(
            "[ORCHESTRATOR] Ready: outreach via {:?}, explainer {}",
            ctx.outreach.channels(),
            if self.explainer.is_some() { "configured" } else { "template only" }
        );
        Ok(Orchestrator {
            ctx,
            monitor,
            broker,
            responder,
            planner,
            estimator: self.estimator,
            narrator: Narrator::new(self.explainer, templates),
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Orchestrator {
    ctx: AgentContext,
    monitor: Arc<InventoryMonitor>,
    broker: TransferBroker,
    responder: EmergencyResponder,
    planner: RoutePlanner,
    estimator: Arc<dyn ShortageEstimator>,
    narrator: Narrator,
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn Store>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    pub fn outreach(&self) -> &Arc<Outreach> {
        &self.ctx.outreach
    }

    // -- workflow runner ----------------------------------------------------

    async fn run<F>(&self, task: &str, workflow: F) -> WorkflowReport
    where
        F: Future<Output = Result<WorkflowOutcome, CoordinationError>>,
    {
        let limit = self.ctx.policy.workflow_timeout();
        let outcome = match tokio::time::timeout(limit, workflow).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                log::error!("[ORCHESTRATOR] {} failed: {}", task, e);
                WorkflowOutcome::failed(&e)
            }
            Err(_) => {
                let e = CoordinationError::Timeout {
                    seconds: limit.as_secs(),
                };
                log::error!("[ORCHESTRATOR] {} aborted: {}", task, e);
                WorkflowOutcome::failed(&e)
            }
        };

        let summary = outcome.summary();
        let context = serde_json::to_value(&outcome).unwrap_or_else(|_| summary.clone());
        let explanation = self
            .narrator
            .narrate(task, outcome.action(), &summary, &context)
            .await;
        WorkflowReport {
            success: !outcome.is_failure(),
            outcome,
            explanation,
        }
    }

    // -- triggers -----------------------------------------------------------

    /// Broker first; donors are contacted only when no hospital nearby can
    /// cover the units.
    pub async fn handle_low_inventory(&self, trigger: LowInventoryTrigger) -> WorkflowReport {
        self.run("low_inventory", self.low_inventory(trigger)).await
    }

    async fn low_inventory(&self, trigger: LowInventoryTrigger) -> Result<WorkflowOutcome, CoordinationError> {
        log::info!(
            "[ORCHESTRATOR] Low inventory: {} needs {} x {}",
            trigger.hospital_id,
            trigger.units_needed,
            trigger.blood_group
        );
        match self
            .broker
            .find_stock(&trigger.hospital_id, trigger.blood_group, trigger.units_needed)?
        {
            TransferOutcome::Offered {
                options,
                recommended,
                request,
            } => Ok(WorkflowOutcome::TransferAvailable {
                hospital_id: trigger.hospital_id,
                blood_group: trigger.blood_group,
                units_needed: trigger.units_needed,
                options,
                recommended,
                request,
            }),
            TransferOutcome::NoStockFound { hospitals_checked } => {
                let contact = self
                    .monitor
                    .contact_nearby_donors(&trigger.hospital_id, trigger.blood_group, trigger.units_needed)
                    .await?;
                Ok(WorkflowOutcome::DonorSearchInitiated {
                    hospitals_checked,
                    contact,
                })
            }
        }
    }

    /// Responder first, then an informational stock search per handled case.
    pub async fn handle_emergency(&self, trigger: EmergencyTrigger) -> WorkflowReport {
        self.run("emergency", self.emergency(trigger)).await
    }

    async fn emergency(&self, trigger: EmergencyTrigger) -> Result<WorkflowOutcome, CoordinationError> {
        let report = match trigger.mode {
            EmergencyMode::Manual => {
                let blood_group = trigger.blood_group.ok_or_else(|| {
                    CoordinationError::InvalidInput("blood_group is required for a manual emergency".into())
                })?;
                self.responder
                    .respond(ManualEmergency {
                        hospital_id: trigger.hospital_id,
                        blood_group,
                        units_needed: trigger.units_needed.unwrap_or(1),
                        location: trigger.location,
                        severity: trigger.severity.unwrap_or_default(),
                        description: trigger.description,
                    })
                    .await?
            }
            EmergencyMode::Auto => self.responder.scan().await?,
        };
        let stock_checks = report
            .handled
            .iter()
            .filter_map(|case: &HandledCase| {
                let hospital_id = case.hospital_id.as_deref()?;
                Some(self.check_stock(hospital_id, case.blood_group, case.units_needed))
            })
            .collect();
        Ok(WorkflowOutcome::EmergencyHandled {
            cases: report.handled,
            skipped: report.skipped,
            stock_checks,
        })
    }

    /// Nearby-stock search whose failure is reported, not raised.
    fn check_stock(&self, hospital_id: &str, blood_group: BloodGroup, units_needed: u32) -> StockCheck {
        match self.broker.find_stock(hospital_id, blood_group, units_needed) {
            Ok(outcome) => StockCheck {
                hospital_id: hospital_id.to_string(),
                blood_group,
                units_needed,
                has_stock_nearby: outcome.has_stock_nearby(),
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => {
                log::warn!(
                    "[ORCHESTRATOR] Stock check for {} ({}) failed: {}",
                    hospital_id,
                    blood_group,
                    e
                );
                StockCheck {
                    hospital_id: hospital_id.to_string(),
                    blood_group,
                    units_needed,
                    has_stock_nearby: false,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn handle_donor_accepted(&self, trigger: DonorAcceptedTrigger) -> WorkflowReport {
        self.run("donor_accepted", self.donor_accepted(trigger)).await
    }

    async fn donor_accepted(&self, trigger: DonorAcceptedTrigger) -> Result<WorkflowOutcome, CoordinationError> {
        let store = &self.ctx.store;
        let notification = store
            .find_notification_by_request(&trigger.request_id)?
            .ok_or_else(|| CoordinationError::not_found("request", trigger.request_id.clone()))?;
        if notification.donor_id != trigger.donor_id {
            return Err(CoordinationError::InvalidInput(format!(
                "request {} was not sent to donor {}",
                trigger.request_id, trigger.donor_id
            )));
        }
        let hospital_id = trigger
            .hospital_id
            .or_else(|| notification.hospital_id.clone())
            .ok_or_else(|| {
                CoordinationError::InvalidInput(format!("request {} names no hospital", trigger.request_id))
            })?;

        let recorded = store.record_donor_response(&trigger.request_id, DonorResponse::Accepted, self.ctx.now())?;
        if !recorded && notification.response != Some(DonorResponse::Accepted) {
            return Err(CoordinationError::AlreadyProcessed {
                entity: "request",
                id: trigger.request_id,
            });
        }
        self.ctx.audit(
            AgentKind::Orchestrator,
            "donor_accepted",
            json!({
                "request_id": trigger.request_id,
                "donor_id": trigger.donor_id,
                "hospital_id": hospital_id,
            }),
        );

        let route = self
            .planner
            .plan(&trigger.request_id, &trigger.donor_id, &hospital_id)
            .await?;
        Ok(WorkflowOutcome::RoutePlanned { route })
    }

    pub async fn handle_donor_declined(&self, trigger: DonorDeclinedTrigger) -> WorkflowReport {
        self.run("donor_declined", self.donor_declined(trigger)).await
    }

    async fn donor_declined(&self, trigger: DonorDeclinedTrigger) -> Result<WorkflowOutcome, CoordinationError> {
        let store = &self.ctx.store;
        let notification = store
            .find_notification_by_request(&trigger.request_id)?
            .ok_or_else(|| CoordinationError::not_found("request", trigger.request_id.clone()))?;
        if !store.record_donor_response(&trigger.request_id, DonorResponse::Rejected, self.ctx.now())? {
            return Err(CoordinationError::AlreadyProcessed {
                entity: "request",
                id: trigger.request_id,
            });
        }
        self.ctx.audit(
            AgentKind::Orchestrator,
            "donor_declined",
            json!({ "request_id": trigger.request_id, "donor_id": notification.donor_id }),
        );
        Ok(WorkflowOutcome::DonorDeclined {
            request_id: trigger.request_id,
            donor_id: notification.donor_id,
        })
    }

    pub async fn handle_location_update(&self, trigger: LocationTrigger) -> WorkflowReport {
        self.run("location_update", async {
            let update = self
                .planner
                .update_location(&trigger.request_id, trigger.latitude, trigger.longitude)
                .await?;
            Ok(WorkflowOutcome::LocationUpdated { update })
        })
        .await
    }

    pub async fn handle_arrival(&self, trigger: ArrivalTrigger) -> WorkflowReport {
        self.run("arrival", async {
            let tracking = self.planner.mark_arrival(&trigger.request_id)?;
            Ok(WorkflowOutcome::Arrived { tracking })
        })
        .await
    }

    pub async fn accept_transfer(&self, request_id: &str, decision: TransferDecision) -> WorkflowReport {
        self.run("transfer_accept", async {
            let request = self
                .broker
                .accept_transfer(request_id, decision.message.as_deref())?;
            Ok(WorkflowOutcome::TransferAccepted { request })
        })
        .await
    }

    pub async fn reject_transfer(&self, request_id: &str, decision: TransferDecision) -> WorkflowReport {
        self.run("transfer_reject", async {
            let rejection = self
                .broker
                .reject_transfer(request_id, decision.message.as_deref())
                .await?;
            Ok(WorkflowOutcome::TransferRejected {
                request: rejection.request,
                fallback: rejection.fallback,
            })
        })
        .await
    }

    // -- periodic workflows -------------------------------------------------

    /// Scan every active hospital and run the low-inventory workflow for
    /// each deficit. One hospital failing does not stop the batch.
    pub async fn run_inventory_scan(&self) -> WorkflowReport {
        self.run("inventory_scan", self.inventory_scan()).await
    }

    async fn inventory_scan(&self) -> Result<WorkflowOutcome, CoordinationError> {
        let ids = self.monitor.active_hospital_ids()?;
        let mut deficits = 0;
        let mut failures = Vec::new();
        let mut results = Vec::new();

        for hospital_id in &ids {
            let scan = match self.monitor.scan_hospital(hospital_id) {
                Ok(scan) => scan,
                Err(e) => {
                    log::error!("[ORCHESTRATOR] Scan of {} failed: {}", hospital_id, e);
                    failures.push(ScanFailure {
                        hospital_id: hospital_id.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            for deficit in scan.deficits {
                deficits += 1;
                let trigger = LowInventoryTrigger {
                    hospital_id: deficit.hospital_id,
                    blood_group: deficit.blood_group,
                    units_needed: deficit.deficit,
                };
                results.push(match self.low_inventory(trigger).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        log::error!("[ORCHESTRATOR] Low-inventory workflow for {} failed: {}", hospital_id, e);
                        WorkflowOutcome::failed(&e)
                    }
                });
            }
        }

        Ok(WorkflowOutcome::InventoryScanned {
            hospitals_scanned: ids.len(),
            deficits,
            failures,
            results,
        })
    }

    pub async fn sweep_transfers(&self) -> WorkflowReport {
        self.run("transfer_sweep", async {
            let report = self.broker.sweep()?;
            Ok(WorkflowOutcome::StockSwept { report })
        })
        .await
    }

    pub async fn scan_emergencies(&self) -> WorkflowReport {
        self.run("emergency_scan", self.emergency(EmergencyTrigger::auto()))
            .await
    }

    pub async fn refresh_routes(&self) -> WorkflowReport {
        self.run("route_refresh", async {
            let refresh = self.planner.refresh_active_routes().await?;
            Ok(WorkflowOutcome::RoutesRefreshed { refresh })
        })
        .await
    }

    /// Predict shortages at every active hospital and look for nearby stock
    /// ahead of time.
    pub async fn predict_and_prepare(&self) -> WorkflowReport {
        self.run("shortage_prepare", async {
            let now = self.ctx.now();
            let hospitals = self.ctx.store.list_hospitals(Some(HospitalStatus::Active))?;
            let mut predictions = Vec::new();
            let mut stock_checks = Vec::new();
            for hospital in &hospitals {
                for prediction in self.estimator.predict(hospital, &self.ctx.policy, now) {
                    stock_checks.push(self.check_stock(
                        &prediction.hospital_id,
                        prediction.blood_group,
                        prediction.units_needed,
                    ));
                    predictions.push(prediction);
                }
            }
            self.ctx.audit(
                AgentKind::Orchestrator,
                "shortages_predicted",
                json!({
                    "hospitals": hospitals.len(),
                    "predictions": predictions.len(),
                }),
            );
            Ok(WorkflowOutcome::ShortagesPrepared {
                predictions,
                stock_checks,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::RequestCreation;
    use crate::outreach::Channel;
    use crate::store::SqliteStore;
    use crate::testing::{north, t0, Fixture, ScriptedRouter};
    use crate::types::{
        NotificationStatus, Priority, RouteStatus, Severity, TrackingStatus, TransferStatus,
    };
    use async_trait::async_trait;
    use serde_json::Value;

    fn orchestrator(fx: &Fixture) -> Orchestrator {
        orchestrator_with(fx, Policy::default(), None)
    }

    fn orchestrator_with(fx: &Fixture, policy: Policy, explainer: Option<Arc<dyn Explainer>>) -> Orchestrator {
        let mut builder = Orchestrator::builder(fx.store.clone() as Arc<dyn Store>)
            .clock(fx.clock.clone())
            .policy(policy)
            .notifier(fx.notifier.clone())
            .route_provider(Arc::new(ScriptedRouter::fixed(6.0, 12)));
        if let Some(explainer) = explainer {
            builder = builder.explainer(explainer);
        }
        builder.build().unwrap()
    }

    fn full_stock() -> Vec<(BloodGroup, u32)> {
        BloodGroup::ALL.into_iter().map(|g| (g, 50)).collect()
    }

    #[tokio::test]
    async fn test_low_stock_without_nearby_supply_contacts_five_donors() {
        let fx = Fixture::new();
        let mut stock = full_stock();
        stock.retain(|(g, _)| *g != BloodGroup::ONeg);
        stock.push((BloodGroup::ONeg, 2));
        let hospital = fx.hospital("City", 0.0, &stock);
        fx.hospital("Neighbour", 20.0, &[(BloodGroup::ONeg, 4)]);
        for km in 1..=7 {
            fx.donor(BloodGroup::ONeg, f64::from(km));
        }
        let orch = orchestrator(&fx);

        let report = orch.run_inventory_scan().await;
        assert!(report.success);
        let WorkflowOutcome::InventoryScanned { deficits, results, .. } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        // The neighbour is short on most groups as well.
        assert!(*deficits >= 1);
        let city = results
            .iter()
            .find_map(|r| match r {
                WorkflowOutcome::DonorSearchInitiated { contact, .. } if contact.hospital_id == hospital.id => {
                    Some(contact)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(city.units_requested, 6);
        assert_eq!(city.priority, Priority::Critical);
        assert_eq!(city.contacted.len(), 5);
        orch.outreach().drain().await;
        assert!(fx.notifier.messages().len() >= 5);
    }

    #[tokio::test]
    async fn test_nearby_stock_offers_one_transfer() {
        let fx = Fixture::new();
        let requester = fx.hospital("H", 0.0, &[(BloodGroup::APos, 1)]);
        let provider = fx.hospital("K", 30.0, &[(BloodGroup::APos, 10)]);
        let orch = orchestrator(&fx);
        let trigger = LowInventoryTrigger {
            hospital_id: requester.id.clone(),
            blood_group: BloodGroup::APos,
            units_needed: 3,
        };

        let first = orch.handle_low_inventory(trigger.clone()).await;
        assert!(first.success);
        let WorkflowOutcome::TransferAvailable { recommended, request, .. } = &first.outcome else {
            panic!("unexpected {:?}", first.outcome);
        };
        assert_eq!(recommended.hospital_id, provider.id);
        assert!(matches!(request, RequestCreation::Created { .. }));
        assert!(first.explanation.contains("K holds 10 units of A+"));

        let second = orch.handle_low_inventory(trigger).await;
        let WorkflowOutcome::TransferAvailable { request, .. } = &second.outcome else {
            panic!("unexpected {:?}", second.outcome);
        };
        assert_eq!(request, &RequestCreation::AlreadyPending);

        let pending = fx.store.transfer_requests_from(&requester.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].to_hospital_id, provider.id);
        assert_eq!(pending[0].units, 3);
        assert_eq!(pending[0].status, TransferStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfer_triggers_move_stock_once() {
        let fx = Fixture::new();
        let requester = fx.hospital("H", 0.0, &[(BloodGroup::APos, 1)]);
        let provider = fx.hospital("K", 30.0, &[(BloodGroup::APos, 10)]);
        let orch = Arc::new(orchestrator(&fx));
        let trigger = LowInventoryTrigger {
            hospital_id: requester.id.clone(),
            blood_group: BloodGroup::APos,
            units_needed: 3,
        };

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                let trigger = trigger.clone();
                tokio::spawn(async move { orch.handle_low_inventory(trigger).await })
            })
            .collect();
        let mut created = 0;
        for run in runs {
            let report = run.await.unwrap();
            match report.outcome {
                WorkflowOutcome::TransferAvailable {
                    request: RequestCreation::Created { .. },
                    ..
                } => created += 1,
                WorkflowOutcome::TransferAvailable {
                    request: RequestCreation::AlreadyPending,
                    ..
                } => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(created, 1);
        let requests = fx.store.transfer_requests_from(&requester.id).unwrap();
        assert_eq!(requests.len(), 1);
        let request_id = requests[0].id.clone();

        let accepts: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                let id = request_id.clone();
                tokio::spawn(async move { orch.accept_transfer(&id, TransferDecision::default()).await })
            })
            .collect();
        let mut accepted = 0;
        for accept in accepts {
            let report = accept.await.unwrap();
            match &report.outcome {
                WorkflowOutcome::TransferAccepted { .. } => accepted += 1,
                WorkflowOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::AlreadyProcessed),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(fx.stock(&provider.id, BloodGroup::APos), 7);
        assert_eq!(fx.stock(&requester.id, BloodGroup::APos), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_donor_searches_notify_each_donor_once() {
        let fx = Fixture::new();
        let hospital = fx.hospital("City", 0.0, &[(BloodGroup::BNeg, 0)]);
        let donors: Vec<_> = (1..=3).map(|km| fx.donor(BloodGroup::BNeg, f64::from(km))).collect();
        let orch = Arc::new(orchestrator(&fx));
        let trigger = LowInventoryTrigger {
            hospital_id: hospital.id.clone(),
            blood_group: BloodGroup::BNeg,
            units_needed: 2,
        };

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                let trigger = trigger.clone();
                tokio::spawn(async move { orch.handle_low_inventory(trigger).await })
            })
            .collect();
        let mut contacted = 0;
        for run in runs {
            let report = run.await.unwrap();
            let WorkflowOutcome::DonorSearchInitiated { contact, .. } = &report.outcome else {
                panic!("unexpected {:?}", report.outcome);
            };
            contacted += contact.contacted.len();
        }
        assert_eq!(contacted, donors.len());
        for donor in &donors {
            assert_eq!(fx.store.notifications_for_donor(&donor.id).unwrap().len(), 1);
        }
        orch.outreach().drain().await;
        assert_eq!(fx.notifier.messages().len(), donors.len());
    }

    #[tokio::test]
    async fn test_accept_after_stock_drop_fails_and_stays_pending() {
        let fx = Fixture::new();
        let requester = fx.hospital("H", 0.0, &[(BloodGroup::APos, 1)]);
        let provider = fx.hospital("K", 30.0, &[(BloodGroup::APos, 10)]);
        let orch = orchestrator(&fx);
        orch.handle_low_inventory(LowInventoryTrigger {
            hospital_id: requester.id.clone(),
            blood_group: BloodGroup::APos,
            units_needed: 3,
        })
        .await;
        let request_id = fx.store.transfer_requests_from(&requester.id).unwrap()[0].id.clone();
        fx.store.set_stock(&provider.id, BloodGroup::APos, 2).unwrap();

        let report = orch.accept_transfer(&request_id, TransferDecision::default()).await;
        assert!(!report.success);
        let WorkflowOutcome::Failed { kind, .. } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        assert_eq!(*kind, FailureKind::InsufficientStock);
        assert!(report.explanation.starts_with("Workflow failed (insufficient_stock)"));
        let request = fx.store.get_transfer_request(&request_id).unwrap().unwrap();
        assert_eq!(request.status, TransferStatus::Pending);
        assert_eq!(fx.stock(&provider.id, BloodGroup::APos), 2);
        assert_eq!(fx.stock(&requester.id, BloodGroup::APos), 1);

        fx.store.set_stock(&provider.id, BloodGroup::APos, 10).unwrap();
        let accepted = orch.accept_transfer(&request_id, TransferDecision::default()).await;
        assert!(accepted.success);
        assert_eq!(fx.stock(&provider.id, BloodGroup::APos), 7);
        assert_eq!(fx.stock(&requester.id, BloodGroup::APos), 4);
    }

    #[tokio::test]
    async fn test_reject_transfer_contacts_donors_for_requester() {
        let fx = Fixture::new();
        let requester = fx.hospital("H", 0.0, &[(BloodGroup::BPos, 0)]);
        fx.hospital("K", 10.0, &[(BloodGroup::BPos, 8)]);
        let donor = fx.donor(BloodGroup::BPos, 2.0);
        let orch = orchestrator(&fx);
        orch.handle_low_inventory(LowInventoryTrigger {
            hospital_id: requester.id.clone(),
            blood_group: BloodGroup::BPos,
            units_needed: 2,
        })
        .await;
        let request_id = fx.store.transfer_requests_from(&requester.id).unwrap()[0].id.clone();

        let report = orch
            .reject_transfer(
                &request_id,
                TransferDecision {
                    message: Some("reserved for surgery".into()),
                },
            )
            .await;
        assert!(report.success);
        let WorkflowOutcome::TransferRejected { fallback, .. } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        assert_eq!(fallback.as_ref().unwrap().contacted, vec![donor.id.clone()]);

        let again = orch.reject_transfer(&request_id, TransferDecision::default()).await;
        let WorkflowOutcome::Failed { kind, .. } = &again.outcome else {
            panic!("unexpected {:?}", again.outcome);
        };
        assert_eq!(*kind, FailureKind::AlreadyProcessed);
    }

    #[tokio::test]
    async fn test_critical_emergency_checks_stock_per_case() {
        let fx = Fixture::new();
        let hospital = fx.hospital("Trauma", 0.0, &[]);
        fx.hospital("Depot", 15.0, &[(BloodGroup::OPos, 200)]);
        fx.donor(BloodGroup::OPos, 45.0);
        fx.donor(BloodGroup::OPos, 55.0);
        let orch = orchestrator(&fx);

        let report = orch
            .handle_emergency(EmergencyTrigger {
                hospital_id: Some(hospital.id.clone()),
                blood_group: Some(BloodGroup::OPos),
                units_needed: Some(120),
                severity: Some(Severity::Critical),
                ..EmergencyTrigger::default()
            })
            .await;
        assert!(report.success);
        let WorkflowOutcome::EmergencyHandled { cases, stock_checks, .. } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        assert_eq!(cases[0].search_radius_km, 50.0);
        assert_eq!(cases[0].donors_contacted, 1);
        assert_eq!(stock_checks.len(), 1);
        assert!(stock_checks[0].has_stock_nearby);
    }

    #[tokio::test]
    async fn test_manual_emergency_requires_blood_group() {
        let fx = Fixture::new();
        let report = orchestrator(&fx).handle_emergency(EmergencyTrigger::default()).await;
        let WorkflowOutcome::Failed { kind, .. } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        assert_eq!(*kind, FailureKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_donor_journey_from_acceptance_to_arrival() {
        let fx = Fixture::new();
        let hospital = fx.hospital("City", 0.0, &[(BloodGroup::BPos, 0)]);
        let donor = fx.donor(BloodGroup::BPos, 5.0);
        let orch = orchestrator(&fx);
        let search = orch
            .handle_low_inventory(LowInventoryTrigger {
                hospital_id: hospital.id.clone(),
                blood_group: BloodGroup::BPos,
                units_needed: 1,
            })
            .await;
        assert_eq!(search.outcome.action(), "donor_search_initiated");
        let request_id = fx.store.notifications_for_donor(&donor.id).unwrap()[0].request_id.clone();

        let planned = orch
            .handle_donor_accepted(DonorAcceptedTrigger {
                request_id: request_id.clone(),
                donor_id: donor.id.clone(),
                hospital_id: None,
            })
            .await;
        assert!(planned.success, "{:?}", planned.outcome);
        let WorkflowOutcome::RoutePlanned { route } = &planned.outcome else {
            panic!("unexpected {:?}", planned.outcome);
        };
        assert_eq!(route.hospital_id, hospital.id);
        assert_eq!(route.planned_duration_min, 12);
        let notification = fx.store.find_notification_by_request(&request_id).unwrap().unwrap();
        assert_eq!(notification.status, NotificationStatus::Responded);
        assert_eq!(notification.response, Some(DonorResponse::Accepted));

        let near = north(3.2);
        let moving = orch
            .handle_location_update(LocationTrigger {
                request_id: request_id.clone(),
                latitude: near.latitude,
                longitude: near.longitude,
            })
            .await;
        let WorkflowOutcome::LocationUpdated { update } = &moving.outcome else {
            panic!("unexpected {:?}", moving.outcome);
        };
        assert!(!update.delayed);

        let far = north(20.0);
        let delayed = orch
            .handle_location_update(LocationTrigger {
                request_id: request_id.clone(),
                latitude: far.latitude,
                longitude: far.longitude,
            })
            .await;
        let WorkflowOutcome::LocationUpdated { update } = &delayed.outcome else {
            panic!("unexpected {:?}", delayed.outcome);
        };
        assert!(update.delayed && update.backup_triggered);
        assert!(delayed.explanation.contains("backup donor search was started"));

        let arrived = orch
            .handle_arrival(ArrivalTrigger {
                request_id: request_id.clone(),
            })
            .await;
        let WorkflowOutcome::Arrived { tracking } = &arrived.outcome else {
            panic!("unexpected {:?}", arrived.outcome);
        };
        assert_eq!(tracking.status, TrackingStatus::Arrived);
        assert_eq!(arrived.explanation, format!("Donor for request {request_id} arrived at 09:30 UTC."));

        let reaccepted = orch
            .handle_donor_accepted(DonorAcceptedTrigger {
                request_id: request_id.clone(),
                donor_id: donor.id.clone(),
                hospital_id: None,
            })
            .await;
        let WorkflowOutcome::Failed { kind, .. } = &reaccepted.outcome else {
            panic!("unexpected {:?}", reaccepted.outcome);
        };
        assert_eq!(*kind, FailureKind::AlreadyProcessed);
        let tracking = fx.store.get_tracking(&request_id).unwrap().unwrap();
        assert_eq!(tracking.status, TrackingStatus::Arrived);
        assert_eq!(tracking.actual_arrival, Some(t0()));
        let route = fx.store.get_route(&request_id).unwrap().unwrap();
        assert_eq!(route.status, RouteStatus::Completed);
        assert!(route.backup_triggered_at.is_some());

        let late_ping = orch
            .handle_location_update(LocationTrigger {
                request_id: request_id.clone(),
                latitude: far.latitude,
                longitude: far.longitude,
            })
            .await;
        assert!(!late_ping.success);

        let twice = orch.handle_arrival(ArrivalTrigger { request_id }).await;
        assert!(!twice.success);
    }

    #[tokio::test]
    async fn test_repeated_acceptance_keeps_the_planned_route() {
        let fx = Fixture::new();
        let hospital = fx.hospital("City", 0.0, &[(BloodGroup::BPos, 0)]);
        let donor = fx.donor(BloodGroup::BPos, 5.0);
        fx.donor(BloodGroup::BPos, 8.0);
        let orch = orchestrator(&fx);
        orch.handle_low_inventory(LowInventoryTrigger {
            hospital_id: hospital.id.clone(),
            blood_group: BloodGroup::BPos,
            units_needed: 1,
        })
        .await;
        let request_id = fx.store.notifications_for_donor(&donor.id).unwrap()[0].request_id.clone();
        let accept = DonorAcceptedTrigger {
            request_id: request_id.clone(),
            donor_id: donor.id.clone(),
            hospital_id: None,
        };
        assert!(orch.handle_donor_accepted(accept.clone()).await.success);

        let far = north(20.0);
        let ping = LocationTrigger {
            request_id: request_id.clone(),
            latitude: far.latitude,
            longitude: far.longitude,
        };
        let delayed = orch.handle_location_update(ping.clone()).await;
        let WorkflowOutcome::LocationUpdated { update } = &delayed.outcome else {
            panic!("unexpected {:?}", delayed.outcome);
        };
        assert!(update.backup_triggered);

        fx.clock.advance(chrono::Duration::minutes(2));
        let again = orch.handle_donor_accepted(accept).await;
        assert!(again.success, "{:?}", again.outcome);
        let WorkflowOutcome::RoutePlanned { route } = &again.outcome else {
            panic!("unexpected {:?}", again.outcome);
        };
        assert_eq!(route.created_at, t0());
        assert!(route.backup_triggered_at.is_some());

        let still = orch.handle_location_update(ping).await;
        let WorkflowOutcome::LocationUpdated { update } = &still.outcome else {
            panic!("unexpected {:?}", still.outcome);
        };
        assert!(update.delayed);
        assert!(!update.backup_triggered);
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let fx = Fixture::new();
        let report = orchestrator(&fx)
            .handle_donor_accepted(DonorAcceptedTrigger {
                request_id: "missing".into(),
                donor_id: "d".into(),
                hospital_id: None,
            })
            .await;
        assert!(!report.success);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["action"], "failed");
        assert_eq!(value["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_declined_request_cannot_be_accepted() {
        let fx = Fixture::new();
        let hospital = fx.hospital("City", 0.0, &[(BloodGroup::ANeg, 0)]);
        let donor = fx.donor(BloodGroup::ANeg, 3.0);
        let orch = orchestrator(&fx);
        orch.handle_low_inventory(LowInventoryTrigger {
            hospital_id: hospital.id.clone(),
            blood_group: BloodGroup::ANeg,
            units_needed: 1,
        })
        .await;
        let request_id = fx.store.notifications_for_donor(&donor.id).unwrap()[0].request_id.clone();

        let declined = orch
            .handle_donor_declined(DonorDeclinedTrigger {
                request_id: request_id.clone(),
            })
            .await;
        assert!(declined.success);
        assert_eq!(declined.explanation, format!("Donor declined request {request_id}."));

        let accepted = orch
            .handle_donor_accepted(DonorAcceptedTrigger {
                request_id,
                donor_id: donor.id,
                hospital_id: None,
            })
            .await;
        let WorkflowOutcome::Failed { kind, .. } = &accepted.outcome else {
            panic!("unexpected {:?}", accepted.outcome);
        };
        assert_eq!(*kind, FailureKind::AlreadyProcessed);
    }

    #[tokio::test]
    async fn test_shortage_preparation_checks_nearby_stock() {
        let fx = Fixture::new();
        let mut stock = full_stock();
        stock.retain(|(g, _)| *g != BloodGroup::APos);
        stock.push((BloodGroup::APos, 12));
        let hospital = fx.hospital("City", 0.0, &stock);
        let mut depot = full_stock();
        depot.retain(|(g, _)| *g != BloodGroup::APos);
        depot.push((BloodGroup::APos, 40));
        fx.hospital("Depot", 10.0, &depot);
        let orch = orchestrator(&fx);

        let report = orch.predict_and_prepare().await;
        assert!(report.success);
        let WorkflowOutcome::ShortagesPrepared { predictions, stock_checks } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].hospital_id, hospital.id);
        assert_eq!(predictions[0].predicted_date, t0() + chrono::Duration::days(4));
        assert!(stock_checks[0].has_stock_nearby);
    }

    #[derive(Debug)]
    struct Canned(Option<&'static str>);

    #[async_trait]
    impl Explainer for Canned {
        async fn explain(&self, _task: &str, context: &Value) -> anyhow::Result<String> {
            assert!(context.get("action").is_some());
            match self.0 {
                Some(text) => Ok(text.to_string()),
                None => anyhow::bail!("quota exceeded"),
            }
        }
    }

    #[tokio::test]
    async fn test_explainer_text_and_fallback() {
        let fx = Fixture::new();
        fx.hospital("City", 0.0, &full_stock());

        let orch = orchestrator_with(&fx, Policy::default(), Some(Arc::new(Canned(Some(" All stocked. "))) as Arc<dyn Explainer>));
        assert_eq!(orch.sweep_transfers().await.explanation, "All stocked.");

        let orch = orchestrator_with(&fx, Policy::default(), Some(Arc::new(Canned(None)) as Arc<dyn Explainer>));
        assert_eq!(
            orch.sweep_transfers().await.explanation,
            "Checked 1 hospital(s) and 0 deficit(s); nearby stock found for 0."
        );
    }

    #[tokio::test]
    async fn test_stuck_workflow_times_out() {
        let fx = Fixture::new();
        let mut policy = Policy::default();
        policy.workflow_timeout_secs = 0;
        let orch = orchestrator_with(&fx, policy, None);

        let report = orch
            .run("stuck", async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(WorkflowOutcome::RoutesRefreshed {
                    refresh: Default::default(),
                })
            })
            .await;
        let WorkflowOutcome::Failed { kind, .. } = &report.outcome else {
            panic!("unexpected {:?}", report.outcome);
        };
        assert_eq!(*kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_builder_defaults_to_log_outreach() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let orch = Orchestrator::builder(store).build().unwrap();
        assert_eq!(orch.outreach().channels(), vec![Channel::Log]);
    }
}
