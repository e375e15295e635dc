//! RapidAid: emergency outreach.
//!
//! An emergency reaches every eligible donor inside a severity-scaled radius
//! rather than a capped top-N, and each handled emergency is persisted as one
//! [`EmergencyCase`]. Signals come from a manual trigger or from an automatic
//! scan over hospital alerts, unanswered rare-group requests and an optional
//! incident feed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::incidents::{classify_severity, estimate_units, IncidentClassifier, IncidentFeed, KeywordClassifier};
use super::{AgentContext, AgentKind};
use crate::error::CoordinationError;
use crate::geo::{nearest, round2, GeoPoint};
use crate::outreach::OutreachMessage;
use crate::templates::{EMERGENCY_BODY, EMERGENCY_TITLE};
use crate::types::{
    new_id, BloodGroup, EmergencyCase, EmergencySource, EmergencyStatus, Hospital, HospitalStatus,
    Notification, NotificationKind, NotificationStatus, Priority, Severity,
};

fn default_units() -> u32 { 1 }

/// Emergency raised explicitly through the trigger surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualEmergency {
    #[serde(default)]
    pub hospital_id: Option<String>,
    pub blood_group: BloodGroup,
    #[serde(default = "default_units")]
    pub units_needed: u32,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
}

/// One emergency signal before it is resolved to a location.
#[derive(Debug, Clone)]
struct Signal {
    source: EmergencySource,
    hospital_id: Option<String>,
    blood_group: BloodGroup,
    units_needed: u32,
    location: Option<GeoPoint>,
    severity: Severity,
    description: Option<String>,
    alert_id: Option<String>,
}

impl From<ManualEmergency> for Signal {
    fn from(e: ManualEmergency) -> Self {
        Signal {
            source: EmergencySource::Manual,
            hospital_id: e.hospital_id,
            blood_group: e.blood_group,
            units_needed: e.units_needed.max(1),
            location: e.location,
            severity: e.severity,
            description: e.description,
            alert_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandledCase {
    pub case_id: String,
    pub hospital_id: Option<String>,
    pub blood_group: BloodGroup,
    pub units_needed: u32,
    pub severity: Severity,
    pub source: EmergencySource,
    pub search_radius_km: f64,
    pub donors_contacted: usize,
    pub total_donors_found: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSignal {
    pub source: EmergencySource,
    pub hospital_id: Option<String>,
    pub blood_group: BloodGroup,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponderReport {
    pub handled: Vec<HandledCase>,
    pub skipped: Vec<SkippedSignal>,
}

#[derive(Debug, Clone)]
pub struct EmergencyResponder {
    ctx: AgentContext,
    feed: Option<Arc<dyn IncidentFeed>>,
    classifier: Arc<dyn IncidentClassifier>,
}

impl EmergencyResponder {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            feed: None,
            classifier: Arc::new(KeywordClassifier),
        }
    }

    pub fn with_feed(mut self, feed: Arc<dyn IncidentFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IncidentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Handle one explicitly described emergency.
    pub async fn respond(&self, emergency: ManualEmergency) -> Result<ResponderReport, CoordinationError> {
        log::info!(
            "[RAPIDAID] Manual emergency: hospital={:?} group={} units={} severity={}",
            emergency.hospital_id,
            emergency.blood_group,
            emergency.units_needed,
            emergency.severity
        );
        let mut report = ResponderReport::default();
        match self.handle(Signal::from(emergency))? {
            Ok(case) => report.handled.push(case),
            Err(skipped) => report.skipped.push(skipped),
        }
        Ok(report)
    }

    /// Collect signals from every automatic source and handle each one.
    ///
    /// A failing signal is recorded as skipped and does not stop the scan.
    pub async fn scan(&self) -> Result<ResponderReport, CoordinationError> {
        let now = self.ctx.now();
        let mut signals = self.alert_signals(now)?;
        let mut report = ResponderReport::default();
        let (rare, recently_handled) = self.rare_request_signals(now)?;
        signals.extend(rare);
        report.skipped.extend(recently_handled);
        signals.extend(self.feed_signals().await);
        log::info!("[RAPIDAID] Emergency scan found {} signals", signals.len());

        for signal in signals {
            let skipped = SkippedSignal {
                source: signal.source,
                hospital_id: signal.hospital_id.clone(),
                blood_group: signal.blood_group,
                reason: String::new(),
            };
            match self.handle(signal) {
                Ok(Ok(case)) => report.handled.push(case),
                Ok(Err(s)) => report.skipped.push(s),
                Err(e) => {
                    log::error!(
                        "[RAPIDAID] {} signal for {:?} failed: {}",
                        skipped.source,
                        skipped.hospital_id,
                        e
                    );
                    report.skipped.push(SkippedSignal {
                        reason: e.to_string(),
                        ..skipped
                    });
                }
            }
        }

        self.ctx.audit(
            AgentKind::RapidAid,
            "checked_emergencies",
            json!({
                "handled": report.handled.len(),
                "skipped": report.skipped.len(),
            }),
        );
        Ok(report)
    }

    fn alert_signals(&self, now: DateTime<Utc>) -> Result<Vec<Signal>, CoordinationError> {
        let since = now - Duration::hours(self.ctx.policy.alert_lookback_hours);
        let alerts = self.ctx.store.active_hospital_alerts(since)?;
        Ok(alerts
            .into_iter()
            .map(|alert| Signal {
                source: EmergencySource::HospitalAlert,
                hospital_id: Some(alert.hospital_id),
                blood_group: alert.blood_group,
                units_needed: alert.units_needed.max(1),
                location: alert.location,
                severity: alert.severity,
                description: alert
                    .description
                    .or_else(|| Some("Hospital emergency alert".to_string())),
                alert_id: Some(alert.id),
            })
            .collect())
    }

    /// Rare-group donor requests left unanswered past the minimum age, one
    /// signal per hospital and group. Pairs already handled within the
    /// re-notify window are returned as skipped.
    fn rare_request_signals(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Signal>, Vec<SkippedSignal>), CoordinationError> {
        let policy = &self.ctx.policy;
        let pending = self.ctx.store.unanswered_notifications(
            &BloodGroup::RARE,
            now - Duration::hours(policy.rare_request_lookback_hours),
            now - Duration::minutes(policy.rare_request_min_age_minutes),
        )?;

        let recent_cutoff = now - policy.renotify_window();
        let recent: BTreeSet<(String, BloodGroup)> = self
            .ctx
            .store
            .emergency_cases()?
            .into_iter()
            .filter(|c| c.source == EmergencySource::RareBloodRequest && c.created_at >= recent_cutoff)
            .filter_map(|c| Some((c.hospital_id?, c.blood_group)))
            .collect();

        let mut seen = BTreeSet::new();
        let mut signals = Vec::new();
        let mut skipped = Vec::new();
        for n in pending {
            if n.kind != NotificationKind::BloodRequest {
                continue;
            }
            let Some(hospital_id) = n.hospital_id else { continue };
            let key = (hospital_id, n.blood_group);
            if !seen.insert(key.clone()) {
                continue;
            }
            if recent.contains(&key) {
                skipped.push(SkippedSignal {
                    source: EmergencySource::RareBloodRequest,
                    hospital_id: Some(key.0),
                    blood_group: key.1,
                    reason: "handled within the re-notify window".to_string(),
                });
                continue;
            }
            signals.push(Signal {
                source: EmergencySource::RareBloodRequest,
                hospital_id: Some(key.0),
                blood_group: key.1,
                units_needed: 1,
                location: None,
                severity: Severity::High,
                description: Some(format!("Rare blood group {} request", key.1)),
                alert_id: None,
            });
        }
        Ok((signals, skipped))
    }

    async fn feed_signals(&self) -> Vec<Signal> {
        let Some(feed) = &self.feed else {
            return Vec::new();
        };
        let incidents = match feed.poll().await {
            Ok(incidents) => incidents,
            Err(e) => {
                log::warn!("[RAPIDAID] Incident feed unavailable: {}", e);
                return Vec::new();
            }
        };

        let mut signals = Vec::new();
        for incident in incidents {
            let classification = match self.classifier.classify(&incident).await {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("[RAPIDAID] Could not classify incident {}: {}", incident.id, e);
                    continue;
                }
            };
            let severity = classify_severity(classification.casualties, classification.confidence);
            let blood_group = classification.blood_group.unwrap_or(BloodGroup::ONeg);
            let hospital_id = match (&incident.hospital_id, incident.location) {
                (Some(id), _) => Some(id.clone()),
                (None, Some(at)) => self.nearest_active_hospital(at),
                (None, None) => None,
            };
            signals.push(Signal {
                source: EmergencySource::EventFeed,
                hospital_id,
                blood_group,
                units_needed: estimate_units(
                    classification.casualties,
                    severity,
                    classification.incident_type,
                    blood_group,
                ),
                location: incident.location,
                severity,
                description: Some(incident.title),
                alert_id: None,
            });
        }
        signals
    }

    fn nearest_active_hospital(&self, at: GeoPoint) -> Option<String> {
        match self.ctx.store.list_hospitals(Some(HospitalStatus::Active)) {
            Ok(hospitals) => nearest(at, hospitals, None).into_iter().next().map(|r| r.item.id),
            Err(e) => {
                log::warn!("[RAPIDAID] Hospital lookup for incident failed: {}", e);
                None
            }
        }
    }

    /// Contact every eligible donor in range and record the case.
    ///
    /// The inner `Err` is a signal that was not acted on.
    fn handle(&self, signal: Signal) -> Result<Result<HandledCase, SkippedSignal>, CoordinationError> {
        let hospital: Option<Hospital> = match &signal.hospital_id {
            Some(id) => Some(
                self.ctx
                    .store
                    .get_hospital(id)?
                    .ok_or_else(|| CoordinationError::not_found("hospital", id.clone()))?,
            ),
            None => None,
        };

        let Some(location) = signal
            .location
            .or_else(|| hospital.as_ref().and_then(|h| h.location))
        else {
            if signal.severity == Severity::Low {
                log::debug!("[RAPIDAID] Discarding low-severity {} signal without location", signal.source);
            } else {
                log::warn!(
                    "[RAPIDAID] No location for {} emergency ({} at {:?})",
                    signal.source,
                    signal.blood_group,
                    signal.hospital_id
                );
            }
            return Ok(Err(SkippedSignal {
                source: signal.source,
                hospital_id: signal.hospital_id,
                blood_group: signal.blood_group,
                reason: "no resolvable location".to_string(),
            }));
        };

        let now = self.ctx.now();
        let policy = &self.ctx.policy;
        let radius = policy.search_radius_km(signal.severity);
        let eligible = self
            .ctx
            .store
            .donors_by_blood_group(signal.blood_group)?
            .into_iter()
            .filter(|d| d.is_eligible_at(now, policy.donor_cooldown()));
        let in_range = nearest(location, eligible, Some(radius));

        let hospital_name = hospital.as_ref().map_or("Hospital", |h| h.name.as_str());
        let context = json!({
            "hospital_name": hospital_name,
            "blood_group": signal.blood_group.as_str(),
        });
        let title = self.ctx.templates.render(EMERGENCY_TITLE, &context)?;
        let body = self.ctx.templates.render(EMERGENCY_BODY, &context)?;
        let since = now - policy.renotify_window();

        let mut contacted = 0;
        for ranked in &in_range {
            let donor = &ranked.item;
            let notification = Notification {
                id: new_id(),
                request_id: new_id(),
                kind: NotificationKind::EmergencyRequest,
                donor_id: donor.id.clone(),
                hospital_id: signal.hospital_id.clone(),
                blood_group: signal.blood_group,
                units_needed: signal.units_needed,
                priority: Priority::Critical,
                distance_km: round2(ranked.distance_km),
                title: title.clone(),
                message: body.clone(),
                created_at: now,
                read: false,
                status: NotificationStatus::Pending,
                response: None,
                responded_at: None,
            };
            if !self.ctx.store.insert_notification_unless_recent(&notification, since)? {
                log::debug!("[RAPIDAID] Donor {} notified within the last window, skipping", donor.id);
                continue;
            }
            self.ctx.outreach.dispatch(OutreachMessage {
                donor_id: donor.id.clone(),
                phone: donor.phone.clone(),
                body: body.clone(),
                request_id: notification.request_id,
                hospital_id: signal.hospital_id.clone(),
                blood_group: signal.blood_group,
                emergency: true,
            });
            contacted += 1;
        }

        let case = EmergencyCase {
            id: new_id(),
            hospital_id: signal.hospital_id.clone(),
            blood_group: signal.blood_group,
            units_needed: signal.units_needed,
            location,
            severity: signal.severity,
            source: signal.source,
            description: signal.description.clone(),
            search_radius_km: radius,
            donors_contacted: contacted,
            total_donors_found: in_range.len(),
            status: EmergencyStatus::Active,
            created_at: now,
        };
        self.ctx.store.insert_emergency_case(&case)?;

        if let Some(alert_id) = &signal.alert_id {
            if let Err(e) = self.ctx.store.mark_alert_handled(alert_id) {
                log::warn!("[RAPIDAID] Could not mark alert {} handled: {}", alert_id, e);
            }
        }

        log::info!(
            "[RAPIDAID] Emergency {} ({} {}): contacted {} of {} donors within {} km",
            case.id,
            case.severity,
            case.blood_group,
            contacted,
            in_range.len(),
            radius
        );
        self.ctx.audit(
            AgentKind::RapidAid,
            "emergency_handled",
            json!({
                "emergency_id": case.id,
                "source": case.source,
                "donors_contacted": contacted,
                "total_donors_found": in_range.len(),
            }),
        );

        Ok(Ok(HandledCase {
            case_id: case.id,
            hospital_id: case.hospital_id,
            blood_group: case.blood_group,
            units_needed: case.units_needed,
            severity: case.severity,
            source: case.source,
            search_radius_km: radius,
            donors_contacted: contacted,
            total_donors_found: case.total_donors_found,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::incidents::Incident;
    use crate::store::Store;
    use crate::testing::{north, t0, Fixture};
    use crate::types::{AlertStatus, HospitalAlert};
    use async_trait::async_trait;

    fn manual(hospital_id: &str, group: BloodGroup, severity: Severity) -> ManualEmergency {
        ManualEmergency {
            hospital_id: Some(hospital_id.to_string()),
            blood_group: group,
            units_needed: 4,
            location: None,
            severity,
            description: None,
        }
    }

    fn pending_request(
        donor_id: &str,
        hospital_id: &str,
        group: BloodGroup,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Notification {
        Notification {
            id: new_id(),
            request_id: new_id(),
            kind,
            donor_id: donor_id.to_string(),
            hospital_id: Some(hospital_id.to_string()),
            blood_group: group,
            units_needed: 1,
            priority: Priority::Critical,
            distance_km: 1.0,
            title: "t".into(),
            message: "m".into(),
            created_at: at,
            read: false,
            status: NotificationStatus::Pending,
            response: None,
            responded_at: None,
        }
    }

    #[tokio::test]
    async fn test_critical_emergency_reaches_all_donors_within_fifty_km() {
        let fx = Fixture::new();
        let hospital = fx.hospital("Trauma", 0.0, &[]);
        let recent = fx.donor(BloodGroup::APos, 5.0);
        let d10 = fx.donor(BloodGroup::APos, 10.0);
        let d40 = fx.donor(BloodGroup::APos, 40.0);
        fx.donor(BloodGroup::APos, 60.0);
        fx.store
            .insert_notification_unless_recent(
                &pending_request(
                    &recent.id,
                    &hospital.id,
                    BloodGroup::APos,
                    NotificationKind::EmergencyRequest,
                    t0() - Duration::minutes(30),
                ),
                t0() - Duration::hours(1),
            )
            .unwrap();

        let responder = EmergencyResponder::new(fx.ctx.clone());
        let report = responder
            .respond(manual(&hospital.id, BloodGroup::APos, Severity::Critical))
            .await
            .unwrap();

        assert!(report.skipped.is_empty());
        let case = &report.handled[0];
        assert_eq!(case.search_radius_km, 50.0);
        assert_eq!(case.total_donors_found, 3);
        assert_eq!(case.donors_contacted, 2);
        let mut delivered = fx.delivered().await;
        delivered.sort();
        let mut expected = vec![d10.id.clone(), d40.id.clone()];
        expected.sort();
        assert_eq!(delivered, expected);

        let stored = fx.store.get_emergency_case(&case.case_id).unwrap().unwrap();
        assert_eq!(stored.donors_contacted, 2);
        assert_eq!(stored.status, EmergencyStatus::Active);

        // Outside the window the earlier donor is contacted again.
        fx.clock.advance(Duration::minutes(61));
        let again = responder
            .respond(manual(&hospital.id, BloodGroup::APos, Severity::Critical))
            .await
            .unwrap();
        assert_eq!(again.handled[0].donors_contacted, 3);
    }

    #[tokio::test]
    async fn test_non_critical_radius_is_twenty_five_km() {
        let fx = Fixture::new();
        let hospital = fx.hospital("Trauma", 0.0, &[]);
        fx.donor(BloodGroup::OPos, 20.0);
        fx.donor(BloodGroup::OPos, 40.0);

        let report = EmergencyResponder::new(fx.ctx.clone())
            .respond(manual(&hospital.id, BloodGroup::OPos, Severity::High))
            .await
            .unwrap();
        assert_eq!(report.handled[0].search_radius_km, 25.0);
        assert_eq!(report.handled[0].total_donors_found, 1);
    }

    #[tokio::test]
    async fn test_signal_without_location_is_skipped() {
        let fx = Fixture::new();
        let nowhere = Hospital::new("Nowhere");
        fx.store.insert_hospital(&nowhere).unwrap();
        let responder = EmergencyResponder::new(fx.ctx.clone());

        for severity in [Severity::Low, Severity::High] {
            let report = responder
                .respond(manual(&nowhere.id, BloodGroup::BPos, severity))
                .await
                .unwrap();
            assert!(report.handled.is_empty());
            assert_eq!(report.skipped[0].reason, "no resolvable location");
        }
        assert!(fx.store.emergency_cases().unwrap().is_empty());

        let err = responder
            .respond(manual("missing", BloodGroup::BPos, Severity::High))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_scan_handles_hospital_alert_once() {
        let fx = Fixture::new();
        let hospital = fx.hospital("Trauma", 0.0, &[]);
        fx.donor(BloodGroup::BNeg, 3.0);
        let alert = HospitalAlert {
            id: new_id(),
            hospital_id: hospital.id.clone(),
            blood_group: BloodGroup::BNeg,
            units_needed: 2,
            location: None,
            severity: Severity::Critical,
            description: None,
            status: AlertStatus::Active,
            created_at: t0() - Duration::hours(1),
        };
        fx.store.insert_hospital_alert(&alert).unwrap();
        let responder = EmergencyResponder::new(fx.ctx.clone());

        let report = responder.scan().await.unwrap();
        assert_eq!(report.handled.len(), 1);
        assert_eq!(report.handled[0].source, EmergencySource::HospitalAlert);
        assert_eq!(report.handled[0].donors_contacted, 1);
        assert!(fx.store.active_hospital_alerts(t0() - Duration::days(1)).unwrap().is_empty());

        let again = responder.scan().await.unwrap();
        assert!(again.handled.is_empty());
    }

    #[tokio::test]
    async fn test_scan_escalates_unanswered_rare_requests() {
        let fx = Fixture::new();
        let hospital = fx.hospital("Trauma", 0.0, &[]);
        let donor = fx.donor(BloodGroup::ONeg, 2.0);
        let other = fx.donor(BloodGroup::ONeg, 4.0);
        for (d, age) in [(&donor, 3), (&other, 5)] {
            let n = pending_request(
                &d.id,
                &hospital.id,
                BloodGroup::ONeg,
                NotificationKind::BloodRequest,
                t0() - Duration::hours(age),
            );
            assert!(fx.store.insert_notification_unless_open(&n).unwrap());
        }
        let fresh = fx.donor(BloodGroup::AbNeg, 1.0);
        let n = pending_request(
            &fresh.id,
            &hospital.id,
            BloodGroup::AbNeg,
            NotificationKind::BloodRequest,
            t0() - Duration::minutes(30),
        );
        fx.store.insert_notification_unless_open(&n).unwrap();

        let responder = EmergencyResponder::new(fx.ctx.clone());
        let report = responder.scan().await.unwrap();
        assert_eq!(report.handled.len(), 1);
        let case = &report.handled[0];
        assert_eq!(case.source, EmergencySource::RareBloodRequest);
        assert_eq!(case.blood_group, BloodGroup::ONeg);
        assert_eq!(case.severity, Severity::High);
        assert_eq!(case.units_needed, 1);

        fx.clock.advance(Duration::minutes(10));
        let again = responder.scan().await.unwrap();
        assert!(again.handled.is_empty());
        assert_eq!(again.skipped.len(), 1);
    }

    #[derive(Debug)]
    struct OneIncident(Incident);

    #[async_trait]
    impl IncidentFeed for OneIncident {
        async fn poll(&self) -> anyhow::Result<Vec<Incident>> {
            Ok(vec![self.0.clone()])
        }
    }

    #[tokio::test]
    async fn test_feed_incident_goes_to_nearest_hospital() {
        let fx = Fixture::new();
        fx.hospital("Far", 30.0, &[]);
        let near = fx.hospital("Near", 2.0, &[]);
        fx.donor(BloodGroup::AbNeg, 1.0);
        let incident = Incident {
            id: "i1".into(),
            title: "Bus crash on ring road".into(),
            description: "12 injured, AB- blood needed".into(),
            location: Some(north(0.0)),
            hospital_id: None,
            reported_at: t0(),
        };

        let responder = EmergencyResponder::new(fx.ctx.clone()).with_feed(Arc::new(OneIncident(incident)));
        let report = responder.scan().await.unwrap();
        let case = &report.handled[0];
        assert_eq!(case.source, EmergencySource::EventFeed);
        assert_eq!(case.hospital_id.as_deref(), Some(near.id.as_str()));
        assert_eq!(case.severity, Severity::High);
        assert_eq!(case.units_needed, 23);
        assert_eq!(case.donors_contacted, 1);
    }
}
