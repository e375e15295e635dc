//! PathFinder: donor routing, live tracking and delay handling.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AgentContext, AgentKind, ContactSummary, DonorContact};
use crate::error::CoordinationError;
use crate::geo::{haversine_km, round2, GeoPoint};
use crate::routing::RouteResolver;
use crate::store::TrackingProgress;
use crate::types::{
    DonorRoute, DonorTracking, LocationFix, RouteStatus, TrackingStatus,
};

/// Result of one position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub request_id: String,
    pub remaining_distance_km: f64,
    pub estimated_remaining_min: u32,
    pub estimated_arrival: DateTime<Utc>,
    pub delayed: bool,
    /// Whether this report claimed the backup donor search.
    pub backup_triggered: bool,
    pub backup: Option<ContactSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRefresh {
    pub checked: usize,
    pub updated: usize,
}

#[derive(Debug, Clone)]
pub struct RoutePlanner {
    ctx: AgentContext,
    routes: Arc<RouteResolver>,
    donors: Arc<dyn DonorContact>,
}

impl RoutePlanner {
    pub fn new(ctx: AgentContext, routes: Arc<RouteResolver>, donors: Arc<dyn DonorContact>) -> Self {
        Self { ctx, routes, donors }
    }

    fn endpoints(&self, donor_id: &str, hospital_id: &str) -> Result<(GeoPoint, GeoPoint), CoordinationError> {
        let donor = self
            .ctx
            .store
            .get_donor(donor_id)?
            .ok_or_else(|| CoordinationError::not_found("donor", donor_id))?;
        let hospital = self
            .ctx
            .store
            .get_hospital(hospital_id)?
            .ok_or_else(|| CoordinationError::not_found("hospital", hospital_id))?;
        let origin = donor
            .location
            .ok_or_else(|| CoordinationError::InvalidState(format!("donor {donor_id} has no location")))?;
        let destination = hospital
            .location
            .ok_or_else(|| CoordinationError::InvalidState(format!("hospital {hospital_id} has no location")))?;
        Ok((origin, destination))
    }

    fn hospital_location(&self, hospital_id: &str) -> Result<GeoPoint, CoordinationError> {
        self.ctx
            .store
            .get_hospital(hospital_id)?
            .ok_or_else(|| CoordinationError::not_found("hospital", hospital_id))?
            .location
            .ok_or_else(|| CoordinationError::InvalidState(format!("hospital {hospital_id} has no location")))
    }

    /// A request keeps the route it was first planned with. Planning it
    /// again returns that route while it is active and fails once it is
    /// completed.
    fn existing_route(&self, route: DonorRoute) -> Result<DonorRoute, CoordinationError> {
        if route.status == RouteStatus::Completed {
            return Err(CoordinationError::AlreadyProcessed {
                entity: "route",
                id: route.request_id,
            });
        }
        log::info!("[PATHFINDER] Route for {} already planned", route.request_id);
        Ok(route)
    }

    /// Compute the route for an accepted request and start tracking.
    pub async fn plan(
        &self,
        request_id: &str,
        donor_id: &str,
        hospital_id: &str,
    ) -> Result<DonorRoute, CoordinationError> {
        if let Some(route) = self.ctx.store.get_route(request_id)? {
            return self.existing_route(route);
        }
        let (origin, destination) = self.endpoints(donor_id, hospital_id)?;
        let plan = self.routes.resolve(origin, destination).await;
        let now = self.ctx.now();
        let eta = now + Duration::minutes(i64::from(plan.duration_min));

        let route = DonorRoute {
            request_id: request_id.to_string(),
            donor_id: donor_id.to_string(),
            hospital_id: hospital_id.to_string(),
            planned_duration_min: plan.duration_min,
            plan,
            status: RouteStatus::Active,
            created_at: now,
            estimated_arrival: eta,
            last_updated: now,
            completed_at: None,
            backup_triggered_at: None,
        };
        if !self.ctx.store.insert_route(&route)? {
            let stored = self
                .ctx
                .store
                .get_route(request_id)?
                .ok_or_else(|| CoordinationError::not_found("route", request_id))?;
            return self.existing_route(stored);
        }
        self.ctx.store.start_tracking(&DonorTracking {
            request_id: request_id.to_string(),
            donor_id: donor_id.to_string(),
            status: TrackingStatus::Tracking,
            started_at: now,
            last_location: None,
            remaining_distance_km: Some(route.plan.distance_km),
            estimated_remaining_min: Some(route.plan.duration_min),
            estimated_arrival: Some(eta),
            actual_arrival: None,
            last_updated: now,
        })?;
        self.ctx.store.publish_update(
            request_id,
            hospital_id,
            &json!({
                "type": "route_planned",
                "donor_id": donor_id,
                "distance_km": route.plan.distance_km,
                "duration_min": route.plan.duration_min,
                "estimated_arrival": eta,
                "source": route.plan.source,
            }),
            now,
        )?;

        log::info!(
            "[PATHFINDER] Route for {}: {} km, {} min via {}",
            request_id,
            route.plan.distance_km,
            route.plan.duration_min,
            route.plan.source
        );
        self.ctx.audit(
            AgentKind::PathFinder,
            "route_calculated",
            json!({
                "request_id": request_id,
                "donor_id": donor_id,
                "hospital_id": hospital_id,
                "distance_km": route.plan.distance_km,
                "duration_min": route.plan.duration_min,
            }),
        );
        Ok(route)
    }

    /// Record a donor position, publish the new estimate and handle delays.
    ///
    /// A delay claims the route's backup slot atomically, so only the first
    /// delayed report (or the first after the re-arm window) reroutes and
    /// searches for a backup donor. The original donor keeps the assignment.
    pub async fn update_location(
        &self,
        request_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationUpdate, CoordinationError> {
        let position = GeoPoint::new(latitude, longitude);
        if !position.is_valid() {
            return Err(CoordinationError::InvalidInput(format!(
                "invalid coordinates ({latitude}, {longitude})"
            )));
        }
        let tracking = self
            .ctx
            .store
            .get_tracking(request_id)?
            .ok_or_else(|| CoordinationError::not_found("tracking", request_id))?;
        if tracking.status == TrackingStatus::Arrived {
            return Err(CoordinationError::InvalidState(format!(
                "donor for {request_id} has already arrived"
            )));
        }
        let route = self
            .ctx
            .store
            .get_route(request_id)?
            .ok_or_else(|| CoordinationError::not_found("route", request_id))?;
        let destination = self.hospital_location(&route.hospital_id)?;

        let now = self.ctx.now();
        let remaining_km = haversine_km(position, destination);
        let remaining_min = self.routes.fallback().minutes_for(remaining_km);
        let eta = now + Duration::minutes(i64::from(remaining_min));
        let progress = TrackingProgress {
            fix: LocationFix {
                location: position,
                recorded_at: now,
            },
            remaining_distance_km: round2(remaining_km),
            estimated_remaining_min: remaining_min,
            estimated_arrival: eta,
        };
        if !self.ctx.store.record_progress(request_id, &progress)? {
            return Err(CoordinationError::InvalidState(format!(
                "donor for {request_id} has already arrived"
            )));
        }

        let delayed = self.ctx.policy.is_delayed(remaining_min, route.planned_duration_min);
        self.ctx.store.publish_update(
            request_id,
            &route.hospital_id,
            &json!({
                "type": "location_update",
                "donor_id": route.donor_id,
                "location": position,
                "remaining_distance_km": progress.remaining_distance_km,
                "estimated_remaining_min": remaining_min,
                "estimated_arrival": eta,
                "delayed": delayed,
            }),
            now,
        )?;

        let mut update = LocationUpdate {
            request_id: request_id.to_string(),
            remaining_distance_km: progress.remaining_distance_km,
            estimated_remaining_min: remaining_min,
            estimated_arrival: eta,
            delayed,
            backup_triggered: false,
            backup: None,
        };
        if !delayed {
            return Ok(update);
        }

        let rearm_before = self
            .ctx
            .policy
            .delay_retrigger_minutes
            .map(|m| now - Duration::minutes(m));
        if !self.ctx.store.claim_delay_backup(request_id, now, rearm_before)? {
            log::debug!("[PATHFINDER] {} still delayed, backup already triggered", request_id);
            return Ok(update);
        }
        update.backup_triggered = true;
        log::warn!(
            "[PATHFINDER] Delay on {}: {} min remaining against {} planned",
            request_id,
            remaining_min,
            route.planned_duration_min
        );

        let reroute = self.routes.resolve(position, destination).await;
        let reroute_eta = now + Duration::minutes(i64::from(reroute.duration_min));
        self.ctx
            .store
            .replace_route_plan(request_id, &reroute, reroute_eta, now)?;

        match self.ctx.store.find_notification_by_request(request_id)? {
            Some(notification) => {
                match self
                    .donors
                    .contact_nearby_donors(
                        &route.hospital_id,
                        notification.blood_group,
                        self.ctx.policy.backup_units,
                    )
                    .await
                {
                    Ok(summary) => update.backup = Some(summary),
                    Err(e) => log::error!("[PATHFINDER] Backup donor search for {} failed: {}", request_id, e),
                }
            }
            None => log::warn!(
                "[PATHFINDER] No originating request for {}, skipping backup search",
                request_id
            ),
        }

        self.ctx.audit(
            AgentKind::PathFinder,
            "delay_detected",
            json!({
                "request_id": request_id,
                "estimated_remaining_min": remaining_min,
                "planned_duration_min": route.planned_duration_min,
                "backup_contacted": update.backup.as_ref().map_or(0, |b| b.contacted.len()),
            }),
        );
        Ok(update)
    }

    /// Mark the donor as arrived and complete the route.
    pub fn mark_arrival(&self, request_id: &str) -> Result<DonorTracking, CoordinationError> {
        let now = self.ctx.now();
        if !self.ctx.store.mark_arrived(request_id, now)? {
            return Err(match self.ctx.store.get_tracking(request_id)? {
                None => CoordinationError::not_found("tracking", request_id),
                Some(_) => CoordinationError::AlreadyProcessed {
                    entity: "tracking",
                    id: request_id.to_string(),
                },
            });
        }
        if !self.ctx.store.complete_route(request_id, now)? {
            log::warn!("[PATHFINDER] No active route to complete for {}", request_id);
        }

        let tracking = self
            .ctx
            .store
            .get_tracking(request_id)?
            .ok_or_else(|| CoordinationError::not_found("tracking", request_id))?;
        if let Some(route) = self.ctx.store.get_route(request_id)? {
            self.ctx.store.publish_update(
                request_id,
                &route.hospital_id,
                &json!({
                    "type": "donor_arrived",
                    "donor_id": tracking.donor_id,
                    "arrived_at": now,
                }),
                now,
            )?;
        }

        log::info!("[PATHFINDER] Donor arrived for {}", request_id);
        self.ctx.audit(
            AgentKind::PathFinder,
            "donor_arrived",
            json!({ "request_id": request_id, "donor_id": tracking.donor_id }),
        );
        Ok(tracking)
    }

    /// Recompute recent active routes from each donor's registered location.
    pub async fn refresh_active_routes(&self) -> Result<RouteRefresh, CoordinationError> {
        let now = self.ctx.now();
        let policy = &self.ctx.policy;
        let routes = self
            .ctx
            .store
            .active_routes(now - Duration::hours(policy.route_refresh_lookback_hours))?;

        let mut report = RouteRefresh::default();
        for route in routes {
            report.checked += 1;
            let (origin, destination) = match self.endpoints(&route.donor_id, &route.hospital_id) {
                Ok(points) => points,
                Err(e) => {
                    log::debug!("[PATHFINDER] Skipping refresh of {}: {}", route.request_id, e);
                    continue;
                }
            };
            let fresh = self.routes.resolve(origin, destination).await;
            if fresh.duration_min.abs_diff(route.plan.duration_min) <= policy.route_refresh_min_change_minutes {
                continue;
            }
            let eta = now + Duration::minutes(i64::from(fresh.duration_min));
            if self
                .ctx
                .store
                .replace_route_plan(&route.request_id, &fresh, eta, now)?
            {
                report.updated += 1;
            }
        }

        self.ctx.audit(
            AgentKind::PathFinder,
            "routes_refreshed",
            json!({ "checked": report.checked, "updated": report.updated }),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::InventoryMonitor;
    use crate::clock::Clock;
    use crate::config::Policy;
    use crate::routing::{GeometricRouter, RouteProvider};
    use crate::store::Store;
    use crate::testing::{north, Fixture, ScriptedRouter};
    use crate::types::{BloodGroup, RouteSource};

    struct Setup {
        fx: Fixture,
        router: Arc<ScriptedRouter>,
        planner: RoutePlanner,
        request_id: String,
        donor_id: String,
        hospital_id: String,
    }

    /// A hospital at the base point, an O+ donor 5 km north holding an
    /// open request, and a second O+ donor available as backup.
    fn setup(policy: Policy, router: ScriptedRouter) -> Setup {
        let fx = Fixture::with_policy(policy);
        let hospital = fx.hospital("City", 0.0, &[]);
        let donor = fx.donor(BloodGroup::OPos, 5.0);
        let router = Arc::new(router);
        let monitor = Arc::new(InventoryMonitor::new(fx.ctx.clone()));
        let planner = RoutePlanner::new(
            fx.ctx.clone(),
            Arc::new(RouteResolver::new(
                vec![router.clone() as Arc<dyn RouteProvider>],
                GeometricRouter::new(2.0),
            )),
            monitor,
        );
        Setup {
            request_id: String::new(),
            donor_id: donor.id,
            hospital_id: hospital.id,
            fx,
            router,
            planner,
        }
    }

    async fn with_request(mut s: Setup) -> Setup {
        let monitor = InventoryMonitor::new(s.fx.ctx.clone());
        monitor
            .contact_nearby_donors(&s.hospital_id, BloodGroup::OPos, 1)
            .await
            .unwrap();
        s.request_id = s.fx.store.notifications_for_donor(&s.donor_id).unwrap()[0]
            .request_id
            .clone();
        s.fx.delivered().await;
        s
    }

    #[tokio::test]
    async fn test_plan_persists_route_and_starts_tracking() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(6.2, 14))).await;
        let route = s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        assert_eq!(route.plan.duration_min, 14);
        assert_eq!(route.planned_duration_min, 14);
        assert_eq!(route.estimated_arrival, s.fx.clock.now() + Duration::minutes(14));
        let tracking = s.fx.store.get_tracking(&s.request_id).unwrap().unwrap();
        assert_eq!(tracking.status, TrackingStatus::Tracking);
        let update = s.fx.store.latest_update(&s.request_id).unwrap().unwrap();
        assert_eq!(update["type"], "route_planned");
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_geometry() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::failing())).await;
        let route = s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();
        assert_eq!(route.plan.source, RouteSource::Estimated);
        assert!((9..=10).contains(&route.plan.duration_min));
    }

    #[tokio::test]
    async fn test_plan_rejects_unknown_donor() {
        let s = setup(Policy::default(), ScriptedRouter::fixed(6.0, 12));
        let err = s.planner.plan("r1", "ghost", &s.hospital_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_on_time_update_is_not_delayed() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(6.0, 12))).await;
        s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        let at = north(3.2);
        let update = s
            .planner
            .update_location(&s.request_id, at.latitude, at.longitude)
            .await
            .unwrap();
        assert_eq!(update.estimated_remaining_min, 6);
        assert!(!update.delayed);
        assert!(!update.backup_triggered);
        let tracking = s.fx.store.get_tracking(&s.request_id).unwrap().unwrap();
        assert_eq!(tracking.estimated_remaining_min, Some(6));
    }

    #[tokio::test]
    async fn test_delay_triggers_one_backup_search() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(5.0, 10))).await;
        let backup = s.fx.donor(BloodGroup::OPos, 8.0);
        s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        let far = north(20.0);
        let first = s
            .planner
            .update_location(&s.request_id, far.latitude, far.longitude)
            .await
            .unwrap();
        assert!(first.delayed);
        assert!(first.backup_triggered);
        assert_eq!(first.backup.unwrap().contacted, vec![backup.id.clone()]);
        assert_eq!(s.router.calls(), 2);

        let route = s.fx.store.get_route(&s.request_id).unwrap().unwrap();
        assert_eq!(route.planned_duration_min, 10);
        assert!(route.backup_triggered_at.is_some());

        s.fx.clock.advance(Duration::minutes(5));
        let second = s
            .planner
            .update_location(&s.request_id, far.latitude, far.longitude)
            .await
            .unwrap();
        assert!(second.delayed);
        assert!(!second.backup_triggered);
        assert_eq!(s.router.calls(), 2);
    }

    #[tokio::test]
    async fn test_delay_backup_rearms_after_window() {
        let mut policy = Policy::default();
        policy.delay_retrigger_minutes = Some(30);
        let s = with_request(setup(policy, ScriptedRouter::fixed(5.0, 10))).await;
        s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        let far = north(20.0);
        let first = s.planner.update_location(&s.request_id, far.latitude, far.longitude).await.unwrap();
        assert!(first.backup_triggered);

        s.fx.clock.advance(Duration::minutes(10));
        let early = s.planner.update_location(&s.request_id, far.latitude, far.longitude).await.unwrap();
        assert!(!early.backup_triggered);

        s.fx.clock.advance(Duration::minutes(25));
        let rearmed = s.planner.update_location(&s.request_id, far.latitude, far.longitude).await.unwrap();
        assert!(rearmed.backup_triggered);
    }

    #[tokio::test]
    async fn test_arrival_is_terminal() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(6.0, 12))).await;
        s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        let tracking = s.planner.mark_arrival(&s.request_id).unwrap();
        assert_eq!(tracking.status, TrackingStatus::Arrived);
        assert_eq!(tracking.actual_arrival, Some(s.fx.clock.now()));
        let route = s.fx.store.get_route(&s.request_id).unwrap().unwrap();
        assert_eq!(route.status, RouteStatus::Completed);
        assert_eq!(route.completed_at, Some(s.fx.clock.now()));

        let err = s.planner.mark_arrival(&s.request_id).unwrap_err();
        assert!(matches!(err, CoordinationError::AlreadyProcessed { .. }));
        let at = north(1.0);
        let err = s
            .planner
            .update_location(&s.request_id, at.latitude, at.longitude)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidState(_)));
        assert!(s.planner.mark_arrival("unknown").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_replanning_keeps_route_state() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(5.0, 10))).await;
        s.fx.donor(BloodGroup::OPos, 8.0);
        let first = s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        let far = north(20.0);
        let delayed = s.planner.update_location(&s.request_id, far.latitude, far.longitude).await.unwrap();
        assert!(delayed.backup_triggered);
        let calls = s.router.calls();

        s.fx.clock.advance(Duration::minutes(3));
        let again = s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();
        assert_eq!(again.created_at, first.created_at);
        assert!(again.backup_triggered_at.is_some());
        assert_eq!(s.router.calls(), calls);

        let still = s.planner.update_location(&s.request_id, far.latitude, far.longitude).await.unwrap();
        assert!(still.delayed);
        assert!(!still.backup_triggered);

        s.planner.mark_arrival(&s.request_id).unwrap();
        let err = s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::AlreadyProcessed { .. }));
        let tracking = s.fx.store.get_tracking(&s.request_id).unwrap().unwrap();
        assert_eq!(tracking.status, TrackingStatus::Arrived);
        assert!(tracking.actual_arrival.is_some());
    }

    #[tokio::test]
    async fn test_invalid_coordinates_are_rejected() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(6.0, 12))).await;
        s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();
        let err = s.planner.update_location(&s.request_id, 95.0, 0.0).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_refresh_replaces_plans_that_moved() {
        let s = with_request(setup(Policy::default(), ScriptedRouter::fixed(6.0, 20))).await;
        s.planner.plan(&s.request_id, &s.donor_id, &s.hospital_id).await.unwrap();

        s.router.set(6.0, 23);
        let small = s.planner.refresh_active_routes().await.unwrap();
        assert_eq!(small, RouteRefresh { checked: 1, updated: 0 });

        s.router.set(6.5, 31);
        let moved = s.planner.refresh_active_routes().await.unwrap();
        assert_eq!(moved, RouteRefresh { checked: 1, updated: 1 });
        let route = s.fx.store.get_route(&s.request_id).unwrap().unwrap();
        assert_eq!(route.plan.duration_min, 31);
        assert_eq!(route.planned_duration_min, 20);
    }
}
