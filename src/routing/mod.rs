//! Route and ETA computation.
//!
//! External providers are tried in order; the geometric estimate is always
//! last and cannot fail.

pub mod google;
pub mod openroute;

pub use google::GoogleDirections;
pub use openroute::OpenRouteService;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::geo::{haversine_km, round2, GeoPoint};
use crate::types::{RouteEstimate, RouteSource};

/// An external routing capability.
#[async_trait]
pub trait RouteProvider: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the provider found no route between the points.
    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> anyhow::Result<Option<RouteEstimate>>;
}

/// Straight-line estimate at a fixed pace.
#[derive(Debug, Clone, Copy)]
pub struct GeometricRouter {
    pub minutes_per_km: f64,
}

impl GeometricRouter {
    pub fn new(minutes_per_km: f64) -> Self {
        Self { minutes_per_km }
    }

    pub fn minutes_for(&self, distance_km: f64) -> u32 {
        let minutes = (distance_km * self.minutes_per_km).floor();
        if minutes.is_finite() && minutes > 0.0 {
            minutes.min(f64::from(u32::MAX)) as u32
        } else {
            0
        }
    }

    pub fn estimate(&self, origin: GeoPoint, destination: GeoPoint) -> RouteEstimate {
        let distance_km = haversine_km(origin, destination);
        RouteEstimate {
            distance_km: round2(distance_km),
            duration_min: self.minutes_for(distance_km),
            source: RouteSource::Estimated,
            waypoints: vec![origin, destination],
            polyline: None,
        }
    }
}

/// Provider chain with the geometric fallback.
#[derive(Debug)]
pub struct RouteResolver {
    providers: Vec<Arc<dyn RouteProvider>>,
    fallback: GeometricRouter,
}

impl RouteResolver {
    pub fn new(providers: Vec<Arc<dyn RouteProvider>>, fallback: GeometricRouter) -> Self {
        Self {
            providers,
            fallback,
        }
    }

    pub fn fallback(&self) -> &GeometricRouter {
        &self.fallback
    }

    pub async fn resolve(&self, origin: GeoPoint, destination: GeoPoint) -> RouteEstimate {
        for provider in &self.providers {
            match provider.route(origin, destination).await {
                Ok(Some(route)) => return route,
                Ok(None) => log::debug!("[ROUTING] {} found no route", provider.name()),
                Err(e) => log::warn!("[ROUTING] {} failed, trying next: {}", provider.name(), e),
            }
        }
        self.fallback.estimate(origin, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRouter;

    fn points() -> (GeoPoint, GeoPoint) {
        (GeoPoint::new(12.9716, 77.5946), GeoPoint::new(13.0827, 77.5877))
    }

    #[test]
    fn test_geometric_estimate_two_minutes_per_km() {
        let (a, b) = points();
        let route = GeometricRouter::new(2.0).estimate(a, b);
        let exact = haversine_km(a, b);
        assert_eq!(route.source, RouteSource::Estimated);
        assert_eq!(route.duration_min, (exact * 2.0).floor() as u32);
        assert!((route.distance_km - exact).abs() < 0.01);
        assert_eq!(route.waypoints, vec![a, b]);
    }

    #[tokio::test]
    async fn test_resolver_falls_through_failures() {
        let (a, b) = points();
        let failing: Arc<dyn RouteProvider> = Arc::new(ScriptedRouter::failing());
        let resolver = RouteResolver::new(vec![failing], GeometricRouter::new(2.0));
        assert_eq!(resolver.resolve(a, b).await.source, RouteSource::Estimated);

        let fixed: Arc<dyn RouteProvider> = Arc::new(ScriptedRouter::fixed(42.0, 55));
        let failing: Arc<dyn RouteProvider> = Arc::new(ScriptedRouter::failing());
        let resolver = RouteResolver::new(vec![failing, fixed], GeometricRouter::new(2.0));
        let route = resolver.resolve(a, b).await;
        assert_eq!(route.duration_min, 55);
        assert_eq!(route.source, RouteSource::OpenRoute);
    }
}
