//! Great-circle distance and nearest-neighbour ranking.
//!
//! Pure functions only. All distances in the crate use the same Earth
//! radius, [`EARTH_RADIUS_KM`].

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(*self, *other)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Anything that may carry a position.
pub trait Located {
    fn location(&self) -> Option<GeoPoint>;
}

/// A candidate paired with its distance from the search origin.
#[derive(Debug, Clone, Serialize)]
pub struct Ranked<T> {
    pub item: T,
    pub distance_km: f64,
}

/// Rank `candidates` by distance from `origin`, nearest first.
///
/// Candidates without a position are dropped, as are those further than
/// `max_distance_km` when a limit is given. Ties keep their input order.
pub fn nearest<T, I>(origin: GeoPoint, candidates: I, max_distance_km: Option<f64>) -> Vec<Ranked<T>>
where
    T: Located,
    I: IntoIterator<Item = T>,
{
    let mut ranked: Vec<Ranked<T>> = candidates
        .into_iter()
        .filter_map(|item| {
            let point = item.location()?;
            let distance_km = haversine_km(origin, point);
            match max_distance_km {
                Some(limit) if distance_km > limit => None,
                _ => Some(Ranked { item, distance_km }),
            }
        })
        .collect();
    ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    ranked
}

/// Round to two decimals for display and persistence.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
