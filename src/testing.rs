//! Test doubles and fixtures shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::agents::AgentContext;
use crate::clock::ManualClock;
use crate::config::Policy;
use crate::geo::GeoPoint;
use crate::outreach::{Channel, Delivery, Notifier, Outreach, OutreachMessage};
use crate::routing::RouteProvider;
use crate::store::{SqliteStore, Store};
use crate::templates::Templates;
use crate::types::{BloodGroup, Donor, Hospital, Inventory, RouteEstimate, RouteSource};

pub(crate) const BASE_LAT: f64 = 12.9716;
pub(crate) const BASE_LON: f64 = 77.5946;

/// Kilometres per degree of latitude on the 6371 km sphere.
const KM_PER_DEGREE: f64 = 111.194_926_644_558_73;

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
}

/// A point `km` kilometres due north of the base point.
pub(crate) fn north(km: f64) -> GeoPoint {
    GeoPoint::new(BASE_LAT + km / KM_PER_DEGREE, BASE_LON)
}

/// Eligible donor `km` north of the base point, not yet stored.
pub(crate) fn unsaved_donor(group: BloodGroup, km: f64) -> Donor {
    let at = north(km);
    Donor::new(format!("Donor {km}"), "98450 12345", group).with_location(at.latitude, at.longitude)
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct RecordingNotifier {
    channel: Channel,
    fail: bool,
    seen: Mutex<Vec<OutreachMessage>>,
}

impl RecordingNotifier {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            fail: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(channel: Channel) -> Self {
        Self {
            fail: true,
            ..Self::new(channel)
        }
    }

    pub fn messages(&self) -> Vec<OutreachMessage> {
        self.seen.lock().clone()
    }

    pub fn donors(&self) -> Vec<String> {
        self.seen.lock().iter().map(|m| m.donor_id.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn notify(&self, message: &OutreachMessage) -> Delivery {
        self.seen.lock().push(message.clone());
        if self.fail {
            Delivery::failed("scripted failure")
        } else {
            Delivery::Delivered
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ScriptedRouter {
    reply: Mutex<Option<(f64, u32)>>,
    calls: AtomicUsize,
}

impl ScriptedRouter {
    pub fn fixed(distance_km: f64, duration_min: u32) -> Self {
        Self {
            reply: Mutex::new(Some((distance_km, duration_min))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, distance_km: f64, duration_min: u32) {
        *self.reply.lock() = Some((distance_km, duration_min));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for ScriptedRouter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> anyhow::Result<Option<RouteEstimate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = *self.reply.lock();
        match reply {
            Some((distance_km, duration_min)) => Ok(Some(RouteEstimate {
                distance_km,
                duration_min,
                source: RouteSource::OpenRoute,
                waypoints: vec![origin, destination],
                polyline: None,
            })),
            None => anyhow::bail!("scripted failure"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// In-memory store, pinned clock and a recording SMS notifier.
#[derive(Debug, Clone)]
pub(crate) struct Fixture {
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: AgentContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_policy(Policy::default())
    }

    pub fn with_policy(policy: Policy) -> Self {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(RecordingNotifier::new(Channel::Sms));
        let ctx = AgentContext {
            store: store.clone(),
            clock: clock.clone(),
            policy: Arc::new(policy),
            outreach: Arc::new(Outreach::new(vec![notifier.clone() as Arc<dyn Notifier>])),
            templates: Arc::new(Templates::new().unwrap()),
        };
        Self {
            store,
            clock,
            notifier,
            ctx,
        }
    }

    /// Active hospital `km` north of the base point.
    pub fn hospital(&self, name: &str, km: f64, stock: &[(BloodGroup, u32)]) -> Hospital {
        let at = north(km);
        let hospital = Hospital::new(name)
            .with_location(at.latitude, at.longitude)
            .with_inventory(&stock.iter().copied().collect::<Inventory>());
        self.store.insert_hospital(&hospital).unwrap();
        hospital
    }

    /// Eligible donor `km` north of the base point.
    pub fn donor(&self, group: BloodGroup, km: f64) -> Donor {
        self.insert_donor(unsaved_donor(group, km))
    }

    pub fn insert_donor(&self, donor: Donor) -> Donor {
        self.store.insert_donor(&donor).unwrap();
        donor
    }

    pub fn stock(&self, hospital_id: &str, group: BloodGroup) -> u32 {
        self.store
            .get_hospital(hospital_id)
            .unwrap()
            .unwrap()
            .inventory()
            .get(group)
    }

    /// Wait for outstanding deliveries and return the messaged donors.
    pub async fn delivered(&self) -> Vec<String> {
        self.ctx.outreach.drain().await;
        self.notifier.donors()
    }
}
