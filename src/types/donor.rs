use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::blood::BloodGroup;
use super::new_id;
use crate::geo::{GeoPoint, Located};

/// A registered donor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donor {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub blood_group: BloodGroup,
    pub location: Option<GeoPoint>,
    /// Medical eligibility flag maintained outside this crate.
    pub eligible: bool,
    pub blocked: bool,
    pub last_donation_at: Option<DateTime<Utc>>,
}

impl Donor {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, blood_group: BloodGroup) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            phone: phone.into(),
            email: None,
            blood_group,
            location: None,
            eligible: true,
            blocked: false,
            last_donation_at: None,
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint::new(latitude, longitude));
        self
    }

    pub fn with_last_donation(mut self, at: DateTime<Utc>) -> Self {
        self.last_donation_at = Some(at);
        self
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }

    /// Whether the donor may be contacted at `now`.
    ///
    /// A donor without a recorded donation is never held back by the cooldown.
    pub fn is_eligible_at(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if !self.eligible || self.blocked {
            return false;
        }
        match self.last_donation_at {
            Some(last) => now - last >= cooldown,
            None => true,
        }
    }
}

impl Located for Donor {
    fn location(&self) -> Option<GeoPoint> {
        self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cooldown_boundaries() {
        let cooldown = Duration::days(90);
        let fresh = Donor::new("A", "1", BloodGroup::ONeg);
        assert!(fresh.is_eligible_at(now(), cooldown));

        let recent = fresh.clone().with_last_donation(now() - Duration::days(89));
        assert!(!recent.is_eligible_at(now(), cooldown));

        let rested = fresh.clone().with_last_donation(now() - Duration::days(90));
        assert!(rested.is_eligible_at(now(), cooldown));
    }

    #[test]
    fn test_blocked_or_ineligible_donor_is_excluded() {
        let cooldown = Duration::days(90);
        let blocked = Donor::new("B", "2", BloodGroup::APos).blocked();
        assert!(!blocked.is_eligible_at(now(), cooldown));

        let mut unfit = Donor::new("C", "3", BloodGroup::APos);
        unfit.eligible = false;
        assert!(!unfit.is_eligible_at(now(), cooldown));
    }
}
