//! Runtime configuration.
//!
//! [`Policy`] centralizes every threshold, radius and time window the agents
//! apply. [`Settings`] wraps it with the database location, the HTTP bind
//! address, provider credentials and scheduler intervals. Settings are read
//! from an optional YAML file and then overridden by environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{BloodGroup, Severity};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Decision constants shared by all agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Minimum safe stock per blood group, in units. Groups left out of a
    /// settings file keep their default.
    #[serde(default = "default_thresholds", deserialize_with = "merge_thresholds")]
    pub thresholds: BTreeMap<BloodGroup, u32>,
    /// Threshold applied to a group missing from `thresholds`, in units.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: u32,
    /// Days after a donation before a donor may be contacted again.
    #[serde(default = "default_cooldown_days")]
    pub donor_cooldown_days: i64,
    /// Minutes during which an emergency notification is not repeated for
    /// the same donor, hospital and group.
    #[serde(default = "default_renotify_minutes")]
    pub emergency_renotify_minutes: i64,
    /// Donors contacted per low-stock outreach.
    #[serde(default = "default_contact_limit")]
    pub monitor_contact_limit: usize,
    /// Radius for the inter-hospital stock search, in km.
    #[serde(default = "default_broker_radius")]
    pub broker_radius_km: f64,
    /// Donor search radius for non-critical emergencies, in km.
    #[serde(default = "default_emergency_radius")]
    pub emergency_radius_km: f64,
    /// Donor search radius for critical emergencies, in km.
    #[serde(default = "default_critical_radius")]
    pub critical_radius_km: f64,
    /// A donor counts as delayed when the remaining minutes exceed this
    /// multiple of the planned duration.
    #[serde(default = "default_delay_factor")]
    pub delay_factor: f64,
    /// Travel minutes per km used by the geometric route estimate.
    #[serde(default = "default_minutes_per_km")]
    pub minutes_per_km: f64,
    /// Units requested by a delay-triggered backup search.
    #[serde(default = "default_backup_units")]
    pub backup_units: u32,
    /// Minutes after which a route may trigger another backup search.
    /// `None` means once per route.
    #[serde(default)]
    pub delay_retrigger_minutes: Option<i64>,
    /// Minimum age, in minutes, of an unanswered rare-group request before it
    /// is escalated as an emergency.
    #[serde(default = "default_rare_request_age")]
    pub rare_request_min_age_minutes: i64,
    /// How far back, in hours, unanswered rare-group requests are considered.
    #[serde(default = "default_lookback_hours")]
    pub rare_request_lookback_hours: i64,
    /// How far back, in hours, active hospital alerts are considered.
    #[serde(default = "default_lookback_hours")]
    pub alert_lookback_hours: i64,
    /// Age limit, in hours, of routes the refresh sweep recomputes.
    #[serde(default = "default_lookback_hours")]
    pub route_refresh_lookback_hours: i64,
    /// A refreshed route replaces the stored one when the duration differs by
    /// more than this many minutes.
    #[serde(default = "default_route_change_minutes")]
    pub route_refresh_min_change_minutes: u32,
    /// Soft time limit for one workflow, in seconds.
    #[serde(default = "default_workflow_timeout")]
    pub workflow_timeout_secs: u64,
    /// Units consumed per day assumed by the shortage estimator.
    #[serde(default = "default_daily_usage")]
    pub daily_usage_rate: f64,
    /// Shortages predicted further out than this many days are ignored.
    #[serde(default = "default_horizon_days")]
    pub prediction_horizon_days: i64,
}

fn default_thresholds() -> BTreeMap<BloodGroup, u32> {
    BTreeMap::from([
        (BloodGroup::APos, 10),
        (BloodGroup::ANeg, 5),
        (BloodGroup::BPos, 10),
        (BloodGroup::BNeg, 5),
        (BloodGroup::AbPos, 5),
        (BloodGroup::AbNeg, 3),
        (BloodGroup::OPos, 15),
        (BloodGroup::ONeg, 8),
    ])
}
fn merge_thresholds<'de, D>(deserializer: D) -> Result<BTreeMap<BloodGroup, u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<BloodGroup, u32>::deserialize(deserializer)?;
    let mut thresholds = default_thresholds();
    thresholds.extend(overrides);
    Ok(thresholds)
}

fn default_fallback_threshold() -> u32 { 10 }
fn default_cooldown_days() -> i64 { 90 }
fn default_renotify_minutes() -> i64 { 60 }
fn default_contact_limit() -> usize { 5 }
fn default_broker_radius() -> f64 { 50.0 }
fn default_emergency_radius() -> f64 { 25.0 }
fn default_critical_radius() -> f64 { 50.0 }
fn default_delay_factor() -> f64 { 1.5 }
fn default_minutes_per_km() -> f64 { 2.0 }
fn default_backup_units() -> u32 { 1 }
fn default_rare_request_age() -> i64 { 120 }
fn default_lookback_hours() -> i64 { 24 }
fn default_route_change_minutes() -> u32 { 5 }
fn default_workflow_timeout() -> u64 { 240 }
fn default_daily_usage() -> f64 { 0.5 }
fn default_horizon_days() -> i64 { 7 }

impl Default for Policy {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            fallback_threshold: default_fallback_threshold(),
            donor_cooldown_days: default_cooldown_days(),
            emergency_renotify_minutes: default_renotify_minutes(),
            monitor_contact_limit: default_contact_limit(),
            broker_radius_km: default_broker_radius(),
            emergency_radius_km: default_emergency_radius(),
            critical_radius_km: default_critical_radius(),
            delay_factor: default_delay_factor(),
            minutes_per_km: default_minutes_per_km(),
            backup_units: default_backup_units(),
            delay_retrigger_minutes: None,
            rare_request_min_age_minutes: default_rare_request_age(),
            rare_request_lookback_hours: default_lookback_hours(),
            alert_lookback_hours: default_lookback_hours(),
            route_refresh_lookback_hours: default_lookback_hours(),
            route_refresh_min_change_minutes: default_route_change_minutes(),
            workflow_timeout_secs: default_workflow_timeout(),
            daily_usage_rate: default_daily_usage(),
            prediction_horizon_days: default_horizon_days(),
        }
    }
}

impl Policy {
    pub fn threshold(&self, group: BloodGroup) -> u32 {
        self.thresholds
            .get(&group)
            .copied()
            .unwrap_or(self.fallback_threshold)
    }

    pub fn donor_cooldown(&self) -> Duration {
        Duration::days(self.donor_cooldown_days)
    }

    pub fn renotify_window(&self) -> Duration {
        Duration::minutes(self.emergency_renotify_minutes)
    }

    pub fn search_radius_km(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical_radius_km,
            _ => self.emergency_radius_km,
        }
    }

    pub fn workflow_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.workflow_timeout_secs)
    }

    /// Whether `remaining_min` counts as a delay against `planned_min`.
    pub fn is_delayed(&self, remaining_min: u32, planned_min: u32) -> bool {
        f64::from(remaining_min) > f64::from(planned_min) * self.delay_factor
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Credentials and endpoints of the external providers. A provider without
/// credentials is simply not wired in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub sms_api_key: Option<String>,
    #[serde(default = "default_sms_endpoint")]
    pub sms_endpoint: String,
    #[serde(default)]
    pub twilio_account_sid: Option<String>,
    #[serde(default)]
    pub twilio_auth_token: Option<String>,
    #[serde(default)]
    pub twilio_phone_number: Option<String>,
    /// Public base URL the voice provider calls back into.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Prefix applied to phone numbers stored without a country code.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(default)]
    pub google_maps_api_key: Option<String>,
    #[serde(default)]
    pub openroute_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_sms_endpoint() -> String { "https://www.fast2sms.com/dev/bulkV2".to_string() }
fn default_callback_base_url() -> String { "http://localhost:8000".to_string() }
fn default_country_code() -> String { "+91".to_string() }
fn default_gemini_model() -> String { "gemini-1.5-flash".to_string() }
fn default_http_timeout() -> u64 { 10 }

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            sms_api_key: None,
            sms_endpoint: default_sms_endpoint(),
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_phone_number: None,
            callback_base_url: default_callback_base_url(),
            default_country_code: default_country_code(),
            google_maps_api_key: None,
            openroute_api_key: None,
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl ProviderSettings {
    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Periodic trigger intervals, in seconds. A `None` interval disables the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_inventory_scan")]
    pub inventory_scan_secs: Option<u64>,
    #[serde(default = "default_emergency_scan")]
    pub emergency_scan_secs: Option<u64>,
    #[serde(default = "default_transfer_sweep")]
    pub transfer_sweep_secs: Option<u64>,
    #[serde(default = "default_route_refresh")]
    pub route_refresh_secs: Option<u64>,
    #[serde(default)]
    pub shortage_prepare_secs: Option<u64>,
}

fn default_true() -> bool { true }
fn default_inventory_scan() -> Option<u64> { Some(180) }
fn default_emergency_scan() -> Option<u64> { Some(300) }
fn default_transfer_sweep() -> Option<u64> { Some(900) }
fn default_route_refresh() -> Option<u64> { Some(600) }

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            inventory_scan_secs: default_inventory_scan(),
            emergency_scan_secs: default_emergency_scan(),
            transfer_sweep_secs: default_transfer_sweep(),
            route_refresh_secs: default_route_refresh(),
            shortage_prepare_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub providers: ProviderSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_database_path() -> PathBuf { PathBuf::from("bloodlink.db") }
fn default_bind_address() -> String { "0.0.0.0:8000".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            policy: Policy::default(),
            providers: ProviderSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Settings {
    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading settings from {}", path.display()))?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let settings: Self = serde_yaml::from_str(raw).context("parsing settings YAML")?;
        Ok(settings)
    }

    /// Override fields from environment-style lookups. Empty values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BLOODLINK_DB_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("BLOODLINK_BIND") {
            self.bind_address = v;
        }

        let p = &mut self.providers;
        if let Some(v) = get("FAST2SMS_API_KEY") {
            p.sms_api_key = Some(v);
        }
        if let Some(v) = get("TWILIO_ACCOUNT_SID") {
            p.twilio_account_sid = Some(v);
        }
        if let Some(v) = get("TWILIO_AUTH_TOKEN") {
            p.twilio_auth_token = Some(v);
        }
        if let Some(v) = get("TWILIO_PHONE_NUMBER") {
            p.twilio_phone_number = Some(v);
        }
        if let Some(v) = get("CALLBACK_BASE_URL") {
            p.callback_base_url = v;
        }
        if let Some(v) = get("GOOGLE_MAPS_API_KEY") {
            p.google_maps_api_key = Some(v);
        }
        if let Some(v) = get("OPENROUTE_API_KEY") {
            p.openroute_api_key = Some(v);
        }
        if let Some(v) = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            p.gemini_api_key = Some(v);
        }
    }
}
