//! Message and explanation templates.
//!
//! Donor messages, hospital notices and the deterministic workflow
//! explanations are all rendered with Tera from one registry built at
//! startup.

use serde::Serialize;
use tera::{Context, Tera};

use crate::error::CoordinationError;

pub const DONOR_REQUEST_TITLE: &str = "sms/donor_request_title";
pub const DONOR_REQUEST_BODY: &str = "sms/donor_request_body";
pub const EMERGENCY_TITLE: &str = "sms/emergency_title";
pub const EMERGENCY_BODY: &str = "sms/emergency_body";
pub const TRANSFER_NOTICE_TITLE: &str = "notice/transfer_title";
pub const TRANSFER_NOTICE_BODY: &str = "notice/transfer_body";

const RAW_TEMPLATES: &[(&str, &str)] = &[
    (DONOR_REQUEST_TITLE, "Urgent: {{ blood_group }} Blood Needed"),
    (
        DONOR_REQUEST_BODY,
        "URGENT BLOOD DONATION REQUEST\n\n\
         Dear Blood Donor,\n\n\
         {{ hospital_name }} urgently needs {{ blood_group }} blood.\n\
         Current stock is critically low.\n\n\
         Distance from you: {{ distance_km }} KM",
    ),
    (EMERGENCY_TITLE, "URGENT: Emergency Blood Request - {{ blood_group }}"),
    (
        EMERGENCY_BODY,
        "EMERGENCY: {{ hospital_name }} urgently needs {{ blood_group }} blood. \
         This is a critical situation. Can you help immediately?",
    ),
    (
        TRANSFER_NOTICE_TITLE,
        "Inter-Hospital Request: {{ blood_group }} Blood Needed",
    ),
    (
        TRANSFER_NOTICE_BODY,
        "{{ requester_name }} needs {{ units }} units of {{ blood_group }} blood. \
         Request ID: {{ request_id }}",
    ),
    // Deterministic explanations, one per workflow outcome.
    (
        "explain/transfer_available",
        "Nearby stock found: {{ recommended_name }} holds {{ available_units }} units of \
         {{ blood_group }} at {{ distance_km }} km ({{ options }} option(s) within range). \
         {% if request_created %}A transfer request for {{ units }} units was sent.\
         {% else %}A transfer request for this pair is already pending.{% endif %}",
    ),
    (
        "explain/donor_search_initiated",
        "No hospital nearby could cover {{ units }} units of {{ blood_group }}. \
         Contacted {{ contacted }} of {{ candidates }} eligible donor(s) with {{ priority }} priority\
         {% if skipped > 0 %}; {{ skipped }} already had an open request{% endif %}.",
    ),
    (
        "explain/emergency_handled",
        "Handled {{ handled }} emergency case(s) and contacted {{ donors_contacted }} donor(s). \
         Stock checks: {{ stock_found }} of {{ stock_checks }} found nearby supply.\
         {% if skipped > 0 %} {{ skipped }} signal(s) skipped.{% endif %}",
    ),
    (
        "explain/route_planned",
        "Route planned for request {{ request_id }}: {{ distance_km }} km, about \
         {{ duration_min }} minutes ({{ source }}). Estimated arrival {{ eta }}.",
    ),
    (
        "explain/location_updated",
        "Donor for request {{ request_id }} is {{ remaining_km }} km away, about \
         {{ remaining_min }} minutes.{% if delayed %} The donor is delayed\
         {% if backup %} and a backup donor search was started{% endif %}.{% endif %}",
    ),
    (
        "explain/arrived",
        "Donor for request {{ request_id }} arrived at {{ arrived_at }}.",
    ),
    (
        "explain/donor_declined",
        "Donor declined request {{ request_id }}.",
    ),
    (
        "explain/transfer_accepted",
        "Transfer {{ request_id }} accepted: {{ units }} units of {{ blood_group }} moved \
         from {{ provider }} to {{ requester }}.",
    ),
    (
        "explain/transfer_rejected",
        "Transfer {{ request_id }} for {{ units }} units of {{ blood_group }} was rejected. \
         {% if fallback_contacted > 0 %}Contacted {{ fallback_contacted }} donor(s) instead.\
         {% else %}No replacement donors were contacted.{% endif %}",
    ),
    (
        "explain/inventory_scanned",
        "Scanned {{ hospitals }} hospital(s) and found {{ deficits }} deficit(s).\
         {% if failures > 0 %} {{ failures }} scan(s) failed.{% endif %}",
    ),
    (
        "explain/stock_swept",
        "Checked {{ hospitals_scanned }} hospital(s) and {{ deficits_checked }} deficit(s); \
         nearby stock found for {{ stock_found }}.",
    ),
    (
        "explain/routes_refreshed",
        "Refreshed {{ checked }} active route(s); {{ updated }} changed.",
    ),
    (
        "explain/shortages_prepared",
        "Predicted {{ predictions }} upcoming shortage(s); nearby stock found for \
         {{ stock_found }}.",
    ),
    ("explain/failed", "Workflow failed ({{ kind }}): {{ error }}"),
];

/// Compiled template registry.
#[derive(Debug)]
pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn new() -> Result<Self, CoordinationError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(RAW_TEMPLATES.iter().copied())?;
        Ok(Self { tera })
    }

    pub fn render<C: Serialize>(&self, name: &str, context: &C) -> Result<String, CoordinationError> {
        let context = Context::from_serialize(context)?;
        Ok(self.tera.render(name, &context)?)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }
}
