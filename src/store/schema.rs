//! SQLite schema.
//!
//! Timestamps are RFC 3339 UTC strings with a fixed microsecond precision,
//! so lexical order equals chronological order.

pub(super) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hospitals (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    code        TEXT,
    address     TEXT,
    phone       TEXT,
    latitude    REAL,
    longitude   REAL,
    status      TEXT NOT NULL,
    inventory   TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_hospitals_status ON hospitals(status);

CREATE TABLE IF NOT EXISTS donors (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    phone             TEXT NOT NULL,
    email             TEXT,
    blood_group       TEXT NOT NULL,
    latitude          REAL,
    longitude         REAL,
    eligible          INTEGER NOT NULL DEFAULT 1,
    blocked           INTEGER NOT NULL DEFAULT 0,
    last_donation_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_donors_blood_group ON donors(blood_group);

CREATE TABLE IF NOT EXISTS notifications (
    id            TEXT PRIMARY KEY,
    request_id    TEXT NOT NULL UNIQUE,
    kind          TEXT NOT NULL,
    donor_id      TEXT NOT NULL,
    hospital_id   TEXT,
    blood_group   TEXT NOT NULL,
    units_needed  INTEGER NOT NULL,
    priority      TEXT NOT NULL,
    distance_km   REAL NOT NULL,
    title         TEXT NOT NULL,
    message       TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    read          INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL,
    response      TEXT,
    responded_at  TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_notifications_open_request
    ON notifications(donor_id, hospital_id, blood_group)
    WHERE kind = 'blood_request' AND status = 'pending' AND read = 0;
CREATE INDEX IF NOT EXISTS idx_notifications_target
    ON notifications(donor_id, hospital_id, blood_group, created_at);
CREATE INDEX IF NOT EXISTS idx_notifications_status
    ON notifications(status, blood_group, created_at);

CREATE TABLE IF NOT EXISTS transfer_requests (
    id                TEXT PRIMARY KEY,
    from_hospital_id  TEXT NOT NULL,
    to_hospital_id    TEXT NOT NULL,
    blood_group       TEXT NOT NULL,
    units             INTEGER NOT NULL CHECK (units > 0),
    status            TEXT NOT NULL,
    origin            TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    response_message  TEXT,
    response_time     TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_transfer_requests_pending
    ON transfer_requests(from_hospital_id, to_hospital_id, blood_group)
    WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS admin_notifications (
    id           TEXT PRIMARY KEY,
    hospital_id  TEXT NOT NULL,
    kind         TEXT NOT NULL,
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    request_id   TEXT,
    created_at   TEXT NOT NULL,
    read         INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_admin_notifications_hospital
    ON admin_notifications(hospital_id, created_at);

CREATE TABLE IF NOT EXISTS emergency_cases (
    id                  TEXT PRIMARY KEY,
    hospital_id         TEXT,
    blood_group         TEXT NOT NULL,
    units_needed        INTEGER NOT NULL,
    latitude            REAL NOT NULL,
    longitude           REAL NOT NULL,
    severity            TEXT NOT NULL,
    source              TEXT NOT NULL,
    description         TEXT,
    search_radius_km    REAL NOT NULL,
    donors_contacted    INTEGER NOT NULL,
    total_donors_found  INTEGER NOT NULL,
    status              TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hospital_alerts (
    id            TEXT PRIMARY KEY,
    hospital_id   TEXT NOT NULL,
    blood_group   TEXT NOT NULL,
    units_needed  INTEGER NOT NULL,
    latitude      REAL,
    longitude     REAL,
    severity      TEXT NOT NULL,
    description   TEXT,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hospital_alerts_status
    ON hospital_alerts(status, created_at);

CREATE TABLE IF NOT EXISTS donor_routes (
    request_id            TEXT PRIMARY KEY,
    donor_id              TEXT NOT NULL,
    hospital_id           TEXT NOT NULL,
    distance_km           REAL NOT NULL,
    duration_min          INTEGER NOT NULL,
    source                TEXT NOT NULL,
    waypoints             TEXT NOT NULL DEFAULT '[]',
    polyline              TEXT,
    planned_duration_min  INTEGER NOT NULL,
    status                TEXT NOT NULL,
    created_at            TEXT NOT NULL,
    estimated_arrival     TEXT NOT NULL,
    last_updated          TEXT NOT NULL,
    completed_at          TEXT,
    backup_triggered_at   TEXT
);
CREATE INDEX IF NOT EXISTS idx_donor_routes_status
    ON donor_routes(status, created_at);

CREATE TABLE IF NOT EXISTS donor_tracking (
    request_id               TEXT PRIMARY KEY,
    donor_id                 TEXT NOT NULL,
    status                   TEXT NOT NULL,
    started_at               TEXT NOT NULL,
    last_latitude            REAL,
    last_longitude           REAL,
    last_location_at         TEXT,
    remaining_distance_km    REAL,
    estimated_remaining_min  INTEGER,
    estimated_arrival        TEXT,
    actual_arrival           TEXT,
    last_updated             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS realtime_updates (
    request_id   TEXT PRIMARY KEY,
    hospital_id  TEXT NOT NULL,
    payload      TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    agent      TEXT NOT NULL,
    action     TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    details    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log(action, timestamp);
"#;
