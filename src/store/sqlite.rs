//! SQLite implementation of [`Store`].

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::schema::SCHEMA;
use super::{Store, StoreResult, TrackingProgress};
use crate::error::CoordinationError;
use crate::geo::GeoPoint;
use crate::types::{
    AdminNotice, AuditEntry, BloodGroup, Donor, DonorResponse, DonorRoute, DonorTracking,
    EmergencyCase, EmergencyStatus, Hospital, HospitalAlert, HospitalStatus, LocationFix,
    Notification, RouteEstimate, TrackingStatus, TransferRequest, TransferStatus,
};

/// Store backed by a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("Could not create database directory {}: {}", parent.display(), e);
                }
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn tag<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn opt_tag<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| r.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

fn opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_time(idx, &r)).transpose()
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn point(row: &Row<'_>, lat_idx: usize) -> rusqlite::Result<Option<GeoPoint>> {
    let lat: Option<f64> = row.get(lat_idx)?;
    let lon: Option<f64> = row.get(lat_idx + 1)?;
    Ok(match (lat, lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
        _ => None,
    })
}

fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let raw: i64 = row.get(idx)?;
    Ok(usize::try_from(raw).unwrap_or(0))
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> StoreResult<Vec<T>> {
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

const HOSPITAL_COLUMNS: &str =
    "id, name, code, address, phone, latitude, longitude, status, inventory";

fn hospital_from_row(row: &Row<'_>) -> rusqlite::Result<Hospital> {
    let raw_inventory: String = row.get(8)?;
    let inventory_document =
        serde_json::from_str(&raw_inventory).unwrap_or(Value::String(raw_inventory));
    Ok(Hospital {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        address: row.get(3)?,
        phone: row.get(4)?,
        location: point(row, 5)?,
        status: tag(row, 7)?,
        inventory_document,
    })
}

const DONOR_COLUMNS: &str =
    "id, name, phone, email, blood_group, latitude, longitude, eligible, blocked, last_donation_at";

fn donor_from_row(row: &Row<'_>) -> rusqlite::Result<Donor> {
    Ok(Donor {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        blood_group: tag(row, 4)?,
        location: point(row, 5)?,
        eligible: row.get(7)?,
        blocked: row.get(8)?,
        last_donation_at: opt_time(row, 9)?,
    })
}

const NOTIFICATION_COLUMNS: &str = "id, request_id, kind, donor_id, hospital_id, blood_group, \
     units_needed, priority, distance_km, title, message, created_at, read, status, response, \
     responded_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        request_id: row.get(1)?,
        kind: tag(row, 2)?,
        donor_id: row.get(3)?,
        hospital_id: row.get(4)?,
        blood_group: tag(row, 5)?,
        units_needed: row.get(6)?,
        priority: tag(row, 7)?,
        distance_km: row.get(8)?,
        title: row.get(9)?,
        message: row.get(10)?,
        created_at: time(row, 11)?,
        read: row.get(12)?,
        status: tag(row, 13)?,
        response: opt_tag(row, 14)?,
        responded_at: opt_time(row, 15)?,
    })
}

const TRANSFER_COLUMNS: &str = "id, from_hospital_id, to_hospital_id, blood_group, units, \
     status, origin, created_at, response_message, response_time";

fn transfer_from_row(row: &Row<'_>) -> rusqlite::Result<TransferRequest> {
    Ok(TransferRequest {
        id: row.get(0)?,
        from_hospital_id: row.get(1)?,
        to_hospital_id: row.get(2)?,
        blood_group: tag(row, 3)?,
        units: row.get(4)?,
        status: tag(row, 5)?,
        origin: row.get(6)?,
        created_at: time(row, 7)?,
        response_message: row.get(8)?,
        response_time: opt_time(row, 9)?,
    })
}

const NOTICE_COLUMNS: &str = "id, hospital_id, kind, title, body, request_id, created_at, read";

fn notice_from_row(row: &Row<'_>) -> rusqlite::Result<AdminNotice> {
    Ok(AdminNotice {
        id: row.get(0)?,
        hospital_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        request_id: row.get(5)?,
        created_at: time(row, 6)?,
        read: row.get(7)?,
    })
}

const EMERGENCY_COLUMNS: &str = "id, hospital_id, blood_group, units_needed, latitude, \
     longitude, severity, source, description, search_radius_km, donors_contacted, \
     total_donors_found, status, created_at";

fn emergency_from_row(row: &Row<'_>) -> rusqlite::Result<EmergencyCase> {
    Ok(EmergencyCase {
        id: row.get(0)?,
        hospital_id: row.get(1)?,
        blood_group: tag(row, 2)?,
        units_needed: row.get(3)?,
        location: GeoPoint::new(row.get(4)?, row.get(5)?),
        severity: tag(row, 6)?,
        source: tag(row, 7)?,
        description: row.get(8)?,
        search_radius_km: row.get(9)?,
        donors_contacted: count(row, 10)?,
        total_donors_found: count(row, 11)?,
        status: tag(row, 12)?,
        created_at: time(row, 13)?,
    })
}

const ALERT_COLUMNS: &str = "id, hospital_id, blood_group, units_needed, latitude, longitude, \
     severity, description, status, created_at";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<HospitalAlert> {
    Ok(HospitalAlert {
        id: row.get(0)?,
        hospital_id: row.get(1)?,
        blood_group: tag(row, 2)?,
        units_needed: row.get(3)?,
        location: point(row, 4)?,
        severity: tag(row, 6)?,
        description: row.get(7)?,
        status: tag(row, 8)?,
        created_at: time(row, 9)?,
    })
}

const ROUTE_COLUMNS: &str = "request_id, donor_id, hospital_id, distance_km, duration_min, \
     source, waypoints, polyline, planned_duration_min, status, created_at, estimated_arrival, \
     last_updated, completed_at, backup_triggered_at";

fn route_from_row(row: &Row<'_>) -> rusqlite::Result<DonorRoute> {
    let raw_waypoints: String = row.get(6)?;
    let waypoints = serde_json::from_str(&raw_waypoints).unwrap_or_default();
    Ok(DonorRoute {
        request_id: row.get(0)?,
        donor_id: row.get(1)?,
        hospital_id: row.get(2)?,
        plan: RouteEstimate {
            distance_km: row.get(3)?,
            duration_min: row.get(4)?,
            source: tag(row, 5)?,
            waypoints,
            polyline: row.get(7)?,
        },
        planned_duration_min: row.get(8)?,
        status: tag(row, 9)?,
        created_at: time(row, 10)?,
        estimated_arrival: time(row, 11)?,
        last_updated: time(row, 12)?,
        completed_at: opt_time(row, 13)?,
        backup_triggered_at: opt_time(row, 14)?,
    })
}

const TRACKING_COLUMNS: &str = "request_id, donor_id, status, started_at, last_latitude, \
     last_longitude, last_location_at, remaining_distance_km, estimated_remaining_min, \
     estimated_arrival, actual_arrival, last_updated";

fn tracking_from_row(row: &Row<'_>) -> rusqlite::Result<DonorTracking> {
    let last_location = match (point(row, 4)?, opt_time(row, 6)?) {
        (Some(location), Some(recorded_at)) => Some(LocationFix {
            location,
            recorded_at,
        }),
        _ => None,
    };
    Ok(DonorTracking {
        request_id: row.get(0)?,
        donor_id: row.get(1)?,
        status: tag(row, 2)?,
        started_at: time(row, 3)?,
        last_location,
        remaining_distance_km: row.get(7)?,
        estimated_remaining_min: row.get(8)?,
        estimated_arrival: opt_time(row, 9)?,
        actual_arrival: opt_time(row, 10)?,
        last_updated: time(row, 11)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let raw_details: String = row.get(3)?;
    Ok(AuditEntry {
        agent: row.get(0)?,
        action: row.get(1)?,
        timestamp: time(row, 2)?,
        details: serde_json::from_str(&raw_details).unwrap_or(Value::String(raw_details)),
    })
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// Reads a group's balance, flooring fractions and clamping negatives.
const BALANCE: &str = "CASE WHEN json_type(inventory) = 'object' \
     AND json_type(inventory, ?1) IN ('integer', 'real') \
     THEN MAX(CAST(json_extract(inventory, ?1) AS INTEGER), 0) ELSE 0 END";

fn withdraw_sql() -> String {
    format!(
        "UPDATE hospitals
         SET inventory = json_set(inventory, ?1, {BALANCE} - ?2)
         WHERE id = ?3
           AND json_type(inventory) = 'object'
           AND {BALANCE} >= ?2"
    )
}

fn deposit_sql() -> String {
    format!(
        "UPDATE hospitals
         SET inventory = json_set(
             CASE WHEN json_type(inventory) = 'object' THEN inventory ELSE '{{}}' END,
             ?1,
             {BALANCE} + ?2)
         WHERE id = ?3"
    )
}

const SET_STOCK: &str = "UPDATE hospitals
     SET inventory = json_set(
         CASE WHEN json_type(inventory) = 'object' THEN inventory ELSE '{}' END,
         ?1,
         ?2)
     WHERE id = ?3";

fn insert_notification_sql(guard: &str) -> String {
    format!(
        "INSERT OR IGNORE INTO notifications ({NOTIFICATION_COLUMNS})
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16
         WHERE NOT EXISTS (
             SELECT 1 FROM notifications
             WHERE donor_id = ?4 AND hospital_id IS ?5 AND blood_group = ?6 AND {guard}
         )"
    )
}

fn insert_notification(
    conn: &Connection,
    sql: &str,
    n: &Notification,
    extra: Option<&str>,
) -> StoreResult<bool> {
    let kind = n.kind.as_str();
    let group = n.blood_group.as_str();
    let priority = n.priority.as_str();
    let created_at = ts(&n.created_at);
    let status = n.status.as_str();
    let response = n.response.map(|r| r.as_str());
    let responded_at = n.responded_at.as_ref().map(ts);

    let mut values: Vec<&dyn ToSql> = vec![
        &n.id,
        &n.request_id,
        &kind,
        &n.donor_id,
        &n.hospital_id,
        &group,
        &n.units_needed,
        &priority,
        &n.distance_km,
        &n.title,
        &n.message,
        &created_at,
        &n.read,
        &status,
        &response,
        &responded_at,
    ];
    if let Some(extra) = extra.as_ref() {
        values.push(extra);
    }
    Ok(conn.execute(sql, values.as_slice())? == 1)
}

fn find_transfer(conn: &Connection, id: &str) -> StoreResult<TransferRequest> {
    conn.query_row(
        &format!("SELECT {TRANSFER_COLUMNS} FROM transfer_requests WHERE id = ?1"),
        params![id],
        transfer_from_row,
    )
    .optional()?
    .ok_or_else(|| CoordinationError::not_found("transfer request", id))
}

fn already_processed(id: &str) -> CoordinationError {
    CoordinationError::AlreadyProcessed {
        entity: "transfer request",
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

impl Store for SqliteStore {
    fn insert_hospital(&self, h: &Hospital) -> StoreResult<()> {
        let conn = self.conn.lock();
        let inventory = serde_json::to_string(&h.inventory_document)?;
        conn.execute(
            &format!("INSERT INTO hospitals ({HOSPITAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                h.id,
                h.name,
                h.code,
                h.address,
                h.phone,
                h.location.map(|p| p.latitude),
                h.location.map(|p| p.longitude),
                h.status.as_str(),
                inventory,
            ],
        )?;
        Ok(())
    }

    fn get_hospital(&self, id: &str) -> StoreResult<Option<Hospital>> {
        let conn = self.conn.lock();
        let hospital = conn
            .query_row(
                &format!("SELECT {HOSPITAL_COLUMNS} FROM hospitals WHERE id = ?1"),
                params![id],
                hospital_from_row,
            )
            .optional()?;
        Ok(hospital)
    }

    fn list_hospitals(&self, status: Option<HospitalStatus>) -> StoreResult<Vec<Hospital>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {HOSPITAL_COLUMNS} FROM hospitals
             WHERE (?1 IS NULL OR status = ?1) ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], hospital_from_row)?;
        collect(rows)
    }

    fn set_stock(&self, hospital_id: &str, group: BloodGroup, units: u32) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(SET_STOCK, params![group.json_path(), units, hospital_id])?;
        Ok(changed == 1)
    }

    fn withdraw_stock(&self, hospital_id: &str, group: BloodGroup, units: u32) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(&withdraw_sql(), params![group.json_path(), units, hospital_id])?;
        Ok(changed == 1)
    }

    fn deposit_stock(&self, hospital_id: &str, group: BloodGroup, units: u32) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(&deposit_sql(), params![group.json_path(), units, hospital_id])?;
        Ok(changed == 1)
    }

    fn insert_donor(&self, d: &Donor) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO donors ({DONOR_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                d.id,
                d.name,
                d.phone,
                d.email,
                d.blood_group.as_str(),
                d.location.map(|p| p.latitude),
                d.location.map(|p| p.longitude),
                d.eligible,
                d.blocked,
                d.last_donation_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn get_donor(&self, id: &str) -> StoreResult<Option<Donor>> {
        let conn = self.conn.lock();
        let donor = conn
            .query_row(
                &format!("SELECT {DONOR_COLUMNS} FROM donors WHERE id = ?1"),
                params![id],
                donor_from_row,
            )
            .optional()?;
        Ok(donor)
    }

    fn donors_by_blood_group(&self, group: BloodGroup) -> StoreResult<Vec<Donor>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DONOR_COLUMNS} FROM donors WHERE blood_group = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![group.as_str()], donor_from_row)?;
        collect(rows)
    }

    fn insert_notification_unless_open(&self, n: &Notification) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let sql =
            insert_notification_sql("kind = 'blood_request' AND read = 0 AND status = 'pending'");
        insert_notification(&conn, &sql, n, None)
    }

    fn insert_notification_unless_recent(
        &self,
        n: &Notification,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let sql = insert_notification_sql("created_at >= ?17");
        let since = ts(&since);
        insert_notification(&conn, &sql, n, Some(&since))
    }

    fn find_notification_by_request(&self, request_id: &str) -> StoreResult<Option<Notification>> {
        let conn = self.conn.lock();
        let notification = conn
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE request_id = ?1"),
                params![request_id],
                notification_from_row,
            )
            .optional()?;
        Ok(notification)
    }

    fn record_donor_response(
        &self,
        request_id: &str,
        response: DonorResponse,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE notifications
             SET status = 'responded', response = ?1, responded_at = ?2
             WHERE request_id = ?3 AND status = 'pending'",
            params![response.as_str(), ts(&at), request_id],
        )?;
        Ok(changed == 1)
    }

    fn unanswered_notifications(
        &self,
        groups: &[BloodGroup],
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Notification>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..groups.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE status = 'pending' AND response IS NULL
               AND created_at >= ?1 AND created_at <= ?2
               AND blood_group IN ({placeholders})
             ORDER BY created_at"
        );
        let mut values = vec![ts(&created_after), ts(&created_before)];
        values.extend(groups.iter().map(|g| g.as_str().to_string()));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), notification_from_row)?;
        collect(rows)
    }

    fn notifications_for_donor(&self, donor_id: &str) -> StoreResult<Vec<Notification>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE donor_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![donor_id], notification_from_row)?;
        collect(rows)
    }

    fn insert_transfer_request(&self, r: &TransferRequest) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO transfer_requests ({TRANSFER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                r.id,
                r.from_hospital_id,
                r.to_hospital_id,
                r.blood_group.as_str(),
                r.units,
                r.status.as_str(),
                r.origin,
                ts(&r.created_at),
                r.response_message,
                r.response_time.as_ref().map(ts),
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_transfer_request(&self, id: &str) -> StoreResult<Option<TransferRequest>> {
        let conn = self.conn.lock();
        match find_transfer(&conn, id) {
            Ok(request) => Ok(Some(request)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn transfer_requests_from(&self, hospital_id: &str) -> StoreResult<Vec<TransferRequest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfer_requests
             WHERE from_hospital_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![hospital_id], transfer_from_row)?;
        collect(rows)
    }

    fn accept_transfer(
        &self,
        id: &str,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut request = find_transfer(&tx, id)?;
        if request.status != TransferStatus::Pending {
            return Err(already_processed(id));
        }

        let path = request.blood_group.json_path();
        let withdrawn = tx.execute(
            &withdraw_sql(),
            params![path, request.units, request.to_hospital_id],
        )?;
        if withdrawn == 0 {
            return Err(CoordinationError::InsufficientStock {
                hospital_id: request.to_hospital_id.clone(),
                blood_group: request.blood_group,
                requested: request.units,
            });
        }

        let deposited = tx.execute(
            &deposit_sql(),
            params![path, request.units, request.from_hospital_id],
        )?;
        if deposited == 0 {
            return Err(CoordinationError::not_found(
                "hospital",
                request.from_hospital_id.clone(),
            ));
        }

        let flipped = tx.execute(
            "UPDATE transfer_requests
             SET status = 'accepted', response_message = ?1, response_time = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![message, ts(&at), id],
        )?;
        if flipped == 0 {
            return Err(already_processed(id));
        }
        tx.commit()?;

        request.status = TransferStatus::Accepted;
        request.response_message = message.map(str::to_string);
        request.response_time = Some(at);
        Ok(request)
    }

    fn reject_transfer(
        &self,
        id: &str,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransferRequest> {
        let conn = self.conn.lock();
        let mut request = find_transfer(&conn, id)?;
        let changed = conn.execute(
            "UPDATE transfer_requests
             SET status = 'rejected', response_message = ?1, response_time = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![message, ts(&at), id],
        )?;
        if changed == 0 {
            return Err(already_processed(id));
        }
        request.status = TransferStatus::Rejected;
        request.response_message = message.map(str::to_string);
        request.response_time = Some(at);
        Ok(request)
    }

    fn insert_admin_notice(&self, n: &AdminNotice) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO admin_notifications ({NOTICE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                n.id,
                n.hospital_id,
                n.kind,
                n.title,
                n.body,
                n.request_id,
                ts(&n.created_at),
                n.read,
            ],
        )?;
        Ok(())
    }

    fn admin_notices(&self, hospital_id: &str) -> StoreResult<Vec<AdminNotice>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTICE_COLUMNS} FROM admin_notifications
             WHERE hospital_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![hospital_id], notice_from_row)?;
        collect(rows)
    }

    fn insert_emergency_case(&self, c: &EmergencyCase) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO emergency_cases ({EMERGENCY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                c.id,
                c.hospital_id,
                c.blood_group.as_str(),
                c.units_needed,
                c.location.latitude,
                c.location.longitude,
                c.severity.as_str(),
                c.source.as_str(),
                c.description,
                c.search_radius_km,
                c.donors_contacted as i64,
                c.total_donors_found as i64,
                c.status.as_str(),
                ts(&c.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_emergency_case(&self, id: &str) -> StoreResult<Option<EmergencyCase>> {
        let conn = self.conn.lock();
        let case = conn
            .query_row(
                &format!("SELECT {EMERGENCY_COLUMNS} FROM emergency_cases WHERE id = ?1"),
                params![id],
                emergency_from_row,
            )
            .optional()?;
        Ok(case)
    }

    fn emergency_cases(&self) -> StoreResult<Vec<EmergencyCase>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EMERGENCY_COLUMNS} FROM emergency_cases ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map([], emergency_from_row)?;
        collect(rows)
    }

    fn set_emergency_status(&self, id: &str, status: EmergencyStatus) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE emergency_cases SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed == 1)
    }

    fn insert_hospital_alert(&self, a: &HospitalAlert) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO hospital_alerts ({ALERT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                a.id,
                a.hospital_id,
                a.blood_group.as_str(),
                a.units_needed,
                a.location.map(|p| p.latitude),
                a.location.map(|p| p.longitude),
                a.severity.as_str(),
                a.description,
                a.status.as_str(),
                ts(&a.created_at),
            ],
        )?;
        Ok(())
    }

    fn active_hospital_alerts(&self, since: DateTime<Utc>) -> StoreResult<Vec<HospitalAlert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM hospital_alerts
             WHERE status = 'active' AND created_at >= ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![ts(&since)], alert_from_row)?;
        collect(rows)
    }

    fn mark_alert_handled(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE hospital_alerts SET status = 'handled' WHERE id = ?1 AND status = 'active'",
            params![id],
        )?;
        Ok(changed == 1)
    }

    fn insert_route(&self, r: &DonorRoute) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let waypoints = serde_json::to_string(&r.plan.waypoints)?;
        let changed = conn.execute(
            &format!(
                "INSERT INTO donor_routes ({ROUTE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(request_id) DO NOTHING"
            ),
            params![
                r.request_id,
                r.donor_id,
                r.hospital_id,
                r.plan.distance_km,
                r.plan.duration_min,
                r.plan.source.as_str(),
                waypoints,
                r.plan.polyline,
                r.planned_duration_min,
                r.status.as_str(),
                ts(&r.created_at),
                ts(&r.estimated_arrival),
                ts(&r.last_updated),
                r.completed_at.as_ref().map(ts),
                r.backup_triggered_at.as_ref().map(ts),
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_route(&self, request_id: &str) -> StoreResult<Option<DonorRoute>> {
        let conn = self.conn.lock();
        let route = conn
            .query_row(
                &format!("SELECT {ROUTE_COLUMNS} FROM donor_routes WHERE request_id = ?1"),
                params![request_id],
                route_from_row,
            )
            .optional()?;
        Ok(route)
    }

    fn replace_route_plan(
        &self,
        request_id: &str,
        plan: &RouteEstimate,
        estimated_arrival: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let waypoints = serde_json::to_string(&plan.waypoints)?;
        let changed = conn.execute(
            "UPDATE donor_routes
             SET distance_km = ?1, duration_min = ?2, source = ?3, waypoints = ?4,
                 polyline = ?5, estimated_arrival = ?6, last_updated = ?7
             WHERE request_id = ?8",
            params![
                plan.distance_km,
                plan.duration_min,
                plan.source.as_str(),
                waypoints,
                plan.polyline,
                ts(&estimated_arrival),
                ts(&at),
                request_id,
            ],
        )?;
        Ok(changed == 1)
    }

    fn claim_delay_backup(
        &self,
        request_id: &str,
        at: DateTime<Utc>,
        rearm_before: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE donor_routes
             SET backup_triggered_at = ?1, last_updated = ?1
             WHERE request_id = ?2 AND status = 'active'
               AND (backup_triggered_at IS NULL
                    OR (?3 IS NOT NULL AND backup_triggered_at <= ?3))",
            params![ts(&at), request_id, rearm_before.as_ref().map(ts)],
        )?;
        Ok(changed == 1)
    }

    fn complete_route(&self, request_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE donor_routes SET status = 'completed', completed_at = ?1, last_updated = ?1
             WHERE request_id = ?2 AND status = 'active'",
            params![ts(&at), request_id],
        )?;
        Ok(changed == 1)
    }

    fn active_routes(&self, created_after: DateTime<Utc>) -> StoreResult<Vec<DonorRoute>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUTE_COLUMNS} FROM donor_routes
             WHERE status = 'active' AND created_at >= ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![ts(&created_after)], route_from_row)?;
        collect(rows)
    }

    fn start_tracking(&self, t: &DonorTracking) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "INSERT INTO donor_tracking ({TRACKING_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(request_id) DO NOTHING"
            ),
            params![
                t.request_id,
                t.donor_id,
                t.status.as_str(),
                ts(&t.started_at),
                t.last_location.map(|f| f.location.latitude),
                t.last_location.map(|f| f.location.longitude),
                t.last_location.map(|f| ts(&f.recorded_at)),
                t.remaining_distance_km,
                t.estimated_remaining_min,
                t.estimated_arrival.as_ref().map(ts),
                t.actual_arrival.as_ref().map(ts),
                ts(&t.last_updated),
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_tracking(&self, request_id: &str) -> StoreResult<Option<DonorTracking>> {
        let conn = self.conn.lock();
        let tracking = conn
            .query_row(
                &format!("SELECT {TRACKING_COLUMNS} FROM donor_tracking WHERE request_id = ?1"),
                params![request_id],
                tracking_from_row,
            )
            .optional()?;
        Ok(tracking)
    }

    fn record_progress(&self, request_id: &str, p: &TrackingProgress) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE donor_tracking
             SET last_latitude = ?1, last_longitude = ?2, last_location_at = ?3,
                 remaining_distance_km = ?4, estimated_remaining_min = ?5,
                 estimated_arrival = ?6, last_updated = ?3
             WHERE request_id = ?7 AND status = ?8",
            params![
                p.fix.location.latitude,
                p.fix.location.longitude,
                ts(&p.fix.recorded_at),
                p.remaining_distance_km,
                p.estimated_remaining_min,
                ts(&p.estimated_arrival),
                request_id,
                TrackingStatus::Tracking.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn mark_arrived(&self, request_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE donor_tracking SET status = ?1, actual_arrival = ?2, last_updated = ?2
             WHERE request_id = ?3 AND status = ?4",
            params![
                TrackingStatus::Arrived.as_str(),
                ts(&at),
                request_id,
                TrackingStatus::Tracking.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn publish_update(
        &self,
        request_id: &str,
        hospital_id: &str,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO realtime_updates (request_id, hospital_id, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![request_id, hospital_id, serde_json::to_string(payload)?, ts(&at)],
        )?;
        Ok(())
    }

    fn latest_update(&self, request_id: &str) -> StoreResult<Option<Value>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload FROM realtime_updates WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    fn log_action(&self, entry: &AuditEntry) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log (agent, action, timestamp, details) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.agent,
                entry.action,
                ts(&entry.timestamp),
                serde_json::to_string(&entry.details)?,
            ],
        )?;
        Ok(())
    }

    fn audit_entries(&self, action: Option<&str>) -> StoreResult<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT agent, action, timestamp, details FROM audit_log
             WHERE (?1 IS NULL OR action = ?1) ORDER BY id",
        )?;
        let rows = stmt.query_map(params![action], audit_from_row)?;
        collect(rows)
    }
}
