use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::BookingError;
use crate::models::{
    Appointment, AppointmentSource, AppointmentStatus, CancelOutcome, Customer, Provider,
    Service, ServiceSnapshot, Session, SessionState, SessionStep, WorkingHours,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("invalid timestamp in database: {s}"))
}

// ── Providers ──

const PROVIDER_COLUMNS: &str =
    "id, name, city, is_active, work_start, work_end, utc_offset_minutes, whatsapp_phone_number_id";

fn parse_provider_row(row: &rusqlite::Row) -> anyhow::Result<Provider> {
    let work_start: String = row.get(4)?;
    let work_end: String = row.get(5)?;
    Ok(Provider {
        id: row.get(0)?,
        name: row.get(1)?,
        city: row.get(2)?,
        is_active: row.get::<_, i32>(3)? != 0,
        working_hours: WorkingHours::parse(&work_start, &work_end)?,
        utc_offset_minutes: row.get(6)?,
        whatsapp_phone_number_id: row.get(7)?,
    })
}

pub fn get_provider(conn: &Connection, id: &str) -> anyhow::Result<Option<Provider>> {
    let row = conn
        .query_row(
            &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = ?1"),
            params![id],
            |row| Ok(parse_provider_row(row)),
        )
        .optional()?;
    row.transpose()
}

pub fn get_provider_by_phone_number_id(
    conn: &Connection,
    phone_number_id: &str,
) -> anyhow::Result<Option<Provider>> {
    if phone_number_id.is_empty() {
        return Ok(None);
    }
    let row = conn
        .query_row(
            &format!(
                "SELECT {PROVIDER_COLUMNS} FROM providers
                 WHERE whatsapp_phone_number_id = ?1 AND is_active = 1"
            ),
            params![phone_number_id],
            |row| Ok(parse_provider_row(row)),
        )
        .optional()?;
    row.transpose()
}

/// Inserts the provider unless one with the same id exists. Returns whether it was created.
pub fn ensure_provider(conn: &Connection, provider: &Provider) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT INTO providers (id, name, city, is_active, work_start, work_end,
                                utc_offset_minutes, whatsapp_phone_number_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO NOTHING",
        params![
            provider.id,
            provider.name,
            provider.city,
            provider.is_active as i32,
            provider.working_hours.start_str(),
            provider.working_hours.end_str(),
            provider.utc_offset_minutes,
            provider.whatsapp_phone_number_id,
        ],
    )?;
    Ok(count > 0)
}

// ── Services ──

fn parse_service_row(row: &rusqlite::Row) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        name: row.get(2)?,
        duration_minutes: row.get(3)?,
        price: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
    })
}

/// Active services ordered by name. The menu numbering depends on this order
/// being the same between the listing turn and the selection turn.
pub fn list_active_services(conn: &Connection, provider_id: &str) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, name, duration_minutes, price, is_active
         FROM services WHERE provider_id = ?1 AND is_active = 1
         ORDER BY name ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![provider_id], parse_service_row)?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

pub fn list_all_services(conn: &Connection, provider_id: &str) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, name, duration_minutes, price, is_active
         FROM services WHERE provider_id = ?1
         ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![provider_id], parse_service_row)?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

pub fn create_service(
    conn: &Connection,
    provider_id: &str,
    name: &str,
    duration_minutes: u32,
    price: i64,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO services (provider_id, name, duration_minutes, price, is_active)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![provider_id, name, duration_minutes, price],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_service(
    conn: &Connection,
    provider_id: &str,
    id: i64,
) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, provider_id, name, duration_minutes, price, is_active
             FROM services WHERE id = ?1 AND provider_id = ?2",
            params![id, provider_id],
            parse_service_row,
        )
        .optional()?;
    Ok(service)
}

/// Removes the service row. Booked appointments keep their snapshot.
pub fn delete_service(conn: &Connection, provider_id: &str, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM services WHERE id = ?1 AND provider_id = ?2",
        params![id, provider_id],
    )?;
    Ok(count > 0)
}

/// Flips `is_active`. Returns `false` when no such service belongs to the provider.
pub fn toggle_service(conn: &Connection, provider_id: &str, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET is_active = 1 - is_active WHERE id = ?1 AND provider_id = ?2",
        params![id, provider_id],
    )?;
    Ok(count > 0)
}

// ── Customers ──

const CUSTOMER_COLUMNS: &str =
    "provider_id, phone, name, notes, last_visit_at, created_at, updated_at";

fn parse_customer_row(row: &rusqlite::Row) -> anyhow::Result<Customer> {
    let last_visit_at: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(Customer {
        provider_id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        notes: row.get(3)?,
        last_visit_at: last_visit_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Creates the customer on first contact, otherwise bumps `updated_at`.
pub fn touch_customer(
    conn: &Connection,
    provider_id: &str,
    phone: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO customers (provider_id, phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(provider_id, phone) DO UPDATE SET updated_at = excluded.updated_at",
        params![provider_id, phone, fmt_ts(&now)],
    )?;
    Ok(())
}

pub fn record_customer_visit(
    conn: &Connection,
    provider_id: &str,
    phone: &str,
    visit_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO customers (provider_id, phone, last_visit_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(provider_id, phone) DO UPDATE SET
           last_visit_at = excluded.last_visit_at,
           updated_at = excluded.updated_at",
        params![provider_id, phone, fmt_ts(&visit_at), fmt_ts(&now)],
    )?;
    Ok(())
}

pub fn get_customer(
    conn: &Connection,
    provider_id: &str,
    phone: &str,
) -> anyhow::Result<Option<Customer>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE provider_id = ?1 AND phone = ?2"
            ),
            params![provider_id, phone],
            |row| Ok(parse_customer_row(row)),
        )
        .optional()?;
    row.transpose()
}

/// Most recently active first.
pub fn list_customers(
    conn: &Connection,
    provider_id: &str,
    limit: usize,
) -> anyhow::Result<Vec<Customer>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE provider_id = ?1
         ORDER BY updated_at DESC, phone ASC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![provider_id, limit as i64], |row| {
        Ok(parse_customer_row(row))
    })?;

    let mut customers = vec![];
    for row in rows {
        customers.push(row??);
    }
    Ok(customers)
}

/// Sets name and notes of a known customer. Returns `false` when unknown.
pub fn update_customer(
    conn: &Connection,
    provider_id: &str,
    phone: &str,
    name: &str,
    notes: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE customers SET name = ?1, notes = ?2, updated_at = ?3
         WHERE provider_id = ?4 AND phone = ?5",
        params![name, notes, fmt_ts(&now), provider_id, phone],
    )?;
    Ok(count > 0)
}

// ── Sessions ──

pub fn get_session(
    conn: &Connection,
    provider_id: &str,
    customer_id: &str,
) -> anyhow::Result<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT state, temp, last_interaction_at FROM sessions
             WHERE provider_id = ?1 AND customer_id = ?2",
            params![provider_id, customer_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((state_str, temp_json, last_str)) = row else {
        return Ok(None);
    };

    let temp: serde_json::Value =
        serde_json::from_str(&temp_json).unwrap_or(serde_json::Value::Null);
    let step =
        SessionState::parse(&state_str).and_then(|state| SessionStep::from_parts(state, temp));
    let step = match step {
        Some(step) => step,
        None => {
            tracing::warn!(
                provider = provider_id,
                customer = customer_id,
                state = %state_str,
                "unreadable session data, resetting to menu"
            );
            SessionStep::Menu
        }
    };

    Ok(Some(Session {
        provider_id: provider_id.to_string(),
        customer_id: customer_id.to_string(),
        step,
        last_interaction_at: parse_ts(&last_str)?,
    }))
}

pub fn save_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    let temp = serde_json::to_string(&session.step.temp()?)?;

    conn.execute(
        "INSERT INTO sessions (provider_id, customer_id, state, temp, last_interaction_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(provider_id, customer_id) DO UPDATE SET
           state = excluded.state,
           temp = excluded.temp,
           last_interaction_at = excluded.last_interaction_at",
        params![
            session.provider_id,
            session.customer_id,
            session.state().as_str(),
            temp,
            fmt_ts(&session.last_interaction_at),
        ],
    )?;
    Ok(())
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, provider_id, customer_id, service_id, service_name, \
     duration_minutes, price, start_time, status, cancel_code, source, created_at, updated_at";

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let id: String = row.get(0)?;
    let start_time: String = row.get(7)?;
    let status_str: String = row.get(8)?;
    let source: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    // an unknown status never holds a slot
    let status = AppointmentStatus::parse(&status_str).unwrap_or_else(|| {
        tracing::warn!(
            appointment = %id,
            status = %status_str,
            "unknown appointment status, treating as canceled"
        );
        AppointmentStatus::Canceled
    });

    Ok(Appointment {
        id,
        provider_id: row.get(1)?,
        customer_id: row.get(2)?,
        service: ServiceSnapshot {
            service_id: row.get(3)?,
            service_name: row.get(4)?,
            duration_minutes: row.get(5)?,
            price: row.get(6)?,
        },
        start_time: parse_ts(&start_time)?,
        status,
        cancel_code: row.get(9)?,
        source: AppointmentSource::parse(&source),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn collect_appointments(
    stmt: &mut rusqlite::Statement,
    params: impl rusqlite::Params,
) -> anyhow::Result<Vec<Appointment>> {
    let rows = stmt.query_map(params, |row| Ok(parse_appointment_row(row)))?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

/// Inserts a confirmed appointment. A second confirmed appointment for the same
/// provider and start instant is rejected by the partial unique index, never by
/// a prior lookup.
pub fn create_appointment(
    conn: &Connection,
    appointment: &Appointment,
) -> Result<(), BookingError> {
    conn.execute(
        &format!(
            "INSERT INTO appointments ({APPOINTMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            appointment.id,
            appointment.provider_id,
            appointment.customer_id,
            appointment.service.service_id,
            appointment.service.service_name,
            appointment.service.duration_minutes,
            appointment.service.price,
            fmt_ts(&appointment.start_time),
            appointment.status.as_str(),
            appointment.cancel_code,
            appointment.source.as_str(),
            fmt_ts(&appointment.created_at),
            fmt_ts(&appointment.updated_at),
        ],
    )
    .map_err(classify_insert_error)?;
    Ok(())
}

fn classify_insert_error(err: rusqlite::Error) -> BookingError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            if message.contains("appointments.start_time") {
                return BookingError::SlotTaken;
            }
            if message.contains("appointments.cancel_code") {
                return BookingError::CancelCodeCollision;
            }
        }
    }
    BookingError::Database(err)
}

pub fn get_appointment(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let row = conn
        .query_row(
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
            params![id],
            |row| Ok(parse_appointment_row(row)),
        )
        .optional()?;
    row.transpose()
}

/// Flips a confirmed appointment to canceled. Canceling twice is a no-op.
pub fn cancel_appointment(
    conn: &Connection,
    provider_id: &str,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<CancelOutcome> {
    let count = conn.execute(
        "UPDATE appointments SET status = 'canceled', updated_at = ?1
         WHERE id = ?2 AND provider_id = ?3 AND status = 'confirmed'",
        params![fmt_ts(&now), id, provider_id],
    )?;
    if count > 0 {
        return Ok(CancelOutcome::Canceled);
    }

    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM appointments WHERE id = ?1 AND provider_id = ?2",
        params![id, provider_id],
        |row| row.get(0),
    )?;
    Ok(if exists {
        CancelOutcome::AlreadyCanceled
    } else {
        CancelOutcome::NotFound
    })
}

/// Marks a confirmed appointment as a no-show. Returns `false` when it was not
/// confirmed.
pub fn mark_no_show(
    conn: &Connection,
    provider_id: &str,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET status = 'no_show', updated_at = ?1
         WHERE id = ?2 AND provider_id = ?3 AND status = 'confirmed'",
        params![fmt_ts(&now), id, provider_id],
    )?;
    Ok(count > 0)
}

pub fn find_cancellable_by_id(
    conn: &Connection,
    provider_id: &str,
    customer_id: &str,
    id: &str,
) -> anyhow::Result<Option<Appointment>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE provider_id = ?1 AND customer_id = ?2 AND id = ?3 AND status = 'confirmed'"
            ),
            params![provider_id, customer_id, id],
            |row| Ok(parse_appointment_row(row)),
        )
        .optional()?;
    row.transpose()
}

pub fn find_cancellable_by_code(
    conn: &Connection,
    provider_id: &str,
    customer_id: &str,
    code: &str,
) -> anyhow::Result<Option<Appointment>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE provider_id = ?1 AND customer_id = ?2 AND cancel_code = ?3
                   AND status = 'confirmed'"
            ),
            params![provider_id, customer_id, code],
            |row| Ok(parse_appointment_row(row)),
        )
        .optional()?;
    row.transpose()
}

/// Confirmed appointments of one customer starting at or after `since`, the
/// `limit` latest ones, returned in ascending start order.
pub fn list_customer_appointments(
    conn: &Connection,
    provider_id: &str,
    customer_id: &str,
    since: DateTime<Utc>,
    limit: usize,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE provider_id = ?1 AND customer_id = ?2 AND status = 'confirmed' AND start_time >= ?3
         ORDER BY start_time DESC LIMIT ?4"
    ))?;
    let mut appointments = collect_appointments(
        &mut stmt,
        params![provider_id, customer_id, fmt_ts(&since), limit as i64],
    )?;
    appointments.reverse();
    Ok(appointments)
}

/// Start instants of confirmed appointments in `[from, to)`.
pub fn taken_start_times(
    conn: &Connection,
    provider_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> anyhow::Result<Vec<DateTime<Utc>>> {
    let mut stmt = conn.prepare(
        "SELECT start_time FROM appointments
         WHERE provider_id = ?1 AND status = 'confirmed' AND start_time >= ?2 AND start_time < ?3
         ORDER BY start_time ASC",
    )?;
    let rows = stmt.query_map(params![provider_id, fmt_ts(&from), fmt_ts(&to)], |row| {
        row.get::<_, String>(0)
    })?;

    let mut taken = vec![];
    for row in rows {
        taken.push(parse_ts(&row?)?);
    }
    Ok(taken)
}

/// All appointments, any status, in `[from, to)`.
pub fn list_appointments_in_range(
    conn: &Connection,
    provider_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: usize,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE provider_id = ?1 AND start_time >= ?2 AND start_time < ?3
         ORDER BY start_time ASC LIMIT ?4"
    ))?;
    collect_appointments(
        &mut stmt,
        params![provider_id, fmt_ts(&from), fmt_ts(&to), limit as i64],
    )
}
