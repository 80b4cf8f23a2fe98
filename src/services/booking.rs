use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::BookingError;
use crate::models::{Appointment, AppointmentStatus, NewAppointment};
use crate::services::cancel_code;

const MAX_CODE_ATTEMPTS: usize = 5;

/// Drops seconds and sub-seconds so equal minutes compare equal in storage.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

/// Reserves the slot. `SlotTaken` is returned as-is for the caller to surface;
/// a cancel-code clash only triggers a fresh code.
pub fn book_appointment(
    conn: &Connection,
    new: &NewAppointment,
    now: DateTime<Utc>,
) -> Result<Appointment, BookingError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let appointment = Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: new.provider_id.clone(),
            customer_id: new.customer_id.clone(),
            service: new.service.clone(),
            start_time: truncate_to_minute(new.start_time),
            status: AppointmentStatus::Confirmed,
            cancel_code: cancel_code::issue(),
            source: new.source,
            created_at: now,
            updated_at: now,
        };

        match queries::create_appointment(conn, &appointment) {
            Ok(()) => return Ok(appointment),
            Err(BookingError::CancelCodeCollision) if attempt < MAX_CODE_ATTEMPTS => {
                tracing::warn!(
                    provider = %new.provider_id,
                    attempt,
                    "cancel code collision, regenerating"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{AppointmentSource, Provider, ServiceSnapshot, WorkingHours};
    use chrono::TimeZone;

    fn setup_db() -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        queries::ensure_provider(
            &conn,
            &Provider {
                id: "B1".to_string(),
                name: "Demo Barber".to_string(),
                city: "Hamburg".to_string(),
                is_active: true,
                working_hours: WorkingHours::default(),
                utc_offset_minutes: 0,
                whatsapp_phone_number_id: String::new(),
            },
        )
        .unwrap();
        conn
    }

    fn request(customer: &str, start: DateTime<Utc>) -> NewAppointment {
        NewAppointment {
            provider_id: "B1".to_string(),
            customer_id: customer.to_string(),
            service: ServiceSnapshot {
                service_id: 1,
                service_name: "Haircut".to_string(),
                duration_minutes: 30,
                price: 2000,
            },
            start_time: start,
            source: AppointmentSource::Whatsapp,
        }
    }

    #[test]
    fn test_truncate_to_minute() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 42).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(
            truncate_to_minute(ts),
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_book_then_conflict() {
        let conn = setup_db();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();

        let first = book_appointment(&conn, &request("c1", start), now).unwrap();
        assert_eq!(first.cancel_code.len(), cancel_code::CODE_LENGTH);
        assert_eq!(first.status, AppointmentStatus::Confirmed);

        // same minute, different seconds: still the same slot
        let err = book_appointment(
            &conn,
            &request("c2", start + chrono::Duration::seconds(30)),
            now,
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken));
    }
}
