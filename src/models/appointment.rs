use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ServiceSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub provider_id: String,
    pub customer_id: String,
    pub service: ServiceSnapshot,
    pub start_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub cancel_code: String,
    pub source: AppointmentSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a caller supplies to reserve a slot; id and cancel code are issued on insert.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub provider_id: String,
    pub customer_id: String,
    pub service: ServiceSnapshot,
    pub start_time: DateTime<Utc>,
    pub source: AppointmentSource,
}

/// Only `Confirmed` holds a slot; the other two free it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Confirmed,
    Canceled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "canceled" => Some(AppointmentStatus::Canceled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentSource {
    Whatsapp,
    Admin,
}

impl AppointmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentSource::Whatsapp => "whatsapp",
            AppointmentSource::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => AppointmentSource::Admin,
            _ => AppointmentSource::Whatsapp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    AlreadyCanceled,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        for status in [
            AppointmentStatus::Confirmed,
            AppointmentStatus::Canceled,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("pending"), None);
        assert_eq!(
            serde_json::to_value(AppointmentStatus::NoShow).unwrap(),
            serde_json::json!("no_show")
        );
    }
}
