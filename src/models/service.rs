use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub provider_id: String,
    pub name: String,
    pub duration_minutes: u32,
    /// Minor currency units.
    pub price: i64,
    pub is_active: bool,
}

impl Service {
    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            service_id: self.id,
            service_name: self.name.clone(),
            duration_minutes: self.duration_minutes,
            price: self.price,
        }
    }
}

/// The service fields copied onto a booking at selection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_id: i64,
    pub service_name: String,
    pub duration_minutes: u32,
    pub price: i64,
}

/// Renders minor units as euros, dropping the cents when they are zero.
pub fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    if abs % 100 == 0 {
        format!("{sign}{}€", abs / 100)
    } else {
        format!("{sign}{}.{:02}€", abs / 100, abs % 100)
    }
}
