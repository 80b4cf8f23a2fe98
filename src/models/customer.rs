use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person who has written to a provider, keyed by their phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub provider_id: String,
    pub phone: String,
    pub name: String,
    pub notes: String,
    /// Start of the most recently booked appointment.
    pub last_visit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
