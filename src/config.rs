use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub default_provider_id: String,
    pub whatsapp_verify_token: String,
    pub whatsapp_app_secret: String,
    pub whatsapp_access_token: String,
    pub whatsapp_phone_number_id: String,
    pub whatsapp_api_url: String,
    pub engine: EngineSettings,
}

/// Upper bound for `HISTORY_WINDOW_DAYS`; larger values overflow date arithmetic.
pub const MAX_HISTORY_WINDOW_DAYS: i64 = 3650;

/// Tunables for the booking conversation.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub slot_step_minutes: u32,
    pub max_listed_slots: usize,
    pub history_window_days: i64,
    pub my_appointments_limit: usize,
    pub cancel_candidates_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            slot_step_minutes: 15,
            max_listed_slots: 12,
            history_window_days: 30,
            my_appointments_limit: 10,
            cancel_candidates_limit: 5,
        }
    }
}

impl EngineSettings {
    /// Pulls out-of-range values back to something the engine can use.
    pub fn clamped(self) -> Self {
        Self {
            history_window_days: self.history_window_days.clamp(0, MAX_HISTORY_WINDOW_DAYS),
            ..self
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = EngineSettings::default();
        Self {
            port: parse_var("PORT").unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "barberline.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            default_provider_id: env::var("DEFAULT_PROVIDER_ID")
                .unwrap_or_else(|_| "hamburg_001".to_string()),
            whatsapp_verify_token: env::var("WHATSAPP_VERIFY_TOKEN").unwrap_or_default(),
            whatsapp_app_secret: env::var("WHATSAPP_APP_SECRET").unwrap_or_default(),
            whatsapp_access_token: env::var("WHATSAPP_ACCESS_TOKEN").unwrap_or_default(),
            whatsapp_phone_number_id: env::var("WHATSAPP_PHONE_NUMBER_ID").unwrap_or_default(),
            whatsapp_api_url: env::var("WHATSAPP_API_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string()),
            engine: EngineSettings {
                slot_step_minutes: parse_var("SLOT_STEP_MINUTES")
                    .unwrap_or(defaults.slot_step_minutes),
                max_listed_slots: parse_var("MAX_LISTED_SLOTS")
                    .unwrap_or(defaults.max_listed_slots),
                history_window_days: parse_var("HISTORY_WINDOW_DAYS")
                    .unwrap_or(defaults.history_window_days),
                my_appointments_limit: parse_var("MY_APPOINTMENTS_LIMIT")
                    .unwrap_or(defaults.my_appointments_limit),
                cancel_candidates_limit: parse_var("CANCEL_CANDIDATES_LIMIT")
                    .unwrap_or(defaults.cancel_candidates_limit),
            }
            .clamped(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
