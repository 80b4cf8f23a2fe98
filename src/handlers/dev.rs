use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::services::conversation::{self, InboundMessage};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DevMessage {
    #[serde(default)]
    pub provider_id: Option<String>,
    pub customer_id: String,
    pub text: String,
}

#[derive(Serialize)]
pub struct DevResponse {
    pub replies: Vec<String>,
    pub state: String,
}

/// Runs one turn without any transport; replies come back in the response.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DevMessage>,
) -> Result<Json<DevResponse>, AppError> {
    let customer_id = payload.customer_id.trim().to_string();
    if customer_id.is_empty() {
        return Err(AppError::BadRequest("customer_id is required".to_string()));
    }

    let inbound = InboundMessage {
        provider_id: payload
            .provider_id
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| state.config.default_provider_id.clone()),
        customer_id,
        text: payload.text,
    };

    {
        let db = state.db()?;
        if queries::get_provider(&db, &inbound.provider_id)?.is_none() {
            return Err(AppError::NotFound(format!("provider {}", inbound.provider_id)));
        }
    }

    let outcome = conversation::process_message(&state, &inbound)?;

    Ok(Json(DevResponse {
        replies: outcome.replies,
        state: outcome.state.as_str().to_string(),
    }))
}
