use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{format_price, Service};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ServiceResponse {
    pub id: i64,
    pub name: String,
    pub duration_minutes: u32,
    pub price: i64,
    pub price_label: String,
    pub is_active: bool,
}

impl From<Service> for ServiceResponse {
    fn from(s: Service) -> Self {
        Self {
            price_label: format_price(s.price),
            id: s.id,
            name: s.name,
            duration_minutes: s.duration_minutes,
            price: s.price,
            is_active: s.is_active,
        }
    }
}

#[derive(Deserialize)]
pub struct ServicesQuery {
    pub provider_id: Option<String>,
}

// GET /services — the bookable catalog, in menu order
pub async fn list_active(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServicesQuery>,
) -> Result<Json<Vec<ServiceResponse>>, AppError> {
    let provider_id = query
        .provider_id
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.config.default_provider_id.clone());

    let services = {
        let db = state.db()?;
        if queries::get_provider(&db, &provider_id)?.is_none() {
            return Err(AppError::NotFound(format!("provider {provider_id}")));
        }
        queries::list_active_services(&db, &provider_id)?
    };

    Ok(Json(services.into_iter().map(ServiceResponse::from).collect()))
}
