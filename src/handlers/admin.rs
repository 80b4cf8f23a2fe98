use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::services::ServiceResponse;
use crate::models::{
    format_price, Appointment, AppointmentSource, AppointmentStatus, CancelOutcome, Customer,
    NewAppointment, Provider,
};
use crate::services::{booking, slots};
use crate::state::AppState;

const APPOINTMENT_LIST_LIMIT: usize = 500;
const CUSTOMER_LIST_LIMIT: usize = 500;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn default_provider(state: &AppState) -> Result<Provider, AppError> {
    let db = state.db()?;
    queries::get_provider(&db, &state.config.default_provider_id)?
        .ok_or_else(|| AppError::NotFound(format!("provider {}", state.config.default_provider_id)))
}

// ── Appointments ──

#[derive(Deserialize)]
pub struct AppointmentsQuery {
    pub filter: Option<String>,
}

#[derive(Serialize)]
pub struct AppointmentResponse {
    pub id: String,
    pub customer_id: String,
    pub service_name: String,
    pub duration_minutes: u32,
    pub price: String,
    pub start_time: String,
    pub local_time: String,
    pub status: String,
    pub cancel_code: String,
    pub source: String,
}

impl AppointmentResponse {
    fn new(provider: &Provider, a: Appointment) -> Self {
        Self {
            local_time: provider.to_local(a.start_time).format("%Y-%m-%d %H:%M").to_string(),
            start_time: a.start_time.to_rfc3339(),
            id: a.id,
            customer_id: a.customer_id,
            service_name: a.service.service_name,
            duration_minutes: a.service.duration_minutes,
            price: format_price(a.service.price),
            status: a.status.as_str().to_string(),
            cancel_code: a.cancel_code,
            source: a.source.as_str().to_string(),
        }
    }
}

// GET /api/admin/appointments?filter=today|tomorrow|week
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Vec<AppointmentResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let provider = default_provider(&state)?;
    let today = provider.to_local(state.clock.now()).date();
    let (first_day, days) = match query.filter.as_deref().unwrap_or("today") {
        "today" => (today, 1),
        "tomorrow" => (today + Duration::days(1), 1),
        "week" => (today, 7),
        other => return Err(AppError::BadRequest(format!("unknown filter: {other}"))),
    };

    let (from, _) = slots::local_day_bounds(first_day);
    let to = from + Duration::days(days);

    let appointments = {
        let db = state.db()?;
        queries::list_appointments_in_range(
            &db,
            &provider.id,
            provider.to_utc(from),
            provider.to_utc(to),
            APPOINTMENT_LIST_LIMIT,
        )?
    };

    Ok(Json(
        appointments
            .into_iter()
            .map(|a| AppointmentResponse::new(&provider, a))
            .collect(),
    ))
}

// POST /api/admin/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = {
        let db = state.db()?;
        queries::cancel_appointment(&db, &state.config.default_provider_id, &id, state.clock.now())?
    };

    match outcome {
        CancelOutcome::Canceled => {
            tracing::info!(appointment = %id, "appointment canceled by admin");
            Ok(Json(serde_json::json!({"ok": true, "status": "canceled"})))
        }
        CancelOutcome::AlreadyCanceled => Ok(Json(
            serde_json::json!({"ok": true, "status": "canceled", "already_canceled": true}),
        )),
        CancelOutcome::NotFound => Err(AppError::NotFound(format!("appointment {id}"))),
    }
}

#[derive(Deserialize)]
pub struct CreateAppointmentRequest {
    pub customer_id: String,
    pub service_id: i64,
    /// Provider-local wall clock, `YYYY-MM-DD HH:MM`.
    pub start: String,
}

// POST /api/admin/appointments
//
// Walk-ins and phone bookings. Not limited to the chat's slot grid, but the
// same unique index rejects a start that is already taken.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let customer_id = body.customer_id.trim();
    if customer_id.is_empty() {
        return Err(AppError::BadRequest("customer_id is required".to_string()));
    }
    let local = NaiveDateTime::parse_from_str(body.start.trim(), "%Y-%m-%d %H:%M")
        .map_err(|_| AppError::BadRequest("start must be YYYY-MM-DD HH:MM".to_string()))?;

    let provider = default_provider(&state)?;
    let now = state.clock.now();
    let start_time = provider.to_utc(local);
    if start_time <= now {
        return Err(AppError::BadRequest("start is in the past".to_string()));
    }

    let appointment = {
        let db = state.db()?;
        let service = queries::get_service(&db, &provider.id, body.service_id)?
            .ok_or_else(|| AppError::NotFound(format!("service {}", body.service_id)))?;

        let request = NewAppointment {
            provider_id: provider.id.clone(),
            customer_id: customer_id.to_string(),
            service: service.snapshot(),
            start_time,
            source: AppointmentSource::Admin,
        };
        let appointment = booking::book_appointment(&db, &request, now)?;
        queries::record_customer_visit(
            &db,
            &provider.id,
            customer_id,
            appointment.start_time,
            now,
        )?;
        appointment
    };

    tracing::info!(
        appointment = %appointment.id,
        customer = %appointment.customer_id,
        start = %appointment.start_time,
        "appointment created by admin"
    );
    Ok(Json(AppointmentResponse::new(&provider, appointment)))
}

// POST /api/admin/appointments/:id/no-show
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let provider_id = &state.config.default_provider_id;
    let db = state.db()?;
    let appointment = queries::get_appointment(&db, &id)?
        .filter(|a| &a.provider_id == provider_id)
        .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))?;

    if appointment.status != AppointmentStatus::Confirmed {
        return Err(AppError::BadRequest(format!(
            "appointment is {}",
            appointment.status.as_str()
        )));
    }
    if appointment.start_time > state.clock.now() {
        return Err(AppError::BadRequest(
            "appointment has not started yet".to_string(),
        ));
    }

    queries::mark_no_show(&db, provider_id, &id, state.clock.now())?;
    tracing::info!(appointment = %id, "appointment marked as no-show");
    Ok(Json(serde_json::json!({"ok": true, "status": "no_show"})))
}

// ── Customers ──

// GET /api/admin/customers
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Customer>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db()?;
    let customers =
        queries::list_customers(&db, &state.config.default_provider_id, CUSTOMER_LIST_LIMIT)?;
    Ok(Json(customers))
}

#[derive(Deserialize)]
pub struct UpdateCustomerRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
}

// POST /api/admin/customers/:phone
pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(phone): Path<String>,
    Json(body): Json<UpdateCustomerRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db()?;
    let updated = queries::update_customer(
        &db,
        &state.config.default_provider_id,
        &phone,
        body.name.trim(),
        body.notes.trim(),
        state.clock.now(),
    )?;

    if !updated {
        return Err(AppError::NotFound(format!("customer {phone}")));
    }
    Ok(Json(serde_json::json!({"ok": true})))
}

// ── Services ──

// GET /api/admin/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ServiceResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let services = {
        let db = state.db()?;
        queries::list_all_services(&db, &state.config.default_provider_id)?
    };

    Ok(Json(services.into_iter().map(ServiceResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub duration_minutes: u32,
    /// Minor units (cents).
    pub price: i64,
}

// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if body.duration_minutes < 5 {
        return Err(AppError::BadRequest(
            "duration_minutes must be at least 5".to_string(),
        ));
    }
    if body.price < 0 {
        return Err(AppError::BadRequest("price must not be negative".to_string()));
    }

    let provider_id = &state.config.default_provider_id;
    let id = {
        let db = state.db()?;
        let existing = queries::list_all_services(&db, provider_id)?;
        if existing.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
            return Err(AppError::BadRequest(format!("service {name} already exists")));
        }
        queries::create_service(&db, provider_id, name, body.duration_minutes, body.price)?
    };

    tracing::info!(provider = %provider_id, service = id, name = %name, "service created");
    Ok(Json(serde_json::json!({"ok": true, "id": id})))
}

// POST /api/admin/services/:id/toggle
pub async fn toggle_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let toggled = {
        let db = state.db()?;
        queries::toggle_service(&db, &state.config.default_provider_id, id)?
    };

    if !toggled {
        return Err(AppError::NotFound(format!("service {id}")));
    }
    Ok(Json(serde_json::json!({"ok": true})))
}

// POST /api/admin/services/:id/delete
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let deleted = {
        let db = state.db()?;
        queries::delete_service(&db, &state.config.default_provider_id, id)?
    };

    if !deleted {
        return Err(AppError::NotFound(format!("service {id}")));
    }
    tracing::info!(service = id, "service deleted");
    Ok(Json(serde_json::json!({"ok": true})))
}
