use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the full HTTP surface over shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/services", get(handlers::services::list_active))
        .route(
            "/webhook/whatsapp",
            get(handlers::webhook::verify).post(handlers::webhook::receive),
        )
        .route("/api/dev/message", post(handlers::dev::send_message))
        .route(
            "/api/admin/appointments",
            get(handlers::admin::list_appointments).post(handlers::admin::create_appointment),
        )
        .route(
            "/api/admin/appointments/:id/cancel",
            post(handlers::admin::cancel_appointment),
        )
        .route(
            "/api/admin/appointments/:id/no-show",
            post(handlers::admin::mark_no_show),
        )
        .route("/api/admin/customers", get(handlers::admin::list_customers))
        .route(
            "/api/admin/customers/:phone",
            post(handlers::admin::update_customer),
        )
        .route(
            "/api/admin/services",
            get(handlers::admin::list_services).post(handlers::admin::create_service),
        )
        .route(
            "/api/admin/services/:id/toggle",
            post(handlers::admin::toggle_service),
        )
        .route(
            "/api/admin/services/:id/delete",
            post(handlers::admin::delete_service),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
