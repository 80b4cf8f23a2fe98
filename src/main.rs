use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use barberline::config::AppConfig;
use barberline::db::{self, queries};
use barberline::models::{Provider, WorkingHours};
use barberline::routes;
use barberline::services::messaging::whatsapp::WhatsAppCloudProvider;
use barberline::state::{AppState, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let created = queries::ensure_provider(
        &conn,
        &Provider {
            id: config.default_provider_id.clone(),
            name: "Demo Barber".to_string(),
            city: "Hamburg".to_string(),
            is_active: true,
            working_hours: WorkingHours::default(),
            utc_offset_minutes: 60,
            whatsapp_phone_number_id: config.whatsapp_phone_number_id.clone(),
        },
    )?;
    if created {
        queries::create_service(&conn, &config.default_provider_id, "Haircut", 30, 2000)?;
        queries::create_service(&conn, &config.default_provider_id, "Beard Trim", 15, 1000)?;
        tracing::info!(provider = %config.default_provider_id, "seeded default provider");
    }

    if config.whatsapp_access_token.is_empty() {
        tracing::warn!("WHATSAPP_ACCESS_TOKEN is empty, outbound messages will fail");
    }
    let messaging = WhatsAppCloudProvider::new(
        config.whatsapp_api_url.clone(),
        config.whatsapp_access_token.clone(),
        config.whatsapp_phone_number_id.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        messaging: Box::new(messaging),
        clock: Box::new(SystemClock),
    });

    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
