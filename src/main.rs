//! Turnstile Bridge - gym access-control integration
//!
//! Main entry point for the bridge service.

use sqlx::mysql::MySqlPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_bridge::{
    attendance::MySqlAttendanceStore,
    device_registry::DeviceRegistry,
    state::{AppConfig, AppState},
    web_api,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Turnstile Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        poll_interval_secs = config.poll_interval_secs,
        device_timeout_ms = config.device_timeout_ms,
        inactivity_threshold_days = config.inactivity_threshold_days,
        device_timezone = %config.device_timezone,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    let registry = Arc::new(DeviceRegistry::new(pool.clone()).await?);
    let store = Arc::new(MySqlAttendanceStore::new(pool.clone()));

    let state = AppState::build(config, store, registry);
    tracing::info!("Components initialized");

    // Background tasks
    state.polling.clone().start().await;
    state.reconciler.clone().start().await;

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
