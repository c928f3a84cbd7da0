//! Heritage Keeper - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;

use heritage_keeper_backend::{
    api::{self, AppState},
    config::{Config, StoreBackend},
    db,
    error::{AppError, Result},
    models::backup::BackupRealm,
    services::metrics_service,
    store::Stores,
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    telemetry::init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(store = ?config.store_backend, "Starting Heritage Keeper");

    let stores = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::Config("DATABASE_URL not set".into()))?;
            let pool = db::create_pool(url).await?;
            tracing::info!("Connected to database");
            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");
            Stores::postgres(pool, &config.backup_defaults)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Stores::memory(&config.backup_defaults)
        }
    };

    let mut app_state = AppState::new(config.clone(), stores);

    // Provision each realm's admin account on first boot
    for realm in BackupRealm::ALL {
        let password = match realm {
            BackupRealm::Cms => config.cms_admin_password.as_deref(),
            BackupRealm::FamilyTree => config.family_tree_admin_password.as_deref(),
        };
        if let Some(password) = password {
            app_state.auth(realm).provision_admin(password).await?;
        }
    }

    match metrics_service::init_metrics() {
        Ok(handle) => app_state.set_metrics_handle(handle),
        Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
    }

    let state = Arc::new(app_state);
    state.scheduler.start();

    // Build router
    let app = api::routes::create_router(state.clone())
        .layer(api::routes::cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.scheduler.stop();
    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
