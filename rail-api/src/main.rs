use anyhow::Context;
use rail_api::{app, AppState};
use rail_core::BookingManager;
use rail_store::{Config, DbClient, PgBookingStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rail_api=debug,rail_core=debug,rail_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting rail booking API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    if config.database.run_migrations {
        db.migrate().await.context("Failed to run migrations")?;
    }

    // Lookup tables are read once and cached for the process lifetime
    let store = Arc::new(PgBookingStore::new(db.pool.clone()));
    let manager = BookingManager::from_store(store)
        .await
        .context("Failed to load reference data")?;

    let app = app(AppState::new(manager));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
