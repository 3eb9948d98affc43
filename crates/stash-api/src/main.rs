mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;

use stash_core::db::Database;
use stash_core::SqliteRevisionStore;
use tokio::sync::Mutex;

use config::AppConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stash_api=info".parse()?)
                .add_directive("stash_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting stash-api with config: {:?}", config);

    let database = match config.db_path.as_deref() {
        Some(path) => Database::open(path).await?,
        None => {
            tracing::warn!("Campaign store is in memory; data is lost on exit");
            Database::open_in_memory().await?
        }
    };
    let store = SqliteRevisionStore::new(Arc::new(Mutex::new(database)));

    let state = AppState::new(config, store);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("stash-api listening on {}", bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down stash-api");
}
