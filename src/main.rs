mod api;
mod config;
mod error;
mod session;
mod store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use warp::Filter;

use config::Config;
use session::bridge::AttendanceBridge;
use session::{reaper, SessionCoordinator};
use store::memory::{InMemoryAttendanceStore, InMemoryClassStore, LoggingNotifier};
use store::ProfileVerifier;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let class_store = Arc::new(InMemoryClassStore::new());
    // Single-node runs take their class records from an optional seed file;
    // without one, attendance hooks stay inert and only live relay runs
    if let Ok(path) = std::env::var("CLASS_SEED_FILE") {
        match std::fs::read_to_string(&path) {
            Ok(raw) => match class_store.seed_from_json(&raw).await {
                Ok(count) => tracing::info!(count, path = %path, "Seeded class records"),
                Err(e) => tracing::warn!(path = %path, error = %e, "Invalid class seed file"),
            },
            Err(e) => tracing::warn!(path = %path, error = %e, "Cannot read class seed file"),
        }
    }

    let bridge = AttendanceBridge::new(class_store, Arc::new(InMemoryAttendanceStore::new()));
    let coordinator =
        SessionCoordinator::new(bridge, Arc::new(LoggingNotifier), Arc::new(ProfileVerifier));

    reaper::start(
        coordinator.clone(),
        config.reaper.interval,
        config.reaper.stale_after,
    );

    let routes = api::routes::live_class_route(coordinator.clone())
        .or(api::routes::health_check(coordinator))
        .or(api::routes::config_endpoint());

    let bind = config.bind_address();
    tracing::info!(port = bind.1, "Live class coordinator listening");
    warp::serve(routes).run(bind).await;
}
