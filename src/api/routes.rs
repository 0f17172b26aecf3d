use std::sync::Arc;
use warp::Filter;

use super::websocket;
use crate::session::attendance::{LEFT_EARLY_THRESHOLD, PRESENT_THRESHOLD};
use crate::session::SessionCoordinator;

/// WebSocket upgrade route for live-class sessions.
pub fn live_class_route(
    coordinator: Arc<SessionCoordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::ws())
        .and(with_coordinator(coordinator))
        .map(|ws: warp::ws::Ws, coordinator: Arc<SessionCoordinator>| {
            ws.on_upgrade(move |websocket| websocket::handle_websocket(websocket, coordinator))
        })
}

pub fn health_check(
    coordinator: Arc<SessionCoordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::path("health"))
        .and(warp::get())
        .and(with_coordinator(coordinator))
        .and_then(|coordinator: Arc<SessionCoordinator>| async move {
            let active_rooms = coordinator.registry().room_count().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Live Class Coordinator",
                "version": "1.0.0",
                "activeRooms": active_rooms,
            })))
        })
}

pub fn config_endpoint() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
{
    warp::path("live")
        .and(warp::path("config"))
        .and(warp::get())
        .map(|| {
            use std::env;

            let config = serde_json::json!({
                "LIVE_CLASS_WS_URL": env::var("LIVE_CLASS_WS_URL").ok(),
                "STUN_SERVER_URL": env::var("STUN_SERVER_URL").ok(),
                "PRESENT_THRESHOLD": PRESENT_THRESHOLD,
                "LEFT_EARLY_THRESHOLD": LEFT_EARLY_THRESHOLD,
            });

            warp::reply::json(&config)
        })
}

fn with_coordinator(
    coordinator: Arc<SessionCoordinator>,
) -> impl Filter<Extract = (Arc<SessionCoordinator>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}
