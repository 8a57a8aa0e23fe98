use std::convert::Infallible;
use std::sync::Arc;

use warp::Filter;

use super::hub::PollHub;
use super::websocket;

/// Every route the server exposes
pub fn routes(hub: Arc<PollHub>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    poll_websocket_route(hub.clone()).or(health_check(hub))
}

/// Upgrades `GET /ws` to the named-message channel
pub fn poll_websocket_route(
    hub: Arc<PollHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, hub: Arc<PollHub>| {
            ws.on_upgrade(move |websocket| websocket::handle_poll_websocket(websocket, hub))
        })
}

pub fn health_check(hub: Arc<PollHub>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_hub(hub))
        .and_then(|hub: Arc<PollHub>| async move {
            let (rooms, connections) = hub.stats().await;
            Ok::<_, Infallible>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "pollroom",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": rooms,
                "connections": connections
            })))
        })
}

fn with_hub(hub: Arc<PollHub>) -> impl Filter<Extract = (Arc<PollHub>,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
