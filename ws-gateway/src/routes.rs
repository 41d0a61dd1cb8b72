//! Route composition, generalized from `api::events::ws::routes` /
//! `api::routes`: one `/ws` upgrade endpoint plus the pulled-not-pushed
//! `/health` and `/metrics` endpoints (spec §4.7).

use std::sync::Arc;

use realtime_core::{AuthCollaborator, Registry};
use warp::{Filter, Rejection, Reply};

use crate::{auth, rejections, socket};

pub fn routes(
    registry: Registry,
    auth_collaborator: Arc<dyn AuthCollaborator>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_registry = registry.clone();
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(auth::authenticate(auth_collaborator))
        .and(warp::any().map(move || ws_registry.clone()))
        .map(|ws: warp::ws::Ws, user, registry: Registry| ws.on_upgrade(move |socket| socket::handle_connection(socket, user, registry)));

    let health_registry = registry.clone();
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&health_registry.health()));

    let metrics_registry = registry;
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&metrics_registry.metrics()));

    ws_route.or(health_route).or(metrics_route).recover(rejections::handle_rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use realtime_core::collaborators::AllowAll;
    use realtime_core::store::memory::InMemoryEventStore;
    use realtime_core::Config;

    fn test_registry() -> Registry {
        let config = Config::default();
        let store = std::sync::Arc::new(InMemoryEventStore::new(config.event_retention_count, config.event_retention_duration));
        Registry::new(config, store, std::sync::Arc::new(AllowAll))
    }

    #[tokio::test]
    async fn health_endpoint_returns_json_without_auth() {
        let reply = warp::test::request()
            .path("/health")
            .reply(&routes(test_registry(), Arc::new(AllowAll)))
            .await;
        assert_eq!(reply.status(), warp::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_json_without_auth() {
        let reply = warp::test::request()
            .path("/metrics")
            .reply(&routes(test_registry(), Arc::new(AllowAll)))
            .await;
        assert_eq!(reply.status(), warp::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_endpoint_without_auth_is_rejected() {
        let reply = warp::test::request()
            .path("/ws")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .reply(&routes(test_registry(), Arc::new(AllowAll)))
            .await;
        assert_eq!(reply.status(), warp::http::StatusCode::UNAUTHORIZED);
    }
}
