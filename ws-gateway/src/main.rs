//! Gateway binary: wires the collaborators, the in-memory event store, the
//! heartbeat/stale-reap background tasks (spec §4.5 items 5/6), and serves
//! the warp routes. Mirrors the shape of `api::run`, minus the parts of that
//! function concerned with things this repo treats as external collaborators
//! (store provisioning, TLS, multiple bind addresses).

mod auth;
mod rejections;
mod routes;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use realtime_core::collaborators::AllowAll;
use realtime_core::{Config, Registry};
use realtime_core::store::memory::InMemoryEventStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let config = Config::default();
    let event_store = Arc::new(InMemoryEventStore::new(config.event_retention_count, config.event_retention_duration));

    // AllowAll is a placeholder for the external Security/Auth collaborators
    // (spec §6 "Deliberately OUT of scope"); a real deployment supplies its
    // own implementations at this exact seam.
    let security = Arc::new(AllowAll);
    let auth_collaborator = Arc::new(AllowAll);

    let registry = Registry::new(config.clone(), event_store, security);

    spawn_heartbeat_ticker(registry.clone(), config.heartbeat_interval);
    spawn_stale_reaper(registry.clone(), config.stale_reap_period, config.stale_connection_timeout);

    let routes = routes::routes(registry, auth_collaborator);

    tracing::info!("realtime-ws-gateway listening on 0.0.0.0:8080");
    warp::serve(routes).run(([0, 0, 0, 0], 8080)).await;
    Ok(())
}

fn spawn_heartbeat_ticker(registry: Registry, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.send_heartbeat().await;
        }
    });
}

fn spawn_stale_reaper(registry: Registry, period: Duration, timeout: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            registry.cleanup_stale_connections(timeout);
        }
    });
}
