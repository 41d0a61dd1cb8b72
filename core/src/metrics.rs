//! Metrics & Health (spec §4.7): pulled, not pushed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    pub subscriptions_total: AtomicU64,
    pub events_published: AtomicU64,
    pub events_dropped: AtomicU64,
    pub reconnects: AtomicU64,
    pub stale_reaps: AtomicU64,
    pub active_subscribers: AtomicU64,
    pub active_connections: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub subscriptions_total: u64,
    pub events_published: u64,
    pub events_dropped: u64,
    pub reconnects: u64,
    pub stale_reaps: u64,
    pub active_subscribers: u64,
    pub active_connections: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            subscriptions_total: self.subscriptions_total.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            stale_reaps: self.stale_reaps.load(Ordering::Relaxed),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub ok: bool,
    pub detail: String,
}
