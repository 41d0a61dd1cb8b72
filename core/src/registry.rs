//! The Subscription Registry (spec §4.5) — the core of the core: an
//! in-memory index from path to active subscriptions, fanning out published
//! events to per-subscriber bounded channels without head-of-line blocking.
//!
//! Concurrency shape generalized from `swarm::event_store_ref`: a cheap,
//! reader/writer-locked index plus `tokio::sync::mpsc` channels as the sole
//! cross-task boundary, non-blocking sends via `try_send`/bounded timeout
//! rather than ever holding a lock across socket I/O.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::collaborators::{SecurityCollaborator, User};
use crate::config::Config;
use crate::error::{EventStoreError, SubscribeError};
use crate::event::{Event, EventType, ResumeToken};
use crate::metrics::{HealthStatus, Metrics, MetricsSnapshot};
use crate::query::{self, Query};
use crate::store::EventStore;
use crate::value::FieldMap;

pub type SubscriberId = String;
pub type SubscriptionId = String;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    pub include_metadata: bool,
    pub include_old_data: bool,
    pub heartbeat_interval: Option<Duration>,
}

/// What is pushed down a subscription's channel: either a data/heartbeat
/// event, or a server-initiated teardown notice (spec §4.5 item 4,
/// `SLOW_CONSUMER`).
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Event),
    Error { code: String, message: String },
}

pub struct Subscription {
    pub subscriber_id: SubscriberId,
    pub subscription_id: SubscriptionId,
    pub path: String,
    pub query: Option<Query>,
    pub created_at: DateTime<Utc>,
    pub options: SubscriptionOptions,
    sender: mpsc::Sender<Delivery>,
    last_heartbeat: Mutex<DateTime<Utc>>,
    active: AtomicBool,
    drop_streak: Mutex<VecDeque<Instant>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        *self.last_heartbeat.lock()
    }

    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub subscription_id: SubscriptionId,
    pub initial_snapshot: bool,
    pub resume_token: Option<ResumeToken>,
    pub created_at: DateTime<Utc>,
}

type Key = (SubscriberId, SubscriptionId);

struct Inner {
    config: Config,
    event_store: Arc<dyn EventStore>,
    security: Arc<dyn SecurityCollaborator>,
    metrics: Metrics,
    path_index: RwLock<HashMap<String, HashMap<Key, Arc<Subscription>>>>,
    subscriber_index: RwLock<HashMap<SubscriberId, HashSet<SubscriptionId>>>,
}

/// A value type constructed at startup and passed to whoever needs it — no
/// global mutable state at the core level (spec §9).
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(config: Config, event_store: Arc<dyn EventStore>, security: Arc<dyn SecurityCollaborator>) -> Registry {
        Registry {
            inner: Arc::new(Inner {
                config,
                event_store,
                security,
                metrics: Metrics::default(),
                path_index: RwLock::new(HashMap::new()),
                subscriber_index: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            ok: true,
            detail: format!(
                "{} active connections, {} active subscribers",
                self.inner.metrics.active_connections.load(Ordering::Relaxed),
                self.inner.metrics.active_subscribers.load(Ordering::Relaxed)
            ),
        }
    }

    /// Subscribe(req) → Response (spec §4.5 item 1).
    pub async fn subscribe(
        &self,
        user: &User,
        subscriber_id: SubscriberId,
        subscription_id: SubscriptionId,
        path: String,
        query: Option<Query>,
        resume_token: Option<ResumeToken>,
        options: SubscriptionOptions,
    ) -> Result<(SubscribeResponse, mpsc::Receiver<Delivery>), SubscribeError> {
        if subscriber_id.is_empty() || subscription_id.is_empty() || path.is_empty() {
            return Err(SubscribeError::InvalidRequest);
        }
        if let Some(q) = &query {
            q.validate()?;
        }

        {
            let current = self
                .inner
                .subscriber_index
                .read()
                .get(&subscriber_id)
                .map(|s| s.len())
                .unwrap_or(0);
            if current >= self.inner.config.max_subscriptions_per_session {
                return Err(SubscribeError::TooManySubscriptions(
                    current,
                    self.inner.config.max_subscriptions_per_session,
                ));
            }
        }

        self.inner
            .security
            .validate_subscription(user, &path, query.as_ref())
            .await
            .map_err(|_| SubscribeError::PermissionDenied)?;

        let (tx, rx) = mpsc::channel(self.inner.config.channel_buffer_default);
        let created_at = Utc::now();
        let subscription = Arc::new(Subscription {
            subscriber_id: subscriber_id.clone(),
            subscription_id: subscription_id.clone(),
            path: path.clone(),
            query,
            created_at,
            options,
            sender: tx,
            last_heartbeat: Mutex::new(created_at),
            active: AtomicBool::new(true),
            drop_streak: Mutex::new(VecDeque::new()),
        });

        {
            let mut path_index = self.inner.path_index.write();
            path_index
                .entry(path.clone())
                .or_default()
                .insert((subscriber_id.clone(), subscription_id.clone()), subscription.clone());
            let mut subscriber_index = self.inner.subscriber_index.write();
            subscriber_index.entry(subscriber_id.clone()).or_default().insert(subscription_id.clone());
        }
        self.inner.metrics.subscriptions_total.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.active_subscribers.fetch_add(1, Ordering::Relaxed);

        let mut initial_snapshot = false;
        let mut final_resume_token = resume_token.clone();
        if let Some(token) = &resume_token {
            match self.inner.event_store.get_events_since(&path, Some(token)).await {
                Ok(events) => {
                    for event in events.into_iter().take(self.inner.config.max_resume_replay) {
                        // Replay happens before the subscription goes live; ordered,
                        // blocking delivery is fine here (not on the hot fan-out path).
                        let _ = subscription.sender.send(Delivery::Event(event)).await;
                    }
                }
                Err(EventStoreError::TokenExpired) => {
                    initial_snapshot = true;
                    final_resume_token = None;
                }
                Err(EventStoreError::BackendFailure(msg)) => {
                    tracing::warn!("event store backend failure during resume replay: {}", msg);
                    initial_snapshot = true;
                    final_resume_token = None;
                }
            }
        }

        Ok((
            SubscribeResponse {
                subscription_id,
                initial_snapshot,
                resume_token: final_resume_token,
                created_at,
            },
            rx,
        ))
    }

    /// Unsubscribe(subscriberId, subscriptionId): idempotent (spec §4.5 item 2).
    pub fn unsubscribe(&self, subscriber_id: &str, subscription_id: &str) {
        let removed = {
            let mut subscriber_index = self.inner.subscriber_index.write();
            if let Some(subs) = subscriber_index.get_mut(subscriber_id) {
                subs.remove(subscription_id)
            } else {
                false
            }
        };
        if !removed {
            return;
        }
        let mut path_index = self.inner.path_index.write();
        let mut empty_path = None;
        for (path, subs) in path_index.iter_mut() {
            let key = (subscriber_id.to_string(), subscription_id.to_string());
            if subs.remove(&key).is_some() {
                if subs.is_empty() {
                    empty_path = Some(path.clone());
                }
                break;
            }
        }
        if let Some(path) = empty_path {
            path_index.remove(&path);
        }
        self.inner.metrics.active_subscribers.fetch_sub(1, Ordering::Relaxed);
    }

    /// UnsubscribeAll(subscriberId): atomic removal of every subscription
    /// the subscriber owns (spec §4.5 item 3).
    pub fn unsubscribe_all(&self, subscriber_id: &str) {
        let ids: Vec<String> = {
            let mut subscriber_index = self.inner.subscriber_index.write();
            subscriber_index.remove(subscriber_id).into_iter().flatten().collect()
        };
        if ids.is_empty() {
            return;
        }
        let mut path_index = self.inner.path_index.write();
        let mut empty_paths = Vec::new();
        for (path, subs) in path_index.iter_mut() {
            for id in &ids {
                subs.remove(&(subscriber_id.to_string(), id.clone()));
            }
            if subs.is_empty() {
                empty_paths.push(path.clone());
            }
        }
        for path in empty_paths {
            path_index.remove(&path);
        }
        self.inner
            .metrics
            .active_subscribers
            .fetch_sub(ids.len() as u64, Ordering::Relaxed);
    }

    /// Publish(event) (spec §4.5 item 4). Never blocks under the path-index
    /// lock on a socket I/O operation: matching subscriptions are snapshotted
    /// out of the lock, then delivered concurrently with a bounded per-send
    /// timeout so one saturated subscriber cannot delay any other (property 4).
    pub async fn publish(&self, mut event: Event) {
        if let Err(EventStoreError::BackendFailure(msg)) = self.inner.event_store.store(&mut event).await {
            tracing::warn!("event store backend failure for {}: {} (fanning out live anyway)", event.full_path, msg);
        }
        self.inner.metrics.events_published.fetch_add(1, Ordering::Relaxed);

        let matching: Vec<Arc<Subscription>> = {
            let path_index = self.inner.path_index.read();
            path_index
                .get(&event.full_path)
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default()
        }; // lock dropped before any send

        let data_for_match = match event.event_type {
            EventType::Removed => event.old_data.clone().unwrap_or_default(),
            _ => event.data.clone(),
        };

        for subscription in matching {
            if !subscription.is_active() {
                continue;
            }
            if let Some(q) = &subscription.query {
                if !query::matches(&data_for_match, q) {
                    continue;
                }
            }
            let mut delivered_event = event.clone();
            delivered_event.subscription_id = subscription.subscription_id.clone();
            if delivered_event.event_type == EventType::Modified
                && subscription.options.include_old_data
                && delivered_event.old_data.is_none()
            {
                tracing::warn!(
                    "modified event for {} requested includeOldData but storage supplied none",
                    delivered_event.full_path
                );
            }
            self.deliver(subscription, Delivery::Event(delivered_event)).await;
        }
    }

    /// Non-blocking send with a bounded timeout (spec §5 "try-send with
    /// optional short timeout"); drops and counts on saturation, and tears
    /// the subscription down after `slow_consumer_threshold` consecutive
    /// drops within `slow_consumer_window`.
    async fn deliver(&self, subscription: Arc<Subscription>, delivery: Delivery) {
        if subscription.sender.try_send(delivery.clone()).is_ok() {
            subscription.drop_streak.lock().clear();
            return;
        }
        let timeout = self.inner.config.channel_send_timeout;
        let sender = subscription.sender.clone();
        let registry = self.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, sender.send(delivery)).await {
                Ok(Ok(())) => subscription.drop_streak.lock().clear(),
                _ => registry.note_drop(&subscription).await,
            }
        });
    }

    async fn note_drop(&self, subscription: &Arc<Subscription>) {
        self.inner.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
        let window = self.inner.config.slow_consumer_window;
        let threshold = self.inner.config.slow_consumer_threshold as usize;
        let tripped = {
            let mut streak = subscription.drop_streak.lock();
            let now = Instant::now();
            streak.push_back(now);
            while let Some(front) = streak.front() {
                if now.duration_since(*front) > window {
                    streak.pop_front();
                } else {
                    break;
                }
            }
            streak.len() >= threshold
        };
        if tripped && subscription.active.swap(false, Ordering::AcqRel) {
            let _ = subscription
                .sender
                .try_send(Delivery::Error {
                    code: "SLOW_CONSUMER".to_string(),
                    message: "subscription torn down after repeated channel-send timeouts".to_string(),
                });
            self.unsubscribe(&subscription.subscriber_id, &subscription.subscription_id);
        }
    }

    /// SendHeartbeat() (spec §4.5 item 5): emits a synthetic heartbeat on
    /// every active subscription, via the same non-blocking discipline.
    pub async fn send_heartbeat(&self) {
        let all: Vec<Arc<Subscription>> = {
            let path_index = self.inner.path_index.read();
            path_index.values().flat_map(|subs| subs.values().cloned()).collect()
        };
        for subscription in all {
            if subscription.is_active() {
                self.deliver(subscription, Delivery::Event(Event::heartbeat())).await;
            }
        }
    }

    /// CleanupStaleConnections(timeout) (spec §4.5 item 6).
    pub fn cleanup_stale_connections(&self, timeout: Duration) {
        let now = Utc::now();
        let stale: Vec<Key> = {
            let path_index = self.inner.path_index.read();
            path_index
                .values()
                .flat_map(|subs| subs.iter())
                .filter(|(_, sub)| {
                    now.signed_duration_since(sub.last_heartbeat()).to_std().unwrap_or_default() > timeout
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        for (subscriber_id, subscription_id) in &stale {
            self.unsubscribe(subscriber_id, subscription_id);
        }
        if !stale.is_empty() {
            self.inner.metrics.stale_reaps.fetch_add(stale.len() as u64, Ordering::Relaxed);
        }
    }

    /// UpdateLastHeartbeat(subscriberId, subscriptionId) (spec §4.5 item 7).
    pub fn update_last_heartbeat(&self, subscriber_id: &str, subscription_id: &str) {
        let path_index = self.inner.path_index.read();
        for subs in path_index.values() {
            if let Some(sub) = subs.get(&(subscriber_id.to_string(), subscription_id.to_string())) {
                sub.touch();
                return;
            }
        }
    }

    pub fn get_subscriber_count(&self, path: &str) -> usize {
        self.inner.path_index.read().get(path).map(HashMap::len).unwrap_or(0)
    }

    pub fn get_active_subscriptions(&self, subscriber_id: &str) -> Vec<SubscriptionId> {
        self.inner
            .subscriber_index
            .read()
            .get(subscriber_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_reconnect(&self) {
        self.inner.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.inner.metrics.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.inner.metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Events the registry's `full_path` matching key is always the document
/// path the write landed on; helper for storage collaborators building
/// events from a committed write.
pub fn full_path_for(project: &str, database: &str, document_path: &str) -> String {
    format!("projects/{}/databases/{}/documents/{}", project, database, document_path)
}
