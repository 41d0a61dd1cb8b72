//! Event store backend interface (spec §4.4, §6). Two backends are required:
//! [`memory::InMemoryEventStore`] here, and `realtime-redis-store` for the
//! external, restart-survivable backend.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EventStoreError;
use crate::event::{Event, ResumeToken};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Assigns a sequence number (if unset) and resume token, persists the
    /// event, and evicts anything past the retention window. Must never
    /// block the caller on backend I/O beyond this call itself, and must
    /// yield strictly increasing sequence numbers for concurrent callers on
    /// the same path.
    async fn store(&self, event: &mut Event) -> Result<(), EventStoreError>;

    /// Returns events with sequence number strictly greater than the token's
    /// sequence number, in order. An empty token returns the full retained
    /// window. A token older than the retention window is `TokenExpired`.
    async fn get_events_since(&self, path: &str, token: Option<&ResumeToken>) -> Result<Vec<Event>, EventStoreError>;

    async fn get_event_count(&self, path: &str) -> usize;

    async fn cleanup_old_events(&self, older_than: DateTime<Utc>) -> Result<(), EventStoreError>;
}
