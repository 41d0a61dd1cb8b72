//! Reference in-memory backend: a bounded per-path ring, indexed by sequence
//! number (spec §4.4). Grounded on `swarm::event_store_ref::EventStoreHandler`'s
//! `parking_lot::Mutex`-protected per-path state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::EventStore;
use crate::error::EventStoreError;
use crate::event::{Event, ResumeToken, SequenceNumber};

struct PathLog {
    counter: AtomicU64,
    ring: Mutex<VecDeque<Event>>,
}

impl PathLog {
    fn new() -> Self {
        PathLog {
            counter: AtomicU64::new(0),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    fn next_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct InMemoryEventStore {
    paths: Mutex<HashMap<String, std::sync::Arc<PathLog>>>,
    retention_count: usize,
    retention_duration: Duration,
}

impl InMemoryEventStore {
    pub fn new(retention_count: usize, retention_duration: Duration) -> Self {
        InMemoryEventStore {
            paths: Mutex::new(HashMap::new()),
            retention_count,
            retention_duration,
        }
    }

    fn path_log(&self, path: &str) -> std::sync::Arc<PathLog> {
        let mut paths = self.paths.lock();
        paths.entry(path.to_string()).or_insert_with(|| std::sync::Arc::new(PathLog::new())).clone()
        // lock is dropped here
    }

    fn evict_locked(ring: &mut VecDeque<Event>, retention_count: usize, retention_duration: Duration, now: DateTime<Utc>) {
        while ring.len() > retention_count {
            ring.pop_front();
        }
        while let Some(front) = ring.front() {
            if now.signed_duration_since(front.timestamp).to_std().unwrap_or_default() > retention_duration {
                ring.pop_front();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store(&self, event: &mut Event) -> Result<(), EventStoreError> {
        let log = self.path_log(&event.full_path);
        let seq = log.next_sequence();
        event.sequence_number = seq;
        event.resume_token = ResumeToken::derive(&event.full_path, event.timestamp, seq);

        let mut ring = log.ring.lock();
        ring.push_back(event.clone());
        Self::evict_locked(&mut ring, self.retention_count, self.retention_duration, Utc::now());
        Ok(())
    }

    async fn get_events_since(&self, path: &str, token: Option<&ResumeToken>) -> Result<Vec<Event>, EventStoreError> {
        let log = self.path_log(path);
        let ring = log.ring.lock();
        match token {
            None => Ok(ring.iter().cloned().collect()),
            Some(tok) => {
                let since = tok.sequence_number().unwrap_or(SequenceNumber(0));
                let oldest = ring.front().map(|e| e.sequence_number);
                if let Some(oldest) = oldest {
                    if since < oldest && since != SequenceNumber(0) {
                        return Err(EventStoreError::TokenExpired);
                    }
                }
                Ok(ring.iter().filter(|e| e.sequence_number > since).cloned().collect())
            }
        }
    }

    async fn get_event_count(&self, path: &str) -> usize {
        self.path_log(path).ring.lock().len()
    }

    async fn cleanup_old_events(&self, older_than: DateTime<Utc>) -> Result<(), EventStoreError> {
        let paths = self.paths.lock();
        for log in paths.values() {
            let mut ring = log.ring.lock();
            while let Some(front) = ring.front() {
                if front.timestamp < older_than {
                    ring.pop_front();
                } else {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::value::FieldMap;

    fn ev(path: &str) -> Event {
        Event::new_unsequenced(EventType::Added, path, "p", "d", "doc", FieldMap::default(), None)
    }

    #[tokio::test]
    async fn sequence_numbers_strictly_increase() {
        let store = InMemoryEventStore::new(1000, Duration::from_secs(3600));
        let mut e1 = ev("p");
        let mut e2 = ev("p");
        let mut e3 = ev("p");
        store.store(&mut e1).await.unwrap();
        store.store(&mut e2).await.unwrap();
        store.store(&mut e3).await.unwrap();
        assert!(e1.sequence_number < e2.sequence_number);
        assert!(e2.sequence_number < e3.sequence_number);
    }

    #[tokio::test]
    async fn get_events_since_replays_tail() {
        let store = InMemoryEventStore::new(1000, Duration::from_secs(3600));
        let mut e1 = ev("p");
        let mut e2 = ev("p");
        let mut e3 = ev("p");
        store.store(&mut e1).await.unwrap();
        store.store(&mut e2).await.unwrap();
        store.store(&mut e3).await.unwrap();

        let replay = store.get_events_since("p", Some(&e1.resume_token)).await.unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].sequence_number, e2.sequence_number);
        assert_eq!(replay[1].sequence_number, e3.sequence_number);
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let store = InMemoryEventStore::new(1, Duration::from_secs(3600));
        let mut e1 = ev("p");
        let mut e2 = ev("p");
        let mut e3 = ev("p");
        store.store(&mut e1).await.unwrap();
        store.store(&mut e2).await.unwrap();
        store.store(&mut e3).await.unwrap(); // evicts e1 (retention_count = 1)

        let result = store.get_events_since("p", Some(&e1.resume_token)).await;
        assert_eq!(result, Err(EventStoreError::TokenExpired));
    }

    #[tokio::test]
    async fn empty_token_returns_full_window() {
        let store = InMemoryEventStore::new(1000, Duration::from_secs(3600));
        let mut e1 = ev("p");
        store.store(&mut e1).await.unwrap();
        let replay = store.get_events_since("p", None).await.unwrap();
        assert_eq!(replay.len(), 1);
    }

    #[tokio::test]
    async fn sequence_numbers_are_per_path() {
        let store = InMemoryEventStore::new(1000, Duration::from_secs(3600));
        let mut a1 = ev("a");
        let mut b1 = ev("b");
        store.store(&mut a1).await.unwrap();
        store.store(&mut b1).await.unwrap();
        assert_eq!(a1.sequence_number, SequenceNumber(1));
        assert_eq!(b1.sequence_number, SequenceNumber(1));
    }
}
