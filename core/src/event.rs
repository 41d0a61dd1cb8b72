//! Event and resume-token model (spec §3 Event).

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use derive_more::Display;
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

use crate::value::FieldMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Added,
    Modified,
    Removed,
    Heartbeat,
}

/// A per-path, monotonically increasing sequence number (spec §3 Event invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Display)]
pub struct SequenceNumber(pub u64);

/// Opaque resume token, deterministic over `(fullPath, timestamp_ns, sequenceNumber)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
pub struct ResumeToken(pub String);

impl ResumeToken {
    /// `hash(fullPath, timestamp_ns, sequenceNumber)`: identical inputs yield
    /// an identical token (spec §3 Event invariants, §9 "Resume token").
    pub fn derive(full_path: &str, timestamp: DateTime<Utc>, sequence: SequenceNumber) -> ResumeToken {
        let mut hasher = FnvHasher::default();
        full_path.hash(&mut hasher);
        timestamp.timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);
        sequence.0.hash(&mut hasher);
        ResumeToken(format!("{:016x}.{}", hasher.finish(), sequence.0))
    }

    /// Extracts the sequence number a token was derived from, used by
    /// `GetEventsSince` to compute the replay boundary.
    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        let (_, seq) = self.0.rsplit_once('.')?;
        seq.parse().ok().map(SequenceNumber)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub full_path: String,
    pub project_id: String,
    pub database_id: String,
    pub document_path: String,
    pub data: FieldMap,
    pub old_data: Option<FieldMap>,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: SequenceNumber,
    pub resume_token: ResumeToken,
    pub subscription_id: String,
}

impl Event {
    /// Builds an unpublished event; the registry/event store fill in
    /// `sequence_number`/`resume_token` at `Store` time (spec §4.4).
    pub fn new_unsequenced(
        event_type: EventType,
        full_path: impl Into<String>,
        project_id: impl Into<String>,
        database_id: impl Into<String>,
        document_path: impl Into<String>,
        data: FieldMap,
        old_data: Option<FieldMap>,
    ) -> Event {
        Event {
            event_type,
            full_path: full_path.into(),
            project_id: project_id.into(),
            database_id: database_id.into(),
            document_path: document_path.into(),
            data,
            old_data,
            timestamp: Utc::now(),
            sequence_number: SequenceNumber(0),
            resume_token: ResumeToken(String::new()),
            subscription_id: String::new(),
        }
    }

    pub fn heartbeat() -> Event {
        Event {
            event_type: EventType::Heartbeat,
            full_path: String::new(),
            project_id: String::new(),
            database_id: String::new(),
            document_path: String::new(),
            data: FieldMap::default(),
            old_data: None,
            timestamp: Utc::now(),
            sequence_number: SequenceNumber(0),
            resume_token: ResumeToken(String::new()),
            subscription_id: String::new(),
        }
    }
}
