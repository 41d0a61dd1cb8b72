//! `realtime-core`: the storage- and transport-agnostic engine behind the
//! subscription service — path/field-value model, filter evaluator, event
//! store trait + in-memory reference impl, subscription registry, and the
//! session protocol state machine. Adapters (`realtime-ws-gateway`,
//! `realtime-redis-store`) depend on this crate; it depends on no
//! transport or storage backend of its own.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod path;
pub mod query;
pub mod registry;
pub mod session;
pub mod store;
pub mod value;

pub use collaborators::{AuthCollaborator, SecurityCollaborator, User};
pub use config::Config;
pub use error::{EventStoreError, SessionError, SubscribeError};
pub use event::{Event, EventType, ResumeToken, SequenceNumber};
pub use metrics::{HealthStatus, Metrics, MetricsSnapshot};
pub use path::{Path, PathError, PathInfo};
pub use query::{Filter, FieldFilter, Operator, Query, QueryError};
pub use registry::{Delivery, Registry, SubscribeResponse, SubscriptionOptions};
pub use session::{ClientFrame, ServerFrame, Session};
pub use store::EventStore;
pub use value::{FieldMap, FieldValue};
