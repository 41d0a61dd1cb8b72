//! The Session Protocol State Machine (spec §4.6): one instance per socket.
//! Decodes frames, routes subscribe/unsubscribe/ping, and — this is a hard
//! contract — never lets a single malformed frame tear the connection down.
//!
//! Generalized from `wsrpc::client_connected`'s single-writer-task, decode-
//! dispatch-respond shape, but specialized to this system's three actions
//! instead of wsrpc's generic multi-service multiplexing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collaborators::User;
use crate::error::SubscribeError;
use crate::event::{Event, EventType};
use crate::query::Query;
use crate::registry::{Delivery, Registry, SubscriptionOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action")]
#[serde(rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        subscription_id: String,
        full_path: String,
        #[serde(default)]
        query: Option<Json>,
        #[serde(default)]
        resume_token: Option<String>,
        #[serde(default)]
        include_metadata: bool,
        #[serde(default)]
        include_old_data: bool,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_id: String },
    Ping,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    SubscriptionConfirmed {
        subscription_id: String,
        data: SubscriptionConfirmedData,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionError {
        subscription_id: Option<String>,
        code: String,
        error: String,
        timestamp: chrono::DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UnsubscriptionConfirmed { subscription_id: String },
    #[serde(rename_all = "camelCase")]
    DocumentChange {
        subscription_id: String,
        data: DocumentChangeData,
        timestamp: chrono::DateTime<Utc>,
    },
    Heartbeat { timestamp: chrono::DateTime<Utc> },
    Pong,
    Error {
        code: String,
        error: String,
        timestamp: chrono::DateTime<Utc>,
    },
    ConnectionClosed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfirmedData {
    pub full_path: String,
    pub project_id: String,
    pub database_id: String,
    pub initial_snapshot: bool,
    pub resume_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentChangeData {
    pub event: Event,
}

fn error_frame(code: &str, error: impl Into<String>) -> ServerFrame {
    ServerFrame::Error {
        code: code.to_string(),
        error: error.into(),
        timestamp: Utc::now(),
    }
}

/// Per-socket coordinator. Owned by the adapter (`ws-gateway`), which feeds
/// raw frame text into [`Session::handle_frame`] and forwards the outbound
/// channel to the socket — the single writer all outbound frames on a
/// connection are serialized through (§4.6).
pub struct Session {
    pub connection_id: String,
    user: User,
    registry: Registry,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    drain_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Session {
    pub fn new(connection_id: String, user: User, registry: Registry, outbound: mpsc::UnboundedSender<ServerFrame>) -> Session {
        registry.record_connection_opened();
        Session {
            connection_id,
            user,
            registry,
            outbound,
            drain_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Decodes and dispatches one raw client frame. Malformed JSON or an
    /// unknown action yields an `error` frame over `outbound` and returns —
    /// the caller's read loop keeps running (spec §4.6, property 5).
    pub async fn handle_frame(&self, raw: &str) {
        let value: Json = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                let _ = self.outbound.send(error_frame("BAD_JSON", e.to_string()));
                return;
            }
        };
        let frame: ClientFrame = match serde_json::from_value(value.clone()) {
            Ok(f) => f,
            Err(_) => {
                let action = value.get("action").and_then(Json::as_str).unwrap_or("<missing>").to_string();
                let _ = self.outbound.send(error_frame("UNKNOWN_ACTION", format!("unknown or malformed action: {}", action)));
                return;
            }
        };

        match frame {
            ClientFrame::Subscribe {
                subscription_id,
                full_path,
                query,
                resume_token,
                include_metadata,
                include_old_data,
            } => {
                self.handle_subscribe(subscription_id, full_path, query, resume_token, include_metadata, include_old_data)
                    .await
            }
            ClientFrame::Unsubscribe { subscription_id } => self.handle_unsubscribe(subscription_id),
            ClientFrame::Ping => {
                let _ = self.outbound.send(ServerFrame::Pong);
            }
        }
    }

    async fn handle_subscribe(
        &self,
        subscription_id: String,
        full_path: String,
        query_json: Option<Json>,
        resume_token: Option<String>,
        include_metadata: bool,
        include_old_data: bool,
    ) {
        let query = match &query_json {
            Some(q) => match Query::from_json(full_path.clone(), q) {
                Ok(q) => Some(q),
                Err(e) => {
                    let _ = self.outbound.send(ServerFrame::SubscriptionError {
                        subscription_id: Some(subscription_id),
                        code: "INVALID_QUERY".to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return;
                }
            },
            None => None,
        };

        let options = SubscriptionOptions {
            include_metadata,
            include_old_data,
            heartbeat_interval: None,
        };

        let outcome = self
            .registry
            .subscribe(
                &self.user,
                self.connection_id.clone(),
                subscription_id.clone(),
                full_path.clone(),
                query,
                resume_token.map(crate::event::ResumeToken),
                options,
            )
            .await;

        let (response, rx) = match outcome {
            Ok(ok) => ok,
            Err(e) => {
                let code = match &e {
                    SubscribeError::PermissionDenied => "PERMISSION_DENIED",
                    SubscribeError::InvalidRequest | SubscribeError::InvalidPath(_) | SubscribeError::InvalidQuery(_) => "VALIDATION_ERROR",
                    SubscribeError::TooManySubscriptions(_, _) => "TOO_MANY_SUBSCRIPTIONS",
                };
                let _ = self.outbound.send(ServerFrame::SubscriptionError {
                    subscription_id: Some(subscription_id),
                    code: code.to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return;
            }
        };

        let (project_id, database_id) = split_project_database(&full_path);
        let _ = self.outbound.send(ServerFrame::SubscriptionConfirmed {
            subscription_id: subscription_id.clone(),
            data: SubscriptionConfirmedData {
                full_path: full_path.clone(),
                project_id,
                database_id,
                initial_snapshot: response.initial_snapshot,
                resume_token: response.resume_token.map(|t| t.to_string()),
            },
        });

        self.spawn_drain(subscription_id, rx);
    }

    fn handle_unsubscribe(&self, subscription_id: String) {
        self.registry.unsubscribe(&self.connection_id, &subscription_id);
        if let Some(handle) = self.drain_tasks.lock().remove(&subscription_id) {
            handle.abort();
        }
        let _ = self.outbound.send(ServerFrame::UnsubscriptionConfirmed { subscription_id });
    }

    fn spawn_drain(&self, subscription_id: String, mut rx: mpsc::Receiver<Delivery>) {
        let outbound = self.outbound.clone();
        let sub_id_for_task = subscription_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let frame = match delivery {
                    Delivery::Event(event) if event.event_type == EventType::Heartbeat => {
                        ServerFrame::Heartbeat { timestamp: event.timestamp }
                    }
                    Delivery::Event(event) => ServerFrame::DocumentChange {
                        subscription_id: sub_id_for_task.clone(),
                        timestamp: event.timestamp,
                        data: DocumentChangeData { event },
                    },
                    Delivery::Error { code, message } => ServerFrame::SubscriptionError {
                        subscription_id: Some(sub_id_for_task.clone()),
                        code,
                        error: message,
                        timestamp: Utc::now(),
                    },
                };
                if outbound.send(frame).is_err() {
                    break;
                }
            }
        });
        self.drain_tasks.lock().insert(subscription_id, handle);
    }

    /// Socket closed: unsubscribe everything this session owns and stop all
    /// drain tasks (spec §4.6 Cancellation).
    pub fn close(&self) {
        self.registry.unsubscribe_all(&self.connection_id);
        for (_, handle) in self.drain_tasks.lock().drain() {
            handle.abort();
        }
        self.registry.record_connection_closed();
        let _ = self.outbound.send(ServerFrame::ConnectionClosed);
    }
}

fn split_project_database(full_path: &str) -> (String, String) {
    match crate::path::Path::parse(full_path) {
        Ok(info) => (info.project, info.database),
        Err(_) => (String::new(), String::new()),
    }
}
