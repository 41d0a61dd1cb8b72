//! Core error taxonomy (spec §7).

use thiserror::Error;

use crate::path::PathError;
use crate::query::QueryError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubscribeError {
    #[error("invalid subscriber id or subscription id")]
    InvalidRequest,
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
    #[error("permission denied")]
    PermissionDenied,
    #[error("subscriber already has {0} subscriptions, the maximum is {1}")]
    TooManySubscriptions(usize, usize),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EventStoreError {
    #[error("resume token references a sequence number outside the retention window")]
    TokenExpired,
    #[error("backend failure: {0}")]
    BackendFailure(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unauthorized")]
    Unauthorized,
}
