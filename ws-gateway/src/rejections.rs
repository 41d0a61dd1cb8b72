//! Gateway-level errors (spec §7 is about the core; this is the HTTP/WS
//! adapter's own boundary), generalized from `api::rejections::ApiError`.

use thiserror::Error;
use warp::http::StatusCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("\"Authorization\" header is missing")]
    MissingAuthorizationHeader,
    #[error("unsupported authentication type '{0}', only \"Bearer\" is supported")]
    UnsupportedAuthType(String),
    #[error("\"tenantId\" query parameter is missing")]
    MissingTenantParameter,
    #[error("invalid or expired token")]
    TokenUnauthorized,
}

impl warp::reject::Reject for GatewayError {}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingAuthorizationHeader
            | GatewayError::UnsupportedAuthType(_)
            | GatewayError::MissingTenantParameter
            | GatewayError::TokenUnauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, std::convert::Infallible> {
    if let Some(e) = err.find::<GatewayError>() {
        Ok(warp::reply::with_status(e.to_string(), e.status()))
    } else if err.is_not_found() {
        Ok(warp::reply::with_status("not found".to_string(), StatusCode::NOT_FOUND))
    } else {
        tracing::error!("unhandled rejection: {:?}", err);
        Ok(warp::reply::with_status(
            "internal server error".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR,
        ))
    }
}
