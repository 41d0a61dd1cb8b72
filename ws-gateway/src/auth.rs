//! Bearer-token extraction and `AuthCollaborator` wiring, generalized from
//! `api::util::filters::{header_token, authenticate}`.

use std::sync::Arc;

use realtime_core::{AuthCollaborator, User};
use warp::{Filter, Rejection};

use crate::rejections::GatewayError;

fn header_token() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("Authorization").and_then(|header: Option<String>| async move {
        let header = header.ok_or_else(|| warp::reject::custom(GatewayError::MissingAuthorizationHeader))?;
        let mut words = header.split_whitespace();
        match words.next() {
            Some("Bearer") => {}
            Some(other) => return Err(warp::reject::custom(GatewayError::UnsupportedAuthType(other.to_string()))),
            None => return Err(warp::reject::custom(GatewayError::UnsupportedAuthType(String::new()))),
        }
        let token = words.next().ok_or_else(|| warp::reject::custom(GatewayError::TokenUnauthorized))?;
        Ok(token.to_string())
    })
}

fn tenant_param() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::query::<std::collections::HashMap<String, String>>().and_then(|q: std::collections::HashMap<String, String>| async move {
        q.get("tenantId")
            .cloned()
            .ok_or_else(|| warp::reject::custom(GatewayError::MissingTenantParameter))
    })
}

/// Extracts the authenticated [`User`] for an incoming connection: a bearer
/// token resolved to a user id via `ValidateToken`, paired with the
/// `tenantId` query parameter and resolved via `GetUserByID` (spec §6 Auth
/// collaborator interface).
pub fn authenticate(auth: Arc<dyn AuthCollaborator>) -> impl Filter<Extract = (User,), Error = Rejection> + Clone {
    header_token().and(tenant_param()).and_then(move |token: String, tenant_id: String| {
        let auth = auth.clone();
        async move {
            let user_id = auth
                .validate_token(&token)
                .await
                .map_err(|_| warp::reject::custom(GatewayError::TokenUnauthorized))?;
            auth.get_user_by_id(&user_id, &tenant_id)
                .await
                .map_err(|_| warp::reject::custom(GatewayError::TokenUnauthorized))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use realtime_core::collaborators::AllowAll;

    fn filter() -> impl Filter<Extract = (User,), Error = Rejection> + Clone {
        authenticate(Arc::new(AllowAll))
    }

    #[tokio::test]
    async fn accepts_bearer_token_with_tenant_param() {
        let user = warp::test::request()
            .header("Authorization", "Bearer sometoken")
            .path("/anything?tenantId=t1")
            .filter(&filter())
            .await
            .unwrap();
        assert_eq!(user.tenant_id, "t1");
    }

    #[tokio::test]
    async fn rejects_missing_authorization_header() {
        let err = warp::test::request()
            .path("/anything?tenantId=t1")
            .filter(&filter())
            .await
            .unwrap_err();
        assert_eq!(err.find::<GatewayError>(), Some(&GatewayError::MissingAuthorizationHeader));
    }

    #[tokio::test]
    async fn rejects_non_bearer_scheme() {
        let err = warp::test::request()
            .header("Authorization", "Basic sometoken")
            .path("/anything?tenantId=t1")
            .filter(&filter())
            .await
            .unwrap_err();
        assert!(matches!(err.find::<GatewayError>(), Some(GatewayError::UnsupportedAuthType(_))));
    }

    #[tokio::test]
    async fn rejects_missing_tenant_param() {
        let err = warp::test::request()
            .header("Authorization", "Bearer sometoken")
            .filter(&filter())
            .await
            .unwrap_err();
        assert_eq!(err.find::<GatewayError>(), Some(&GatewayError::MissingTenantParameter));
    }
}
