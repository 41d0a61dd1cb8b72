//! External collaborator interfaces (spec §6): the core never implements
//! these, they are supplied at construction — generalized from how
//! `swarm::event_store_ref::EventStoreRef` hands the registry a callback
//! instead of owning the storage engine itself.

use async_trait::async_trait;

use crate::query::Query;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub tenant_id: String,
}

/// `SecurityCollaborator` interface (spec §6).
#[async_trait]
pub trait SecurityCollaborator: Send + Sync {
    async fn validate_subscription(&self, user: &User, path: &str, query: Option<&Query>) -> Result<(), String>;
    async fn validate_read(&self, user: &User, path: &str) -> Result<(), String>;
}

/// `AuthCollaborator` interface (spec §6).
#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<String, String>;
    async fn get_user_by_id(&self, user_id: &str, tenant_id: &str) -> Result<User, String>;
}

/// Permissive collaborators for tests and local development: every
/// subscription and token is accepted. Never wired up by default outside
/// `#[cfg(test)]`/examples.
pub struct AllowAll;

#[async_trait]
impl SecurityCollaborator for AllowAll {
    async fn validate_subscription(&self, _user: &User, _path: &str, _query: Option<&Query>) -> Result<(), String> {
        Ok(())
    }
    async fn validate_read(&self, _user: &User, _path: &str) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl AuthCollaborator for AllowAll {
    async fn validate_token(&self, token: &str) -> Result<String, String> {
        Ok(token.to_string())
    }
    async fn get_user_by_id(&self, user_id: &str, tenant_id: &str) -> Result<User, String> {
        Ok(User {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
        })
    }
}
