use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod document;
#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use document::DocumentStore;
pub use postgres::PostgresStore;

/// User record, identical across both store backends. The Serialize impl is
/// the API projection: secret material never leaves the process.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Argon2 PHC string; empty for accounts created through federated login.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub is_active: bool,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires: Option<OffsetDateTime>,
}

/// Fields the caller supplies at creation. The store assigns id and
/// created_at and defaults is_active to true.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub is_admin: bool,
}

/// The reset token and its expiry move together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTokenChange {
    Set {
        token: String,
        expires: OffsetDateTime,
    },
    Clear,
}

/// Partial update; only populated fields are applied.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub reset: Option<ResetTokenChange>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence contract shared by the relational and document backends.
/// Callers hold an `Arc<dyn UserStore>` and never learn which one is active.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Returns a user only while `reset_token_expires > now`. An expired or
    /// unknown token is indistinguishable from one that never existed.
    async fn get_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    async fn create(&self, new: NewUser) -> Result<User, StoreError>;

    /// Applies the populated fields to the user with this email; None when no
    /// user matches. Email changes re-check uniqueness against other users
    /// and leave a pending reset token resolvable at the new address.
    async fn update(&self, email: &str, changes: UserUpdate) -> Result<Option<User>, StoreError>;

    /// Idempotent; a missing user is a no-op.
    async fn delete(&self, email: &str) -> Result<(), StoreError>;

    async fn list_all(&self) -> Result<Vec<User>, StoreError>;
}

pub(crate) fn apply_update(user: &mut User, changes: &UserUpdate) {
    if let Some(email) = &changes.email {
        user.email = email.clone();
    }
    if let Some(hash) = &changes.password_hash {
        user.password_hash = hash.clone();
    }
    if let Some(name) = &changes.full_name {
        user.full_name = name.clone();
    }
    if let Some(active) = changes.is_active {
        user.is_active = active;
    }
    if let Some(admin) = changes.is_admin {
        user.is_admin = admin;
    }
    match &changes.reset {
        Some(ResetTokenChange::Set { token, expires }) => {
            user.reset_token = Some(token.clone());
            user.reset_token_expires = Some(*expires);
        }
        Some(ResetTokenChange::Clear) => {
            user.reset_token = None;
            user.reset_token_expires = None;
        }
        None => {}
    }
}
