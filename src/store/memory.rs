//! In-memory store double for tests, honoring the same contract as the real
//! backends. Wired into `AppState::fake`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{apply_update, NewUser, StoreError, User, UserStore, UserUpdate};

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.get(&id).cloned())
    }

    async fn get_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| {
                u.reset_token.as_deref() == Some(token)
                    && u.reset_token_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            full_name: new.full_name,
            is_active: true,
            is_admin: new.is_admin,
            created_at: OffsetDateTime::now_utc(),
            reset_token: None,
            reset_token_expires: None,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, email: &str, changes: UserUpdate) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        let Some(id) = users.values().find(|u| u.email == email).map(|u| u.id) else {
            return Ok(None);
        };
        if let Some(new_email) = &changes.email {
            if users.values().any(|u| u.id != id && &u.email == new_email) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let user = users.get_mut(&id).unwrap();
        apply_update(user, &changes);
        Ok(Some(user.clone()))
    }

    async fn delete(&self, email: &str) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        users.retain(|_, u| u.email != email);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let users = self.users.lock().unwrap();
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by_key(|u| u.created_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResetTokenChange;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            full_name: "Someone".into(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email_exact_match() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com")).await.unwrap();
        let err = store.create(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
        // Case differs, so it is a different email under the exact-match policy.
        assert!(store.create(new_user("A@x.com")).await.is_ok());
    }

    #[tokio::test]
    async fn create_defaults_active_and_assigns_identity() {
        let store = MemoryStore::new();
        let user = store.create(new_user("a@x.com")).await.unwrap();
        assert!(user.is_active);
        assert!(user.reset_token.is_none());
        assert!(store.get_by_id(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_email_checks_uniqueness_against_other_users() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com")).await.unwrap();
        store.create(new_user("b@x.com")).await.unwrap();

        let err = store
            .update(
                "b@x.com",
                UserUpdate {
                    email: Some("a@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        // Re-submitting your own email is not a conflict.
        let updated = store
            .update(
                "b@x.com",
                UserUpdate {
                    email: Some("b@x.com".into()),
                    full_name: Some("Bob".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.full_name, "Bob");
    }

    #[tokio::test]
    async fn update_unknown_email_returns_none() {
        let store = MemoryStore::new();
        let result = store
            .update("ghost@x.com", UserUpdate::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn reset_token_lookup_enforces_strict_expiry() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com")).await.unwrap();

        let future = OffsetDateTime::now_utc() + Duration::hours(1);
        store
            .update(
                "a@x.com",
                UserUpdate {
                    reset: Some(ResetTokenChange::Set {
                        token: "live".into(),
                        expires: future,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.get_by_reset_token("live").await.unwrap().is_some());

        // Past the expiry instant the token is gone, same as never having
        // existed.
        let past = OffsetDateTime::now_utc() - Duration::seconds(1);
        store
            .update(
                "a@x.com",
                UserUpdate {
                    reset: Some(ResetTokenChange::Set {
                        token: "dead".into(),
                        expires: past,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.get_by_reset_token("dead").await.unwrap().is_none());
        assert!(store.get_by_reset_token("never-issued").await.unwrap().is_none());

        // Expiry captured before the lookup: by the time the store compares,
        // its own clock is at or past that instant, and strict `>` kills the
        // token. The exact expires == now case would need an injectable
        // clock; this pins the at-or-past side of the boundary.
        store
            .update(
                "a@x.com",
                UserUpdate {
                    reset: Some(ResetTokenChange::Set {
                        token: "edge".into(),
                        expires: OffsetDateTime::now_utc(),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.get_by_reset_token("edge").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn email_change_keeps_pending_reset_token_live() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com")).await.unwrap();
        store
            .update(
                "a@x.com",
                UserUpdate {
                    reset: Some(ResetTokenChange::Set {
                        token: "live".into(),
                        expires: OffsetDateTime::now_utc() + Duration::hours(1),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The email moves without touching the reset pair; the token must
        // still resolve, now to the new address.
        store
            .update(
                "a@x.com",
                UserUpdate {
                    email: Some("b@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let user = store.get_by_reset_token("live").await.unwrap().unwrap();
        assert_eq!(user.email, "b@x.com");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com")).await.unwrap();
        store.delete("a@x.com").await.unwrap();
        store.delete("a@x.com").await.unwrap();
        assert!(store.get_by_email("a@x.com").await.unwrap().is_none());
    }
}
