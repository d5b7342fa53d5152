use anyhow::Context;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{apply_update, NewUser, ResetTokenChange, StoreError, User, UserStore, UserUpdate};

/// Document backend on redis. One JSON document per user under
/// `user:{email}`, plus lookup keys `user_id:{id}` and `reset:{token}` that
/// map back to the email.
///
/// Writes are atomic per key only; nothing spans keys, so the lookup keys can
/// momentarily disagree with the document and every read through them
/// re-checks against the document itself. Uniqueness relies on SET NX, which
/// tolerates a create/create race by reporting DuplicateEmail to the loser.
pub struct DocumentStore {
    client: Client,
}

const RESET_INDEX_TTL_SECS: u64 = 3600;

fn user_key(email: &str) -> String {
    format!("user:{email}")
}

fn id_key(id: Uuid) -> String {
    format!("user_id:{id}")
}

fn reset_key(token: &str) -> String {
    format!("reset:{token}")
}

/// On-wire shape of a user document. Unlike the API projection on `User`,
/// this keeps the secret fields, since the document IS the storage.
#[derive(Debug, Serialize, Deserialize)]
struct UserDoc {
    id: Uuid,
    email: String,
    password_hash: String,
    full_name: String,
    is_active: bool,
    is_admin: bool,
    #[serde(with = "time::serde::timestamp")]
    created_at: OffsetDateTime,
    reset_token: Option<String>,
    #[serde(default, with = "time::serde::timestamp::option")]
    reset_token_expires: Option<OffsetDateTime>,
}

impl From<&User> for UserDoc {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            full_name: user.full_name.clone(),
            is_active: user.is_active,
            is_admin: user.is_admin,
            created_at: user.created_at,
            reset_token: user.reset_token.clone(),
            reset_token_expires: user.reset_token_expires,
        }
    }
}

impl From<UserDoc> for User {
    fn from(doc: UserDoc) -> Self {
        Self {
            id: doc.id,
            email: doc.email,
            password_hash: doc.password_hash,
            full_name: doc.full_name,
            is_active: doc.is_active,
            is_admin: doc.is_admin,
            created_at: doc.created_at,
            reset_token: doc.reset_token,
            reset_token_expires: doc.reset_token_expires,
        }
    }
}

fn encode(user: &User) -> Result<String, StoreError> {
    serde_json::to_string(&UserDoc::from(user))
        .context("encode user document")
        .map_err(StoreError::Backend)
}

fn decode(json: &str) -> Result<User, StoreError> {
    serde_json::from_str::<UserDoc>(json)
        .context("decode user document")
        .map(User::from)
        .map_err(StoreError::Backend)
}

impl DocumentStore {
    pub fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url).context("open redis client")?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("redis connection")
            .map_err(StoreError::Backend)
    }

    async fn fetch_doc(
        &self,
        conn: &mut MultiplexedConnection,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let raw: Option<String> = conn
            .get(user_key(email))
            .await
            .context("redis get user")
            .map_err(StoreError::Backend)?;
        raw.map(|json| decode(&json)).transpose()
    }
}

#[async_trait]
impl UserStore for DocumentStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn().await?;
        self.fetch_doc(&mut conn, email).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn().await?;
        let email: Option<String> = conn
            .get(id_key(id))
            .await
            .context("redis get id index")
            .map_err(StoreError::Backend)?;
        match email {
            Some(email) => self.fetch_doc(&mut conn, &email).await,
            None => Ok(None),
        }
    }

    async fn get_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn().await?;
        let email: Option<String> = conn
            .get(reset_key(token))
            .await
            .context("redis get reset index")
            .map_err(StoreError::Backend)?;
        let Some(email) = email else { return Ok(None) };
        let Some(user) = self.fetch_doc(&mut conn, &email).await? else {
            return Ok(None);
        };
        // The index key is advisory; the document decides. Strict `>` on the
        // expiry, and the token must still be the one stored.
        let live = user.reset_token.as_deref() == Some(token)
            && user
                .reset_token_expires
                .is_some_and(|exp| exp > OffsetDateTime::now_utc());
        Ok(live.then_some(user))
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut conn = self.conn().await?;
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
        let json = encode(&user)?;
        let claimed: bool = conn
            .set_nx(user_key(&user.email), json)
            .await
            .context("redis set_nx user")
            .map_err(StoreError::Backend)?;
        if !claimed {
            return Err(StoreError::DuplicateEmail);
        }
        let _: () = conn
            .set(id_key(user.id), &user.email)
            .await
            .context("redis set id index")
            .map_err(StoreError::Backend)?;
        debug!(user_id = %user.id, "user document created");
        Ok(user)
    }

    async fn update(&self, email: &str, changes: UserUpdate) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn().await?;
        let Some(old) = self.fetch_doc(&mut conn, email).await? else {
            return Ok(None);
        };

        let mut user = old.clone();
        apply_update(&mut user, &changes);
        let json = encode(&user)?;

        if user.email != old.email {
            // Claim the new email key first; losing the claim is the same
            // DuplicateEmail the relational constraint would raise.
            let claimed: bool = conn
                .set_nx(user_key(&user.email), json)
                .await
                .context("redis set_nx moved user")
                .map_err(StoreError::Backend)?;
            if !claimed {
                return Err(StoreError::DuplicateEmail);
            }
            let _: () = conn
                .del(user_key(&old.email))
                .await
                .context("redis del old user")
                .map_err(StoreError::Backend)?;
            let _: () = conn
                .set(id_key(user.id), &user.email)
                .await
                .context("redis set id index")
                .map_err(StoreError::Backend)?;
            // A pending reset index still points at the old email; re-point
            // it so the token stays live across the move, same as the
            // relational backend.
            if let (Some(token), None) = (&user.reset_token, &changes.reset) {
                let remaining = user
                    .reset_token_expires
                    .map(|exp| (exp - OffsetDateTime::now_utc()).whole_seconds())
                    .unwrap_or(0);
                if remaining > 0 {
                    let _: () = conn
                        .set_ex(reset_key(token), &user.email, remaining as u64)
                        .await
                        .context("redis repoint reset index")
                        .map_err(StoreError::Backend)?;
                }
            }
        } else {
            let _: () = conn
                .set(user_key(&user.email), json)
                .await
                .context("redis set user")
                .map_err(StoreError::Backend)?;
        }

        match &changes.reset {
            Some(ResetTokenChange::Set { token, .. }) => {
                let _: () = conn
                    .set_ex(reset_key(token), &user.email, RESET_INDEX_TTL_SECS)
                    .await
                    .context("redis set reset index")
                    .map_err(StoreError::Backend)?;
            }
            Some(ResetTokenChange::Clear) => {
                if let Some(token) = &old.reset_token {
                    let _: () = conn
                        .del(reset_key(token))
                        .await
                        .context("redis del reset index")
                        .map_err(StoreError::Backend)?;
                }
            }
            None => {}
        }

        Ok(Some(user))
    }

    async fn delete(&self, email: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let Some(user) = self.fetch_doc(&mut conn, email).await? else {
            return Ok(());
        };
        let mut keys = vec![user_key(email), id_key(user.id)];
        if let Some(token) = &user.reset_token {
            keys.push(reset_key(token));
        }
        let _: () = conn
            .del(keys)
            .await
            .context("redis del user keys")
            .map_err(StoreError::Backend)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>("user:*")
                .await
                .context("redis scan users")
                .map_err(StoreError::Backend)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut users = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn
                .get(&key)
                .await
                .context("redis get user")
                .map_err(StoreError::Backend)?;
            if let Some(json) = raw {
                users.push(decode(&json)?);
            }
        }
        users.sort_by_key(|u: &User| u.created_at);
        Ok(users)
    }
}
