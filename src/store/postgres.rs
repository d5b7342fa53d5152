use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{apply_update, NewUser, StoreError, User, UserStore, UserUpdate};

const COLUMNS: &str = "id, email, password_hash, full_name, is_active, is_admin, \
                       created_at, reset_token, reset_token_expires";

/// Relational backend. Each call runs within one short-lived connection or
/// transaction taken from the pool; the unique index on email is the source
/// of truth for uniqueness.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
        Ok(Self { pool })
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    // A concurrent insert can beat a prior existence check; the constraint
    // violation is the same DuplicateEmail outcome, not a crash.
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateEmail;
        }
    }
    StoreError::Backend(anyhow::Error::new(err))
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn get_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        // Strict `>`: a token is dead at its expiry instant.
        sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users \
             WHERE reset_token = $1 AND reset_token_expires > $2"
        ))
        .bind(token)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, email, password_hash, full_name, is_active, is_admin, created_at) \
             VALUES ($1, $2, $3, $4, TRUE, $5, $6) \
             RETURNING {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.full_name)
        .bind(new.is_admin)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        debug!(user_id = %user.id, "user row inserted");
        Ok(user)
    }

    async fn update(&self, email: &str, changes: UserUpdate) -> Result<Option<User>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let Some(mut user) = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE email = $1 FOR UPDATE"
        ))
        .bind(email)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        else {
            return Ok(None);
        };

        apply_update(&mut user, &changes);

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET email = $2, password_hash = $3, full_name = $4, \
             is_active = $5, is_admin = $6, reset_token = $7, reset_token_expires = $8 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.is_active)
        .bind(user.is_admin)
        .bind(&user.reset_token)
        .bind(user.reset_token_expires)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(Some(user))
    }

    async fn delete(&self, email: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)
    }
}
