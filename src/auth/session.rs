use std::convert::Infallible;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, error};

use crate::{
    auth::jwt::JwtKeys,
    error::AuthError,
    state::AppState,
    store::{User, UserStore},
};

/// Cookie carrying the signed session token.
pub const SESSION_COOKIE: &str = "access_token";

/// Resolve a session token to its user. Every failure path degrades to
/// anonymous: a missing, corrupt or expired cookie is equivalent to no
/// cookie, an unknown subject or a deactivated account is no session.
/// Side-effect free and safe to run on every request.
pub async fn resolve_session(
    store: &dyn UserStore,
    keys: &JwtKeys,
    token: Option<&str>,
) -> Option<User> {
    let token = token?;
    let subject = keys.verify(token).ok()?;
    let user = match store.get_by_email(&subject).await {
        Ok(user) => user?,
        Err(e) => {
            error!(error = %e, "session lookup failed, treating as anonymous");
            return None;
        }
    };
    if !user.is_active {
        debug!(user_id = %user.id, "session for deactivated account ignored");
        return None;
    }
    Some(user)
}

/// Current session, if any. Never rejects; anonymous requests get `None`.
pub struct Session(pub Option<User>);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
        let keys = JwtKeys::from_ref(&state);
        let user = resolve_session(state.store.as_ref(), &keys, token.as_deref()).await;
        Ok(Session(user))
    }
}

/// Authenticated user, or the generic unauthorized response.
pub struct RequireUser(pub User);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Session(user) = Session::from_request_parts(parts, state)
            .await
            .unwrap_or(Session(None));
        user.map(RequireUser).ok_or(AuthError::Unauthorized)
    }
}

/// Admin authority gate: a resolved session whose user is an admin. Anyone
/// else gets the same generic unauthorized response as an anonymous caller.
pub struct RequireAdmin(pub User);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireUser(user) = RequireUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AuthError::Unauthorized);
        }
        Ok(RequireAdmin(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory::MemoryStore, NewUser, UserUpdate};
    use std::time::Duration;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", Duration::from_secs(1800))
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create(NewUser {
                email: "a@x.com".into(),
                password_hash: "hash".into(),
                full_name: "Alice".into(),
                is_admin: false,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn missing_token_is_anonymous() {
        let store = seeded_store().await;
        assert!(resolve_session(&store, &keys(), None).await.is_none());
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let store = seeded_store().await;
        let keys = keys();
        let token = keys.sign("a@x.com").unwrap();
        let user = resolve_session(&store, &keys, Some(&token)).await.unwrap();
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn corrupt_token_is_anonymous_not_an_error() {
        let store = seeded_store().await;
        assert!(resolve_session(&store, &keys(), Some("garbage"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn token_for_unknown_subject_is_anonymous() {
        let store = seeded_store().await;
        let keys = keys();
        let token = keys.sign("ghost@x.com").unwrap();
        assert!(resolve_session(&store, &keys, Some(&token)).await.is_none());
    }

    #[tokio::test]
    async fn session_extractor_reads_the_cookie() {
        use crate::state::AppState;
        use axum::http::{header, Request};

        let state = AppState::fake();
        state
            .store
            .create(NewUser {
                email: "a@x.com".into(),
                password_hash: "hash".into(),
                full_name: "Alice".into(),
                is_admin: false,
            })
            .await
            .unwrap();
        let keys = JwtKeys::from_ref(&state);
        let token = keys.sign("a@x.com").unwrap();

        let request = Request::builder()
            .uri("/")
            .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"))
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let Session(user) = Session::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(user.unwrap().email, "a@x.com");

        // No cookie header at all: anonymous, not an error.
        let request = Request::builder().uri("/").body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        let Session(user) = Session::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn deactivated_account_defeats_live_token() {
        let store = seeded_store().await;
        let keys = keys();
        let token = keys.sign("a@x.com").unwrap();
        assert!(resolve_session(&store, &keys, Some(&token)).await.is_some());

        store
            .update(
                "a@x.com",
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // The token itself is still unexpired and well signed.
        assert!(resolve_session(&store, &keys, Some(&token)).await.is_none());
    }
}
