use async_trait::async_trait;
use axum::{
    extract::{FromRef, Path, Query, State},
    response::{IntoResponse, Redirect},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::{handlers::session_cookie, jwt::JwtKeys},
    error::AuthError,
    state::AppState,
    store::{NewUser, User, UserStore},
};

/// Identity asserted by an external provider after its own OAuth exchange.
/// The handshake itself lives outside this service; by the time this struct
/// exists the provider has already verified the email.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedIdentity {
    pub email: String,
    pub full_name: String,
}

/// Capability that turns a provider callback into a verified identity.
/// Returns None when no email can be resolved for the exchange.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, provider: &str, code: &str) -> anyhow::Result<Option<VerifiedIdentity>>;
}

/// Default provider when no external integration is wired up: resolves
/// nothing, so every federated login falls back to the login page.
pub struct UnconfiguredProvider;

#[async_trait]
impl IdentityProvider for UnconfiguredProvider {
    async fn verify(&self, provider: &str, _code: &str) -> anyhow::Result<Option<VerifiedIdentity>> {
        warn!(provider = %provider, "no identity provider configured");
        Ok(None)
    }
}

/// Find-or-create the local account for a verified external identity and
/// mint a session for it.
///
/// Accounts created here carry an empty password hash: password login stays
/// unavailable unless a reset is performed later. When a password account
/// already owns the email, the session simply attaches to it without
/// touching its hash. That linking trusts the provider's verified-email
/// claim; see the account-takeover note in DESIGN.md.
pub async fn federated_login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    identity: VerifiedIdentity,
) -> Result<(User, String), AuthError> {
    let user = match store.get_by_email(&identity.email).await? {
        Some(existing) => existing,
        None => {
            let created = store
                .create(NewUser {
                    email: identity.email,
                    password_hash: String::new(),
                    full_name: identity.full_name,
                    is_admin: false,
                })
                .await?;
            info!(user_id = %created.id, "federated account created");
            created
        }
    };
    let token = keys.sign(&user.email)?;
    info!(user_id = %user.id, "federated login");
    Ok((user, token))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/federated/:provider/callback", get(callback))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: String,
}

#[instrument(skip(state, jar, query))]
async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AuthError> {
    let identity = state
        .identity
        .verify(&provider, &query.code)
        .await
        .map_err(AuthError::Internal)?;
    let Some(identity) = identity else {
        // No resolvable email: abort to the login page.
        return Ok((jar, Redirect::to("/login")).into_response());
    };
    let keys = JwtKeys::from_ref(&state);
    let (_, token) = federated_login(state.store.as_ref(), &keys, identity).await?;
    let jar = jar.add(session_cookie(token));
    Ok((jar, Redirect::to("/me")).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service::{login, register};
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", Duration::from_secs(1800))
    }

    fn identity(email: &str, name: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            email: email.into(),
            full_name: name.into(),
        }
    }

    #[tokio::test]
    async fn creates_password_less_account_when_absent() {
        let store = MemoryStore::new();
        let keys = keys();
        let (user, token) = federated_login(&store, &keys, identity("fed@x.com", "Fed"))
            .await
            .unwrap();
        assert!(user.password_hash.is_empty());
        assert!(user.is_active);
        assert_eq!(keys.verify(&token).unwrap(), "fed@x.com");

        // Password login is unavailable for this account.
        let err = login(&store, &keys, "fed@x.com", "anything").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn attaches_to_existing_password_account_without_touching_hash() {
        let store = MemoryStore::new();
        let keys = keys();
        let (registered, _) = register(&store, &keys, "a@x.com", "pw1", "Alice")
            .await
            .unwrap();

        let (user, token) = federated_login(&store, &keys, identity("a@x.com", "Alice G"))
            .await
            .unwrap();
        assert_eq!(user.id, registered.id);
        assert_eq!(keys.verify(&token).unwrap(), "a@x.com");

        let stored = store.get_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, registered.password_hash);
        assert_eq!(stored.full_name, "Alice");
    }

    #[tokio::test]
    async fn federated_account_does_not_claim_first_user_admin() {
        let store = MemoryStore::new();
        let keys = keys();
        let (user, _) = federated_login(&store, &keys, identity("fed@x.com", "Fed"))
            .await
            .unwrap();
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn unconfigured_provider_resolves_nothing() {
        let resolved = UnconfiguredProvider.verify("google", "code").await.unwrap();
        assert!(resolved.is_none());
    }
}
