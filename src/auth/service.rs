use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::{
    auth::{
        jwt::JwtKeys,
        password::{hash_password, verify_password},
    },
    email::Mailer,
    error::AuthError,
    store::{NewUser, ResetTokenChange, User, UserStore, UserUpdate},
};

pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Register a password account. The first account in an empty store becomes
/// the admin; everyone after that starts unprivileged.
pub async fn register(
    store: &dyn UserStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
    full_name: &str,
) -> Result<(User, String), AuthError> {
    let is_first_user = store.list_all().await?.is_empty();
    let password_hash = hash_password(password)?;
    let user = store
        .create(NewUser {
            email: email.to_string(),
            password_hash,
            full_name: full_name.to_string(),
            is_admin: is_first_user,
        })
        .await?;
    let token = keys.sign(&user.email)?;
    info!(user_id = %user.id, is_admin = user.is_admin, "user registered");
    Ok((user, token))
}

/// Password login. Unknown email and wrong password are indistinguishable to
/// the caller; federated-only accounts (empty hash) always fail here.
pub async fn login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
) -> Result<(User, String), AuthError> {
    let Some(user) = store.get_by_email(email).await? else {
        warn!("login for unknown email");
        return Err(AuthError::InvalidCredentials);
    };
    if user.password_hash.is_empty() || !verify_password(password, &user.password_hash) {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(AuthError::InvalidCredentials);
    }
    let token = keys.sign(&user.email)?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, token))
}

pub(crate) fn generate_reset_token() -> String {
    // 32 bytes of OS entropy, URL-safe for the emailed link.
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Open a one-hour reset window and email the link. The outcome is
/// deliberately identical whether or not the email exists, and a failed send
/// is logged but never surfaced, so nothing here can confirm an address.
pub async fn initiate_reset(
    store: &dyn UserStore,
    mailer: &dyn Mailer,
    frontend_url: &str,
    email: &str,
) -> Result<(), AuthError> {
    let Some(user) = store.get_by_email(email).await? else {
        return Ok(());
    };

    let token = generate_reset_token();
    let expires = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    store
        .update(
            &user.email,
            UserUpdate {
                reset: Some(ResetTokenChange::Set {
                    token: token.clone(),
                    expires,
                }),
                ..Default::default()
            },
        )
        .await?;

    let reset_url = format!("{frontend_url}/reset-confirm?token={token}");
    let body = crate::email::reset_email_body(&user.full_name, &reset_url);
    if !mailer
        .send_email(&user.email, "Password Reset Request", &body)
        .await
    {
        warn!(user_id = %user.id, "reset email could not be sent");
    }
    info!(user_id = %user.id, "password reset initiated");
    Ok(())
}

/// Consume a reset token: the password update and the clearing of both reset
/// fields land as one logical update, making the token single-use.
pub async fn confirm_reset(
    store: &dyn UserStore,
    token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let Some(user) = store.get_by_reset_token(token).await? else {
        // Absent and expired look the same on purpose.
        return Err(AuthError::InvalidOrExpiredToken);
    };
    let password_hash = hash_password(new_password)?;
    store
        .update(
            &user.email,
            UserUpdate {
                password_hash: Some(password_hash),
                reset: Some(ResetTokenChange::Clear),
                ..Default::default()
            },
        )
        .await?;
    info!(user_id = %user.id, "password reset completed");
    Ok(())
}

/// Update the caller's own name and email. The store re-checks email
/// uniqueness against all other users.
pub async fn update_profile(
    store: &dyn UserStore,
    user: &User,
    full_name: &str,
    email: &str,
) -> Result<User, AuthError> {
    let updated = store
        .update(
            &user.email,
            UserUpdate {
                full_name: Some(full_name.to_string()),
                email: Some(email.to_string()),
                ..Default::default()
            },
        )
        .await?
        .ok_or(AuthError::NotFound)?;
    info!(user_id = %updated.id, "profile updated");
    Ok(updated)
}
