use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtKeys,
        service,
        session::{RequireUser, SESSION_COOKIE},
    },
    error::AuthError,
    state::AppState,
    store::User,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/reset-request", post(reset_request))
        .route("/auth/reset-confirm", post(reset_confirm))
        .route("/me", get(me).delete(delete_account))
        .route("/me/profile", put(update_profile))
}

/// Build the HTTP-only session cookie.
pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .path("/")
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .path("/")
        .build();
    cookie.make_removal();
    cookie
}

#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_active: user.is_active,
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

fn validate_registration(payload: &RegisterRequest) -> Result<(), (StatusCode, String)> {
    if !service::is_valid_email(&payload.email) {
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    if payload.password.len() < 8 {
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }
    if payload.full_name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Full name is required".into()));
    }
    Ok(())
}

#[instrument(skip(state, jar, payload))]
async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(CookieJar, (StatusCode, Json<PublicUser>)), axum::response::Response> {
    payload.email = payload.email.trim().to_string();
    if let Err((status, msg)) = validate_registration(&payload) {
        warn!(%msg, "registration rejected");
        return Err(axum::response::IntoResponse::into_response((
            status,
            Json(json!({ "error": msg })),
        )));
    }

    let keys = JwtKeys::from_ref(&state);
    let (user, token) = service::register(
        state.store.as_ref(),
        &keys,
        &payload.email,
        &payload.password,
        &payload.full_name,
    )
    .await
    .map_err(axum::response::IntoResponse::into_response)?;

    Ok((
        jar.add(session_cookie(token)),
        (StatusCode::CREATED, Json(user.into())),
    ))
}

#[instrument(skip(state, jar, payload))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<PublicUser>), AuthError> {
    payload.email = payload.email.trim().to_string();
    let keys = JwtKeys::from_ref(&state);
    let (user, token) =
        service::login(state.store.as_ref(), &keys, &payload.email, &payload.password).await?;
    Ok((jar.add(session_cookie(token)), Json(user.into())))
}

#[instrument(skip(jar))]
async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (jar.add(clear_session_cookie()), StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
async fn reset_request(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    service::initiate_reset(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &state.config.frontend_url,
        payload.email.trim(),
    )
    .await?;
    // One response for every outcome; nothing confirms an address.
    Ok(Json(json!({
        "message": "If your email exists, you'll receive a reset link."
    })))
}

#[instrument(skip(state, payload))]
async fn reset_confirm(
    State(state): State<AppState>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<Json<serde_json::Value>, axum::response::Response> {
    if payload.new_password.len() < 8 {
        return Err(axum::response::IntoResponse::into_response((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Password too short" })),
        )));
    }
    service::confirm_reset(state.store.as_ref(), &payload.token, &payload.new_password)
        .await
        .map_err(axum::response::IntoResponse::into_response)?;
    Ok(Json(json!({ "message": "Password reset successful" })))
}

#[instrument(skip_all)]
async fn me(RequireUser(user): RequireUser) -> Json<PublicUser> {
    Json(user.into())
}

#[instrument(skip(state, user, payload))]
async fn update_profile(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(mut payload): Json<ProfileRequest>,
) -> Result<Json<PublicUser>, axum::response::Response> {
    payload.email = payload.email.trim().to_string();
    if !service::is_valid_email(&payload.email) || payload.full_name.trim().is_empty() {
        warn!("profile update rejected");
        return Err(axum::response::IntoResponse::into_response((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid profile fields" })),
        )));
    }
    let updated = service::update_profile(
        state.store.as_ref(),
        &user,
        &payload.full_name,
        &payload.email,
    )
    .await
    .map_err(axum::response::IntoResponse::into_response)?;
    Ok(Json(updated.into()))
}

#[instrument(skip(state, jar, user))]
async fn delete_account(
    State(state): State<AppState>,
    jar: CookieJar,
    RequireUser(user): RequireUser,
) -> Result<(CookieJar, StatusCode), AuthError> {
    state.store.delete(&user.email).await?;
    info!(user_id = %user.id, "account self-deleted");
    Ok((jar.add(clear_session_cookie()), StatusCode::NO_CONTENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_reset_password_is_an_input_error_not_a_token_error() {
        let state = AppState::fake();
        let response = reset_confirm(
            State(state),
            Json(ResetConfirmRequest {
                token: "whatever".into(),
                new_password: "short".into(),
            }),
        )
        .await
        .unwrap_err();

        let (parts, body) = response.into_parts();
        assert_eq!(parts.status, StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(body, 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Password too short");
    }
}
