//! Admin console: user CRUD, gated by the admin authority (see
//! `auth::session::RequireAdmin`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{handlers::PublicUser, password::hash_password, service::is_valid_email, session::RequireAdmin},
    error::AuthError,
    store::{NewUser, User, UserStore, UserUpdate},
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/users/:id", put(edit_user).delete(delete_user))
}

#[derive(Debug, Deserialize)]
pub struct AdminCreateRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// Role is explicit input here; the first-user rule does not apply to
    /// admin-driven creation. Absent means false, decided at this boundary.
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdminEditRequest {
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Create a user with an explicit role.
pub async fn admin_create_user(
    store: &dyn UserStore,
    req: AdminCreateRequest,
) -> Result<User, AuthError> {
    let password_hash = hash_password(&req.password)?;
    let user = store
        .create(NewUser {
            email: req.email,
            password_hash,
            full_name: req.full_name,
            is_admin: req.is_admin,
        })
        .await?;
    info!(user_id = %user.id, is_admin = user.is_admin, "user created by admin");
    Ok(user)
}

/// Edit name, email and admin flag of the user with this id.
pub async fn admin_edit_user(
    store: &dyn UserStore,
    target_id: Uuid,
    req: AdminEditRequest,
) -> Result<User, AuthError> {
    let target = store
        .get_by_id(target_id)
        .await?
        .ok_or(AuthError::NotFound)?;
    let updated = store
        .update(
            &target.email,
            UserUpdate {
                full_name: Some(req.full_name),
                email: Some(req.email),
                is_admin: Some(req.is_admin),
                ..Default::default()
            },
        )
        .await?
        .ok_or(AuthError::NotFound)?;
    info!(user_id = %updated.id, "user edited by admin");
    Ok(updated)
}

/// Delete the user with this id. Admins cannot delete themselves through
/// this path; the self-service deletion route remains open to them.
pub async fn admin_delete_user(
    store: &dyn UserStore,
    admin: &User,
    target_id: Uuid,
) -> Result<(), AuthError> {
    if target_id == admin.id {
        warn!(user_id = %admin.id, "admin attempted to delete own account");
        return Err(AuthError::SelfOperationForbidden);
    }
    let target = store
        .get_by_id(target_id)
        .await?
        .ok_or(AuthError::NotFound)?;
    store.delete(&target.email).await?;
    info!(user_id = %target.id, admin_id = %admin.id, "user deleted by admin");
    Ok(())
}

#[instrument(skip(state, _admin))]
async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<PublicUser>>, AuthError> {
    let users = state.store.list_all().await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state, _admin, payload))]
async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(mut payload): Json<AdminCreateRequest>,
) -> Result<(StatusCode, Json<PublicUser>), axum::response::Response> {
    payload.email = payload.email.trim().to_string();
    if !is_valid_email(&payload.email) || payload.full_name.trim().is_empty() {
        return Err(axum::response::IntoResponse::into_response((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid user fields" })),
        )));
    }
    let user = admin_create_user(state.store.as_ref(), payload)
        .await
        .map_err(axum::response::IntoResponse::into_response)?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, _admin, payload))]
async fn edit_user(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(mut payload): Json<AdminEditRequest>,
) -> Result<Json<PublicUser>, AuthError> {
    payload.email = payload.email.trim().to_string();
    let user = admin_edit_user(state.store.as_ref(), id, payload).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, admin))]
async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    admin_delete_user(state.store.as_ref(), &admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
