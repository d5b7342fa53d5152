use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::store::StoreError;

/// Request-level failure taxonomy. Authentication and authorization variants
/// deliberately carry one generic message each so responses never reveal
/// whether an account or token exists.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("Not found")]
    NotFound,
    #[error("Not authorized")]
    Unauthorized,
    #[error("This operation is not permitted on your own account")]
    SelfOperationForbidden,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::DuplicateEmail => (StatusCode::CONFLICT, self.to_string()),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            AuthError::InvalidOrExpiredToken => (StatusCode::BAD_REQUEST, self.to_string()),
            AuthError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AuthError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AuthError::SelfOperationForbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AuthError::Internal(e) => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_details() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_duplicate_maps_to_conflict() {
        let err: AuthError = StoreError::DuplicateEmail.into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn credential_and_gate_failures_share_status() {
        // Unknown email and wrong password are the same response.
        assert_eq!(
            AuthError::InvalidCredentials.into_response().status(),
            AuthError::Unauthorized.into_response().status()
        );
    }
}
