//! JSON envelope shared by every REST endpoint.
//!
//! Success bodies are `{"success": true, "data": ...}`; failures are
//! `{"success": false, "error": "..."}` with a status derived from the error.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{
    AuthError, DatabaseError, Error, IngestError, OnboardingError, OrgChartError,
};

/// What handlers return.
pub type ApiResult = Result<Json<Value>, Error>;

/// Wrap `data` in the success envelope.
pub fn ok<T: Serialize>(data: T) -> ApiResult {
    let data = serde_json::to_value(data)
        .map_err(|e| Error::Database(DatabaseError::Serialization(e.to_string())))?;
    Ok(Json(json!({ "success": true, "data": data })))
}

/// Success envelope with a human-readable message and no payload.
pub fn message(text: &str) -> ApiResult {
    Ok(Json(json!({ "success": true, "message": text })))
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(e) => match e {
                DatabaseError::NotFound { .. } => StatusCode::NOT_FOUND,
                DatabaseError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Auth(e) => match e {
                AuthError::InvalidCredentials
                | AuthError::MissingToken
                | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
                AuthError::Forbidden(_) | AuthError::BootstrapAccount => StatusCode::FORBIDDEN,
                AuthError::WeakPassword { .. } | AuthError::InvalidEmail(_) => {
                    StatusCode::BAD_REQUEST
                }
                AuthError::EmailTaken(_) => StatusCode::CONFLICT,
                AuthError::UserNotFound(_) => StatusCode::NOT_FOUND,
                AuthError::Hashing(_) | AuthError::Signing(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Error::Ingest(e) => match e {
                IngestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                IngestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            Error::Onboarding(e) => match e {
                OnboardingError::NotStarted => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            Error::OrgChart(e) => match e {
                OrgChartError::PositionNotFound(_) => StatusCode::NOT_FOUND,
                OrgChartError::EmptyReport => StatusCode::BAD_REQUEST,
                OrgChartError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            self.to_string()
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}
