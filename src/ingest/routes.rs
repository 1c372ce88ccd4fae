//! Admin endpoints for roster ingestion.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRef, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use super::service::IngestService;
use crate::api::{self, ApiResult};
use crate::auth::{AdminUser, TokenIssuer};
use crate::error::{Error, IngestError};

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state for ingest routes.
#[derive(Clone)]
pub struct IngestRouteState {
    pub ingest: Arc<IngestService>,
    pub issuer: Arc<TokenIssuer>,
}

impl FromRef<IngestRouteState> for Arc<TokenIssuer> {
    fn from_ref(state: &IngestRouteState) -> Self {
        Arc::clone(&state.issuer)
    }
}

/// GET /admin/ingest/status
async fn get_status(State(state): State<IngestRouteState>, _admin: AdminUser) -> ApiResult {
    api::ok(state.ingest.status().await?)
}

/// POST /admin/ingest/orgchart
///
/// Multipart upload with the roster in the `file` field.
async fn upload_orgchart(
    State(state): State<IngestRouteState>,
    AdminUser(admin): AdminUser,
    mut multipart: Multipart,
) -> ApiResult {
    let limit_mb = state.ingest.max_bytes() / (1024 * 1024);
    let multipart_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::from(IngestError::TooLarge { limit_mb })
        } else {
            Error::Validation(format!("invalid multipart body: {e}"))
        }
    };

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            file = Some(field.bytes().await.map_err(multipart_error)?);
            break;
        }
    }
    let Some(bytes) = file else {
        return Err(Error::Validation("No file uploaded".into()));
    };

    tracing::info!(by = %admin.email, bytes = bytes.len(), "Roster upload received");
    api::ok(state.ingest.ingest_bytes(&bytes).await?)
}

fn body_limit(max_bytes: u64) -> usize {
    usize::try_from(max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD)
}

/// Build the ingest routes.
pub fn ingest_routes(state: IngestRouteState) -> Router {
    let body_limit = body_limit(state.ingest.max_bytes());
    Router::new()
        .route("/admin/ingest/status", get(get_status))
        .route(
            "/admin/ingest/orgchart",
            post(upload_orgchart).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_adds_multipart_overhead() {
        assert_eq!(body_limit(1024 * 1024), 1024 * 1024 + MULTIPART_OVERHEAD);
        assert_eq!(body_limit(u64::MAX), usize::MAX);
    }
}
