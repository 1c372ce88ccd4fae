//! REST endpoints for org-chart views and position validation.

use std::sync::Arc;

use axum::extract::{FromRef, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::validator::{PositionBackend, PositionValidator};
use crate::api::{self, ApiResult};
use crate::auth::{AdminUser, AuthUser, TokenIssuer};
use crate::error::{Error, OrgChartError};
use crate::store::GraphStore;
use crate::users::normalize_email;

/// Shared state for org-chart routes.
#[derive(Clone)]
pub struct OrgChartRouteState {
    pub store: Arc<dyn GraphStore>,
    pub positions: Arc<dyn PositionBackend>,
    pub issuer: Arc<TokenIssuer>,
}

impl FromRef<OrgChartRouteState> for Arc<TokenIssuer> {
    fn from_ref(state: &OrgChartRouteState) -> Self {
        Arc::clone(&state.issuer)
    }
}

#[derive(Deserialize)]
struct ReportRequest {
    #[serde(default)]
    description: String,
}

/// GET /orgchart/{email}
///
/// `me` resolves to the caller.
async fn get_org_chart(
    State(state): State<OrgChartRouteState>,
    AuthUser(principal): AuthUser,
    Path(email): Path<String>,
) -> ApiResult {
    let email = if email == "me" {
        principal.email
    } else {
        normalize_email(&email)
    };
    let view = state
        .store
        .org_chart(&email)
        .await?
        .ok_or(OrgChartError::PositionNotFound(email))?;
    api::ok(view)
}

/// GET /orgchart/me/position
async fn get_position(
    State(state): State<OrgChartRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    let mut validator = PositionValidator::new(state.positions, principal.email);
    validator.load_position().await;
    if let Some(error) = validator.state().error.clone() {
        return Err(OrgChartError::Backend(error).into());
    }
    api::ok(validator.into_state())
}

/// POST /orgchart/me/validate
async fn validate_position(
    State(state): State<OrgChartRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    let email = principal.email;
    let mut validator = PositionValidator::new(state.positions, email.clone());
    validator.load_position().await;
    if validator.state().error.is_none() && validator.state().position.is_none() {
        return Err(OrgChartError::PositionNotFound(email).into());
    }
    validator.validate_position().await;
    if let Some(error) = validator.state().error.clone() {
        return Err(OrgChartError::Backend(error).into());
    }
    api::ok(validator.into_state())
}

/// POST /orgchart/me/report
async fn report_issue(
    State(state): State<OrgChartRouteState>,
    AuthUser(principal): AuthUser,
    Json(body): Json<ReportRequest>,
) -> ApiResult {
    if body.description.trim().is_empty() {
        return Err(OrgChartError::EmptyReport.into());
    }
    let mut validator = PositionValidator::new(state.positions, principal.email);
    validator.open_report_modal();
    match validator.report_issue(&body.description).await {
        Some(issue) => api::ok(issue),
        None => Err(Error::OrgChart(OrgChartError::Backend(
            validator.state().error.clone().unwrap_or_default(),
        ))),
    }
}

/// GET /admin/orgchart/issues
async fn list_issues(State(state): State<OrgChartRouteState>, _admin: AdminUser) -> ApiResult {
    api::ok(state.store.list_org_chart_issues().await?)
}

/// Build the org-chart routes.
pub fn orgchart_routes(state: OrgChartRouteState) -> Router {
    Router::new()
        .route("/orgchart/{email}", get(get_org_chart))
        .route("/orgchart/me/position", get(get_position))
        .route("/orgchart/me/validate", post(validate_position))
        .route("/orgchart/me/report", post(report_issue))
        .route("/admin/orgchart/issues", get(list_issues))
        .with_state(state)
}
