//! REST endpoints for the onboarding wizard.

use std::sync::Arc;

use axum::extract::{FromRef, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use super::manager::{OnboardingManager, SessionAction};
use crate::api::{self, ApiResult};
use crate::auth::{AuthUser, Principal, TokenIssuer};

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
    pub issuer: Arc<TokenIssuer>,
}

impl FromRef<OnboardingRouteState> for Arc<TokenIssuer> {
    fn from_ref(state: &OnboardingRouteState) -> Self {
        Arc::clone(&state.issuer)
    }
}

/// GET /onboarding/prefill
async fn get_prefill(
    State(state): State<OnboardingRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    let prefill = state.manager.prefill(&principal).await?;
    api::ok(json!({ "userId": principal.user_id, "prefill": prefill }))
}

/// GET /onboarding/status
async fn get_status(
    State(state): State<OnboardingRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    api::ok(state.manager.status(&principal.email).await?)
}

/// GET /onboarding/session
async fn get_session(
    State(state): State<OnboardingRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    api::ok(state.manager.session(&principal.email).await?)
}

async fn apply(
    state: &OnboardingRouteState,
    principal: &Principal,
    action: &str,
    body: Option<Json<Value>>,
) -> ApiResult {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let action = SessionAction::parse(action, body)?;
    api::ok(state.manager.apply(principal, action).await?)
}

/// POST /onboarding/session/{action}
async fn session_action(
    State(state): State<OnboardingRouteState>,
    AuthUser(principal): AuthUser,
    Path(action): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult {
    apply(&state, &principal, &action, body).await
}

/// POST /onboarding/session/conversation/{action}
async fn conversation_action(
    State(state): State<OnboardingRouteState>,
    AuthUser(principal): AuthUser,
    Path(action): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult {
    apply(&state, &principal, &format!("conversation/{action}"), body).await
}

/// POST /onboarding/complete
async fn complete(
    State(state): State<OnboardingRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    api::ok(state.manager.complete(&principal).await?)
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/onboarding/prefill", get(get_prefill))
        .route("/onboarding/status", get(get_status))
        .route("/onboarding/session", get(get_session))
        .route("/onboarding/session/{action}", post(session_action))
        .route(
            "/onboarding/session/conversation/{action}",
            post(conversation_action),
        )
        .route("/onboarding/complete", post(complete))
        .with_state(state)
}
