//! REST endpoints for login, token refresh and the caller's own account.

use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::extract::AuthUser;
use super::jwt::TokenIssuer;
use super::service::AuthService;
use crate::api::{self, ApiResult};

/// Shared state for auth routes.
#[derive(Clone)]
pub struct AuthRouteState {
    pub auth: Arc<AuthService>,
    pub issuer: Arc<TokenIssuer>,
}

impl FromRef<AuthRouteState> for Arc<TokenIssuer> {
    fn from_ref(state: &AuthRouteState) -> Self {
        Arc::clone(&state.issuer)
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

/// POST /auth/login
async fn login(State(state): State<AuthRouteState>, Json(body): Json<LoginRequest>) -> ApiResult {
    api::ok(state.auth.login(&body.email, &body.password).await?)
}

/// POST /auth/refresh
async fn refresh(
    State(state): State<AuthRouteState>,
    Json(body): Json<RefreshRequest>,
) -> ApiResult {
    api::ok(state.auth.refresh(&body.refresh_token).await?)
}

/// POST /auth/logout
///
/// Tokens are stateless; the client discards them.
async fn logout(AuthUser(principal): AuthUser) -> ApiResult {
    tracing::debug!(email = %principal.email, "Logout");
    api::message("Logged out")
}

/// GET /auth/me
async fn me(State(state): State<AuthRouteState>, AuthUser(principal): AuthUser) -> ApiResult {
    api::ok(state.auth.me(&principal).await?)
}

/// POST /auth/change-password
async fn change_password(
    State(state): State<AuthRouteState>,
    AuthUser(principal): AuthUser,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult {
    state
        .auth
        .change_password(&principal, &body.current_password, &body.new_password)
        .await?;
    api::message("Password changed")
}

/// Build the auth REST routes.
pub fn auth_routes(state: AuthRouteState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
        .with_state(state)
}
