//! Admin endpoints for managing accounts.

use std::sync::Arc;

use axum::extract::{FromRef, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::model::UserUpdate;
use super::service::{CreateUser, UserService};
use crate::api::{self, ApiResult};
use crate::auth::{AdminUser, TokenIssuer};
use crate::error::Error;

/// Shared state for admin user routes.
#[derive(Clone)]
pub struct UserRouteState {
    pub users: Arc<UserService>,
    pub issuer: Arc<TokenIssuer>,
}

impl FromRef<UserRouteState> for Arc<TokenIssuer> {
    fn from_ref(state: &UserRouteState) -> Self {
        Arc::clone(&state.issuer)
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest {
    new_password: Option<String>,
}

/// GET /admin/users
async fn list_users(State(state): State<UserRouteState>, _admin: AdminUser) -> ApiResult {
    api::ok(state.users.list().await?)
}

/// POST /admin/users
async fn create_user(
    State(state): State<UserRouteState>,
    AdminUser(admin): AdminUser,
    Json(body): Json<CreateUser>,
) -> ApiResult {
    let user = state.users.create(body).await?;
    tracing::info!(by = %admin.email, email = %user.email, "Admin created user");
    api::ok(user)
}

/// GET /admin/users/{id}
async fn get_user(
    State(state): State<UserRouteState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult {
    api::ok(state.users.get(&id).await?)
}

/// PATCH /admin/users/{id}
async fn update_user(
    State(state): State<UserRouteState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(body): Json<UserUpdate>,
) -> ApiResult {
    api::ok(state.users.update(&id, body).await?)
}

/// DELETE /admin/users/{id}
async fn delete_user(
    State(state): State<UserRouteState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> ApiResult {
    if id == admin.user_id {
        return Err(Error::Validation("administrators cannot delete themselves".into()));
    }
    state.users.delete(&id).await?;
    api::message("User deleted")
}

/// POST /admin/users/{id}/reset-password
///
/// Body is optional; without `newPassword` a temporary one is generated and
/// returned once.
async fn reset_password(
    State(state): State<UserRouteState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    body: Option<Json<ResetPasswordRequest>>,
) -> ApiResult {
    let Json(body) = body.unwrap_or_default();
    api::ok(state.users.reset_password(&id, body.new_password).await?)
}

/// Build the admin user routes.
pub fn user_routes(state: UserRouteState) -> Router {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route(
            "/admin/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/admin/users/{id}/reset-password", post(reset_password))
        .with_state(state)
}
