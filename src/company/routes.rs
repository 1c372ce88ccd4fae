//! Company profile, organization structure and per-user profile data.

use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::routing::get;
use axum::{Json, Router};

use super::model::CompanyProfileUpdate;
use crate::api::{self, ApiResult};
use crate::auth::{AdminUser, AuthUser, TokenIssuer};
use crate::error::{DatabaseError, Error};
use crate::store::GraphStore;

/// Shared state for company routes.
#[derive(Clone)]
pub struct CompanyRouteState {
    pub store: Arc<dyn GraphStore>,
    pub issuer: Arc<TokenIssuer>,
}

impl FromRef<CompanyRouteState> for Arc<TokenIssuer> {
    fn from_ref(state: &CompanyRouteState) -> Self {
        Arc::clone(&state.issuer)
    }
}

fn organization_not_found(name: Option<&str>) -> Error {
    DatabaseError::NotFound {
        entity: "Organization".into(),
        id: name.unwrap_or("(first)").to_string(),
    }
    .into()
}

/// GET /company/profile
async fn get_profile(State(state): State<CompanyRouteState>, _user: AuthUser) -> ApiResult {
    let profile = state
        .store
        .company_profile(None)
        .await?
        .ok_or_else(|| organization_not_found(None))?;
    api::ok(profile)
}

/// POST /company/profile
async fn save_profile(
    State(state): State<CompanyRouteState>,
    AdminUser(admin): AdminUser,
    Json(mut body): Json<CompanyProfileUpdate>,
) -> ApiResult {
    body.description = body.description.trim().to_string();
    if body.description.is_empty() {
        return Err(Error::Validation("description is required".into()));
    }
    body.values.retain(|v| !v.trim().is_empty());
    let profile = state
        .store
        .save_company_profile(&body, &admin.email)
        .await?
        .ok_or_else(|| organization_not_found(body.name.as_deref()))?;
    tracing::info!(by = %admin.email, organization = %profile.name, "Company profile saved");
    api::ok(profile)
}

/// GET /structure/organizational (also /pia/organizational-structure)
async fn get_structure(State(state): State<CompanyRouteState>, _user: AuthUser) -> ApiResult {
    api::ok(state.store.organizational_structure().await?)
}

/// GET /user/profile-data
async fn get_profile_data(
    State(state): State<CompanyRouteState>,
    AuthUser(principal): AuthUser,
) -> ApiResult {
    let data = state
        .store
        .profile_data(&principal.email)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "User".into(),
            id: principal.email.clone(),
        })?;
    api::ok(data)
}

/// Build the company and structure routes.
pub fn company_routes(state: CompanyRouteState) -> Router {
    Router::new()
        .route("/company/profile", get(get_profile).post(save_profile))
        .route("/structure/organizational", get(get_structure))
        .route("/pia/organizational-structure", get(get_structure))
        .route("/user/profile-data", get(get_profile_data))
        .with_state(state)
}
