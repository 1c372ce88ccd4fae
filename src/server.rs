//! HTTP server: wires services to routers and serves them.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthRouteState, AuthService, PasswordHasher, TokenIssuer, auth_routes};
use crate::company::{CompanyRouteState, company_routes};
use crate::config::EksConfig;
use crate::error::{ConfigError, Error};
use crate::ingest::{IngestRouteState, IngestService, ingest_routes};
use crate::onboarding::{OnboardingManager, OnboardingRouteState, onboarding_routes};
use crate::orgchart::{OrgChartRouteState, PositionBackend, StorePositionBackend, orgchart_routes};
use crate::store::GraphStore;
use crate::users::{UserRouteState, UserService, user_routes};

/// Every service the routers need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GraphStore>,
    pub issuer: Arc<TokenIssuer>,
    pub auth: Arc<AuthService>,
    pub users: Arc<UserService>,
    pub onboarding: Arc<OnboardingManager>,
    pub ingest: Arc<IngestService>,
    pub positions: Arc<dyn PositionBackend>,
}

impl AppState {
    pub fn new(store: Arc<dyn GraphStore>, config: &EksConfig) -> Self {
        let issuer = Arc::new(TokenIssuer::from_config(&config.auth));
        let hasher = PasswordHasher::new(config.auth.bcrypt_cost);
        Self {
            auth: Arc::new(AuthService::new(
                Arc::clone(&store),
                Arc::clone(&issuer),
                hasher,
                config.bootstrap.clone(),
            )),
            users: Arc::new(UserService::new(Arc::clone(&store), hasher)),
            onboarding: Arc::new(OnboardingManager::new(Arc::clone(&store))),
            ingest: Arc::new(IngestService::new(Arc::clone(&store), hasher, &config.ingest)),
            positions: Arc::new(StorePositionBackend::new(Arc::clone(&store))),
            issuer,
            store,
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────────

/// GET /health
async fn health(backend: &'static str) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "eks",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": backend,
    }))
}

fn cors_layer(origin: &str) -> Result<CorsLayer, ConfigError> {
    let allow_origin = if origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        let origins = origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).map_err(|e| ConfigError::InvalidValue {
                    key: "CORS_ORIGIN".into(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// Merge every router behind CORS and request tracing.
pub fn build_router(state: AppState, cors_origin: &str) -> Result<Router, Error> {
    let issuer = Arc::clone(&state.issuer);
    let backend = state.store.backend_name();
    let app = Router::new()
        .route("/health", get(move || health(backend)))
        .merge(auth_routes(AuthRouteState {
            auth: state.auth,
            issuer: Arc::clone(&issuer),
        }))
        .merge(user_routes(UserRouteState {
            users: state.users,
            issuer: Arc::clone(&issuer),
        }))
        .merge(onboarding_routes(OnboardingRouteState {
            manager: state.onboarding,
            issuer: Arc::clone(&issuer),
        }))
        .merge(orgchart_routes(OrgChartRouteState {
            store: Arc::clone(&state.store),
            positions: state.positions,
            issuer: Arc::clone(&issuer),
        }))
        .merge(ingest_routes(IngestRouteState {
            ingest: state.ingest,
            issuer: Arc::clone(&issuer),
        }))
        .merge(company_routes(CompanyRouteState {
            store: state.store,
            issuer,
        }))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origin)?),
        );
    Ok(app)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &EksConfig, store: Arc<dyn GraphStore>) -> Result<(), Error> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = build_router(AppState::new(store, config), &config.server.cors_origin)?;
    let listener = TcpListener::bind(&addr).await.map_err(ConfigError::Io)?;
    tracing::info!(addr = %addr, "EKS server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .map_err(ConfigError::Io)?;
    Ok(())
}
