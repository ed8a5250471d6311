use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use enleve_shared::constants::INVITE_FUNCTION;

use crate::config::FunctionConfig;
use crate::gateway::AuthGateway;
use crate::invite::invite_user;
use crate::mailer::Mailer;
use crate::rate_limit::{limit_by_ip, RateLimiter};

/// Invitation bodies are two short strings.
const MAX_BODY: usize = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn AuthGateway>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<FunctionConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ]);

    Router::new()
        .route("/health", get(health_check))
        .route(&format!("/functions/v1/{INVITE_FUNCTION}"), post(invite_user))
        .layer(DefaultBodyLimit::max(MAX_BODY))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            limit_by_ip,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting invitation function");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
