//! HTTP routes over the triage service

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use careroute_core::{HandlerId, TriageError, TriageRequest, TriageService, service};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::auth;

/// Shared state for all requests
#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<TriageService>,
    pub auth_token: String,
    pub start_time: Instant,
    pub shutdown: CancellationToken,
}

/// Error body returned to HTTP callers
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<TriageError> for ApiError {
    fn from(e: TriageError) -> Self {
        match e {
            TriageError::Validation(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, auth_token: String, service: Arc<TriageService>) -> Self {
        let state = GatewayState {
            service,
            auth_token,
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        };
        Self { state, bind }
    }

    /// Cancel in-flight dispatches when this token fires
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.state.shutdown = shutdown;
        self
    }

    /// Build the axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/triage", post(triage_handler))
            .route("/v1/route", post(route_handler))
            .route("/api/status", get(status_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown token is cancelled
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);
        if self.state.auth_token.is_empty() {
            warn!("Gateway auth token not set; /v1 endpoints are open");
        }

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway stopped");
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

// ── HTTP Handlers ──

async fn triage_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    payload: Result<Json<TriageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let Json(request) = payload?;

    let cancel = state.shutdown.child_token();
    let response = state.service.handle(request, &cancel).await?;
    Ok(Json(response))
}

async fn route_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    payload: Result<Json<TriageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let Json(request) = payload?;

    let request = service::validate(request)?;
    let decision = state.service.route(&request);
    debug!("Dry-run route → {}", decision.selected_handler_id);
    Ok(Json(decision))
}

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let endpoints = state.service.dispatcher().endpoints();
    let handlers: Vec<_> = HandlerId::ALL
        .iter()
        .map(|id| json!({ "id": id, "endpoint": endpoints.endpoint(*id) }))
        .collect();

    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "profile_version": state.service.router().profiles().version(),
        "handlers": handlers,
    }))
}

fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<(), ApiError> {
    auth::authorize_v1(&state.auth_token, headers).map_err(|reason| {
        debug!("Unauthorized /v1 request: {:?}", reason);
        ApiError::Unauthorized
    })
}
