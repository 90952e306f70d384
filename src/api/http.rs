//! HTTP API Server
//!
//! REST API exposing the cluster and member states and lock records of the
//! running member.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::coordinator::{ClusterStore, LockTarget};
use crate::error::{Error, Result};
use crate::lock::LockInfo;
use crate::state::{ClusterState, Lifecycle, MemberState, Transition};

/// Shared application state
pub struct AppState {
    /// Coordination state of the cluster this member belongs to
    pub cluster: Arc<ClusterStore>,
    /// Process start, for uptime
    pub started: std::time::Instant,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, cluster: Arc<ClusterStore>) -> Self {
        let state = Arc::new(AppState {
            cluster,
            started: std::time::Instant::now(),
        });

        Self { config, state }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Self::create_router(self.state())
    }

    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/api/v1/status/ping", get(handle_ping))
            .route("/api/v1/manage/clusterstate", get(handle_get_cluster_state))
            .route("/api/v1/manage/clusterstate/:state", put(handle_set_cluster_state))
            .route("/api/v1/manage/memberstate", get(handle_get_member_state))
            .route("/api/v1/manage/memberstate/:state", put(handle_set_member_state))
            .route("/api/v1/manage/memberdata", get(handle_member_data))
            .route("/api/v1/manage/clusterdata", get(handle_cluster_data))
            .route("/api/v1/manage/lock", get(handle_lock))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Ping response
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
    pub member: String,
    pub cluster: String,
    pub uptime_seconds: u64,
}

/// Current state of the cluster or a member
#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse<S> {
    pub state: S,
}

/// Outcome of a state change
#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionResponse<S> {
    pub state: S,
    pub previous: S,
    pub applied: bool,
}

impl<S: Copy> From<Transition<S>> for TransitionResponse<S> {
    fn from(t: Transition<S>) -> Self {
        match t {
            Transition::Unchanged(state) => Self {
                state,
                previous: state,
                applied: false,
            },
            Transition::Applied { from, to } => Self {
                state: to,
                previous: from,
                applied: true,
            },
        }
    }
}

/// Member selection; defaults to this member
#[derive(Debug, Default, Deserialize)]
pub struct MemberQuery {
    pub member: Option<String>,
}

/// Lock selection
#[derive(Debug, Default, Deserialize)]
pub struct LockQuery {
    /// cluster, member or coordination; defaults to cluster
    pub target: Option<String>,
    pub member: Option<String>,
}

/// Lock record of one object
#[derive(Debug, Serialize)]
pub struct LockResponse {
    pub target: LockTarget,
    #[serde(flatten)]
    pub info: LockInfo,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Error Mapping ============

/// HTTP status and machine-readable code for an error
fn classify(e: &Error) -> (StatusCode, &'static str) {
    match e {
        Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::AlreadyLocked { .. } => (StatusCode::CONFLICT, "ALREADY_LOCKED"),
        Error::LockContention { .. } | Error::LockLost { .. } | Error::UnlockFailed { .. } => {
            (StatusCode::CONFLICT, "LOCK_CONTENTION")
        }
        Error::NotHolding { .. } => (StatusCode::CONFLICT, "NOT_HOLDING"),
        Error::PreconditionFailed { .. } | Error::AlreadyExists { .. } => (StatusCode::CONFLICT, "CONFLICT"),
        Error::InvalidTransition { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_TRANSITION"),
        Error::InvalidTimestamp { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_TIMESTAMP"),
        Error::Transport(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    }
}

fn error_response(e: Error) -> Response {
    let (status, code) = classify(&e);
    if status.is_server_error() {
        tracing::warn!("API request failed: {}", e);
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(code: &str, message: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        }),
    )
        .into_response()
}

/// Parse a requested target state; UNKNOWN is never a valid target
fn requested<S: Lifecycle>(raw: &str) -> std::result::Result<S, Response> {
    let state = S::parse(raw);
    if state == S::UNKNOWN {
        return Err(bad_request("INVALID_STATE", format!("{:?} is not a known state", raw)));
    }
    Ok(state)
}

fn member_name(state: &AppState, query: MemberQuery) -> String {
    query
        .member
        .unwrap_or_else(|| state.cluster.identity().name().to_string())
}

// ============ Handlers ============

async fn handle_ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(PingResponse {
        status: "ok".to_string(),
        member: state.cluster.identity().to_string(),
        cluster: state.cluster.cluster_name().to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}

async fn handle_get_cluster_state(State(state): State<Arc<AppState>>) -> Response {
    match state.cluster.cluster_state().await {
        Ok(current) => Json(StateResponse { state: current }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_set_cluster_state(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Response {
    let next: ClusterState = match requested(&raw) {
        Ok(next) => next,
        Err(response) => return response,
    };

    match state.cluster.set_cluster_state(next).await {
        Ok(t) => Json(TransitionResponse::from(t)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_get_member_state(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MemberQuery>,
) -> Response {
    let name = member_name(&state, query);
    match state.cluster.member_state(&name).await {
        Ok(current) => Json(StateResponse { state: current }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_set_member_state(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Query(query): Query<MemberQuery>,
) -> Response {
    let next: MemberState = match requested(&raw) {
        Ok(next) => next,
        Err(response) => return response,
    };

    let name = member_name(&state, query);
    match state.cluster.set_member_state(&name, next).await {
        Ok(t) => Json(TransitionResponse::from(t)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_member_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MemberQuery>,
) -> Response {
    let name = member_name(&state, query);
    match state.cluster.member_annotations(&name).await {
        Ok(data) => Json::<BTreeMap<String, String>>(data).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_cluster_data(State(state): State<Arc<AppState>>) -> Response {
    match state.cluster.cluster_config().await {
        Ok(data) => Json::<BTreeMap<String, String>>(data).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_lock(State(state): State<Arc<AppState>>, Query(query): Query<LockQuery>) -> Response {
    let target = match query.target.as_deref().unwrap_or("cluster") {
        "cluster" => LockTarget::Cluster,
        "coordination" => LockTarget::Coordination,
        "member" => LockTarget::Member(query.member),
        other => return bad_request("INVALID_TARGET", format!("unknown lock target {:?}", other)),
    };

    match state.cluster.lock_info(&target).await {
        Ok(info) => Json(LockResponse { target, info }).into_response(),
        Err(e) => error_response(e),
    }
}
