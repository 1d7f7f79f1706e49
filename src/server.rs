use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    connectivity::{self, TestKind},
    errors::ValidationError,
    ping::{self, PingOptions},
    scanner::{self, SharedProgress},
    types::{ScanOutcome, ScanReport, ScanSummary, TestDetails},
    validate::{validate_target, PingRequest, ScanRequest, TestRequest},
};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    inner: Arc<RwLock<ServerState>>, // progress of the latest scan
}

#[derive(Debug, Default)]
struct ServerState {
    generation: u64,
    status: Status,
    progress: Option<SharedProgress>,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Done,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Status {
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub state: ScanState,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(ServerState::default())),
        }
    }
}

/// `{ "success": true, "data": ... }`
#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope { success: true, data })).into_response()
}

/// Input errors become `400 {"error": "..."}`, internal failures `500`.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError(StatusCode::BAD_REQUEST, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError(StatusCode::BAD_REQUEST, e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            error: String,
        }
        (self.0, Json(Body { error: self.1 })).into_response()
    }
}

/// Build the API router. Split from [`serve`] so it can be driven in-process.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scan", post(post_scan))
        .route("/scan/status", get(get_status))
        .route("/ping", post(post_ping).get(get_ping))
        .route("/tests", post(post_test))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Bind `config.server.bind` and serve until Ctrl+C.
pub async fn serve(config: Config) -> Result<()> {
    let bind = config.server.bind;
    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "serving API");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("API server failed")?;
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let (scanned, open) = if let Some(p) = s.progress.as_ref() {
        (
            p.scanned_done.load(Ordering::Relaxed),
            p.open_count.load(Ordering::Relaxed),
        )
    } else {
        (s.status.scanned, s.status.open)
    };
    let out = Status {
        total: s.status.total,
        scanned,
        open,
        state: s.status.state,
    };
    (StatusCode::OK, Json(out))
}

async fn post_scan(
    State(app): State<AppState>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let plan = req.validate(&app.config)?;
    info!(host = %plan.host, ports = plan.ports.len(), "scan requested");

    let progress = SharedProgress::new();
    let generation = {
        let mut s = app.inner.write().await;
        // Status follows the newest scan; older scans keep running for their own callers.
        s.generation += 1;
        s.status = Status {
            total: plan.ports.len() as u64,
            scanned: 0,
            open: 0,
            state: ScanState::Running,
        };
        s.progress = Some(progress.clone());
        s.generation
    };

    // Detached so the status is settled even if the client goes away mid-scan.
    let app2 = app.clone();
    let host = plan.host.clone();
    let (targets, options) = (plan.ports, plan.options);
    let task = tokio::spawn(async move {
        let start = Instant::now();
        let ports = scanner::scan_ports_with_progress(
            &host,
            &targets,
            options,
            CancellationToken::new(),
            progress.clone(),
        )
        .await;
        let summary = ScanSummary::from_results(&ports, start.elapsed().as_millis() as u64);

        let mut s = app2.inner.write().await;
        if s.generation == generation {
            s.status.scanned = progress.scanned_done.load(Ordering::Relaxed);
            s.status.open = progress.open_count.load(Ordering::Relaxed);
            s.status.state = ScanState::Done;
            s.progress = None;
        }
        ScanOutcome { ports, summary }
    });
    let ScanOutcome { ports, summary } = task.await.map_err(|e| {
        warn!(error = %e, "scan task failed");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Failed to execute port scan".into())
    })?;

    info!(
        host = %plan.host,
        open = summary.open_ports,
        duration_ms = summary.duration_ms,
        "scan finished"
    );
    Ok(ok(ScanReport {
        id: Uuid::new_v4().to_string(),
        ip: plan.host,
        timestamp: now_rfc3339(),
        outcome: ScanOutcome { ports, summary },
    }))
}

async fn post_ping(
    State(app): State<AppState>,
    body: Result<Json<PingRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let (host, opts) = req.validate(&app.config)?;
    Ok(ok(ping::ping_host(&host, opts).await))
}

#[derive(Debug, Deserialize)]
struct PingQuery {
    #[serde(default)]
    ip: String,
}

/// Single quick probe: one echo, default timeout.
async fn get_ping(
    State(app): State<AppState>,
    Query(q): Query<PingQuery>,
) -> Result<Response, ApiError> {
    let host = validate_target(&q.ip)?;
    let opts = PingOptions {
        count: 1,
        timeout: std::time::Duration::from_millis(app.config.ping.default_timeout_ms),
    };
    Ok(ok(ping::ping_host(&host, opts).await))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Success,
    Failure,
}

/// One executed test as returned by `POST /api/tests`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TestKind,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub timestamp: String,
    pub status: TestStatus,
    pub response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TestDetails>,
}

async fn post_test(
    State(app): State<AppState>,
    body: Result<Json<TestRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let spec = req.validate(&app.config)?;
    let port = match &spec {
        connectivity::TestSpec::Tcp { port, .. } => Some(*port),
        _ => None,
    };
    let timestamp = now_rfc3339();
    let result = connectivity::run_test(&spec).await;
    if let Some(e) = &result.error {
        warn!(kind = %spec.kind(), target = %req.target, error = %e, "test failed");
    }

    Ok(ok(TestRecord {
        id: Uuid::new_v4().to_string(),
        kind: spec.kind(),
        target: req.target.trim().to_string(),
        port,
        timestamp,
        status: if result.success {
            TestStatus::Success
        } else {
            TestStatus::Failure
        },
        response_time: result.response_time_ms,
        error: result.error,
        details: result.details,
    }))
}
