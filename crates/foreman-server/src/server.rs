//! `ChannelServer` — axum HTTP server for heartbeats and control commands.
//!
//! The channel is deliberately dumb: sessions POST partial state, the
//! dashboard GETs merged snapshots, and operators queue commands that
//! sessions poll for at turn boundaries. Nothing here blocks a session;
//! a dead channel only costs visibility.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use foreman_core::constants::{
    METRIC_COMMANDS_QUEUED_TOTAL, METRIC_HEARTBEATS_TOTAL, METRIC_SESSIONS_ONLINE,
};
use foreman_core::settings::ChannelSettings;

use crate::health::{self, HealthResponse};
use crate::state::{ChannelRegistry, ControlCommand, HeartbeatUpdate, SessionSnapshot};

/// Interval between stale sweeps and checkpoint flushes.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Channel server failure.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry.
    pub registry: Arc<ChannelRegistry>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}

/// The heartbeat/command channel server.
pub struct ChannelServer {
    settings: ChannelSettings,
    registry: Arc<ChannelRegistry>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl ChannelServer {
    /// Create a server, reloading any checkpoint named by the settings.
    pub fn new(settings: ChannelSettings, metrics: PrometheusHandle) -> Self {
        let registry = ChannelRegistry::load_or_default(
            Path::new(&settings.checkpoint_file),
            settings.staleness_secs,
        );
        Self {
            settings,
            registry: Arc::new(registry),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/api/agents/{id}/heartbeat", post(heartbeat_handler))
            .route("/api/agents/{id}/commands", get(commands_handler))
            .route("/api/dashboard", get(dashboard_handler))
            .route("/api/control", post(control_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Bind and serve until `cancel` fires, flushing the checkpoint on
    /// the way out.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(%addr, "channel server listening");

        let flusher = tokio::spawn(flush_loop(self.registry.clone(), cancel.clone()));
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .await?;

        let _ = flusher.await;
        self.registry.flush();
        Ok(())
    }
}

/// Periodic maintenance: sweep silent sessions, publish the online
/// gauge, flush the checkpoint when dirty.
async fn flush_loop(registry: Arc<ChannelRegistry>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(FLUSH_INTERVAL) => {}
            () = cancel.cancelled() => break,
        }
        let now = Utc::now();
        registry.sweep_stale(now);
        gauge!(METRIC_SESSIONS_ONLINE).set(registry.online_count(now) as f64);
        registry.flush();
    }
}

/// POST /api/control request body.
///
/// The command arrives as a raw string so unknown names get a clean 400
/// instead of a deserialization error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlRequest {
    session_id: String,
    command: String,
}

/// GET /api/agents/{id}/commands response body.
#[derive(Debug, Serialize)]
struct CommandsResponse {
    commands: Vec<ControlCommand>,
}

/// POST /api/agents/{id}/heartbeat
async fn heartbeat_handler(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(update): Json<HeartbeatUpdate>,
) -> Json<Value> {
    state.registry.apply_heartbeat(&id, &update, Utc::now());
    counter!(METRIC_HEARTBEATS_TOTAL).increment(1);
    Json(json!({ "status": "ok" }))
}

/// GET /api/agents/{id}/commands
async fn commands_handler(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Json<CommandsResponse> {
    let commands = state.registry.drain_commands(&id);
    Json(CommandsResponse { commands })
}

/// GET /api/dashboard
async fn dashboard_handler(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.registry.dashboard(Utc::now()))
}

/// POST /api/control
async fn control_handler(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let command = ControlCommand::from_str(&req.command)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    state.registry.queue_command(&req.session_id, command);
    counter!(METRIC_COMMANDS_QUEUED_TOTAL, "command" => command.as_str()).increment(1);
    info!(session_id = %req.session_id, %command, "control command queued");
    Ok(Json(json!({ "status": "queued" })))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.registry.session_count();
    let online = state.registry.online_count(Utc::now());
    Json(health::health_check(state.start_time, sessions, online))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server(dir: &std::path::Path) -> ChannelServer {
        let settings = ChannelSettings {
            checkpoint_file: dir.join("channel_state.json").display().to_string(),
            ..ChannelSettings::default()
        };
        let handle = PrometheusBuilder::new().build_recorder().handle();
        ChannelServer::new(settings, handle)
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn heartbeat_then_dashboard_shows_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let app = server.router();

        let resp = app
            .clone()
            .oneshot(json_post(
                "/api/agents/alpha/heartbeat",
                r#"{"iteration": 3, "role": "coding"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");

        let resp = app
            .oneshot(Request::builder().uri("/api/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(resp).await;
        assert_eq!(rows[0]["id"], "alpha");
        assert_eq!(rows[0]["iteration"], 3);
        assert_eq!(rows[0]["role"], "coding");
        assert_eq!(rows[0]["online"], true);
    }

    #[tokio::test]
    async fn control_queues_and_commands_drain() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let app = server.router();

        let resp = app
            .clone()
            .oneshot(json_post(
                "/api/control",
                r#"{"sessionId": "alpha", "command": "pause"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "queued");

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/agents/alpha/commands")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["commands"], json!(["pause"]));

        // Drained: a second poll comes back empty.
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/agents/alpha/commands")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["commands"], json!([]));
    }

    #[tokio::test]
    async fn unknown_command_is_a_400() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let app = server.router();

        let resp = app
            .oneshot(json_post(
                "/api/control",
                r#"{"sessionId": "alpha", "command": "reboot"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_session_counts() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let app = server.router();

        let resp = app
            .clone()
            .oneshot(json_post("/api/agents/alpha/heartbeat", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 1);
        assert_eq!(parsed["online_sessions"], 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let app = server.router();

        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let app = server.router();

        let resp = app
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn registry_survives_a_server_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let server = make_server(dir.path());
            let app = server.router();
            let resp = app
                .oneshot(json_post(
                    "/api/agents/alpha/heartbeat",
                    r#"{"iteration": 4}"#,
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            server.registry().flush();
        }
        let server = make_server(dir.path());
        assert_eq!(server.registry().session_count(), 1);
    }
}
