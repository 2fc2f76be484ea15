//! HTTP front end
//!
//! Routes are few and described by `GET /` for introspection:
//!
//! * `GET /` returns the routing table with an example payload
//! * `POST /v1/pdf` exports the JSON payload in the body
//! * `GET /metrics` renders Prometheus metrics, when enabled
//!
//! Every failure answers `500` with a JSON body.

use crate::config::ServerSettings;
use crate::exporter::DocumentExporter;
use crate::payload::{example_payload, payload_schema};
use crate::policy::UrlPolicy;
use crate::ExportError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct ServerState {
    pub exporter: Arc<dyn DocumentExporter>,
    pub policy: Arc<UrlPolicy>,
    pub timeout_in_seconds: f64,
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    pub fn new(exporter: Arc<dyn DocumentExporter>, policy: UrlPolicy, timeout_in_seconds: f64) -> Self {
        Self {
            exporter,
            policy: Arc::new(policy),
            timeout_in_seconds,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn build_router(state: ServerState) -> Router {
    let mut router = Router::new()
        .route("/", get(routing_info))
        .route("/v1/pdf", post(export_pdf));

    if state.metrics.is_some() {
        router = router.route("/metrics", get(render_metrics));
    }

    router.with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<S>(settings: &ServerSettings, state: ServerState, shutdown: S) -> Result<(), ExportError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Now serving on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}

/// The message itself when it already is JSON, otherwise `{"message": ...}`.
pub fn ensure_json(message: &str) -> String {
    if serde_json::from_str::<Value>(message).is_ok() {
        message.to_string()
    } else {
        json!({ "message": message }).to_string()
    }
}

fn routes() -> Value {
    json!({
        "/": {
            "GET": {
                "description": "Returns this routing information for introspection."
            }
        },
        "/v1/pdf": {
            "POST": {
                "description": "Open the given URL with Headless Chromium, export what is displayed as a PDF and download it.",
                "example": example_payload(),
                "schema": payload_schema()
            }
        }
    })
}

async fn routing_info() -> Json<Value> {
    Json(routes())
}

async fn export_pdf(State(state): State<ServerState>, body: Bytes) -> Response {
    match run_export(&state, &body).await {
        Ok(pdf) => (
            StatusCode::OK,
            [
                (header::CONTENT_DISPOSITION, "attachment"),
                (header::CONTENT_TYPE, "application/pdf"),
            ],
            pdf,
        )
            .into_response(),
        Err(e) => {
            error!(kind = e.kind(), "PDF export failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                ensure_json(&e.to_string()),
            )
                .into_response()
        }
    }
}

async fn run_export(state: &ServerState, body: &[u8]) -> Result<Vec<u8>, ExportError> {
    let payload: Value = serde_json::from_slice(body)?;
    info!(url = payload.get("url").and_then(serde_json::Value::as_str), "Starting PDF export");

    state.policy.authorize(&payload)?;
    state
        .exporter
        .export(&payload, state.timeout_in_seconds)
        .await
}

async fn render_metrics(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not enabled").into_response(),
    }
}
