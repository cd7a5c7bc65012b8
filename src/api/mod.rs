//! Control-plane HTTP API the updater container reports back to.
//!
//! The server binds a dynamic loopback port and exposes, per job:
//!
//! | Route                               | Method     | Token       |
//! |-------------------------------------|------------|-------------|
//! | `/api/update_jobs/{id}/details`     | GET        | job         |
//! | `/api/update_jobs/{id}/credentials` | GET        | credentials |
//! | `/api/update_jobs/{id}/{kind}`      | POST/PATCH | job         |
//!
//! Output requests carry a `{"data": <payload>}` envelope; the payload is
//! validated against the kind's schema and forwarded to the
//! [`OutputProcessor`]. Reads for a job that is not registered answer 204
//! so a late or replayed container never learns whether an id ever
//! existed.
//!
//! Authentication is a bearer token checked before the body is parsed.
//! On a plaintext listener the check is skipped entirely: a token sent in
//! clear text authenticates nothing, and the listener is only reachable
//! from the private container network.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::job::{JobFile, JobRegistry};
use crate::outputs::UpdateOutput;
use crate::outputs::processor::OutputProcessor;

/// Whether the listener transport protects tokens in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Plaintext transport: bearer checks are skipped.
    Plaintext,
    /// Bearer tokens are required and verified per job.
    Bearer,
}

#[derive(Clone)]
struct ApiState {
    registry: Arc<JobRegistry>,
    processor: Arc<OutputProcessor>,
    auth: AuthMode,
}

/// Envelope around every reported output.
#[derive(Debug, Deserialize)]
struct OutputRequest {
    data: serde_json::Value,
}

/// Control-plane server handle. Binds on `start`, serves until `stop`.
pub struct ApiServer {
    state: ApiState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    url: Option<String>,
}

impl ApiServer {
    pub fn new(
        registry: Arc<JobRegistry>,
        processor: Arc<OutputProcessor>,
        auth: AuthMode,
    ) -> Self {
        Self {
            state: ApiState {
                registry,
                processor,
                auth,
            },
            shutdown_tx: None,
            url: None,
        }
    }

    /// Bind a dynamic loopback port and start serving. Returns the base
    /// URL the updater container should report to.
    pub async fn start(&mut self) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind control-plane listener")?;
        let addr = listener
            .local_addr()
            .context("Failed to get control-plane address")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = build_router(self.state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!(error = %e, "Control-plane server error");
            }
        });

        let url = format!("http://{}", addr);
        self.url = Some(url.clone());
        Ok(url)
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.url = None;
        Ok(())
    }
}

fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/update_jobs/{id}/details", get(details_handler))
        .route(
            "/api/update_jobs/{id}/credentials",
            get(credentials_handler),
        )
        .route(
            "/api/update_jobs/{id}/{kind}",
            post(output_handler).patch(output_handler),
        )
        .with_state(state)
}

/// Bearer-token check. `Ok(())` means the request may proceed; the error
/// side carries the status to answer with.
async fn authorize(
    state: &ApiState,
    headers: &HeaderMap,
    job_id: &str,
    credentials_route: bool,
) -> Result<(), StatusCode> {
    if state.auth == AuthMode::Plaintext {
        return Ok(());
    }
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let valid = if credentials_route {
        state.registry.check_credentials_token(job_id, token).await
    } else {
        state.registry.check_job_token(job_id, token).await
    };
    if valid { Ok(()) } else { Err(StatusCode::FORBIDDEN) }
}

async fn details_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    authorize(&state, &headers, &id, false).await?;
    match state.registry.details(&id).await {
        Some(spec) => {
            let body = serde_json::to_value(JobFile { job: spec })
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok((StatusCode::OK, Json(body)))
        }
        None => Ok((StatusCode::NO_CONTENT, Json(serde_json::Value::Null))),
    }
}

async fn credentials_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    authorize(&state, &headers, &id, true).await?;
    match state.registry.credentials(&id).await {
        Some(credentials) => Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "credentials": credentials })),
        )),
        None => Ok((StatusCode::NO_CONTENT, Json(serde_json::Value::Null))),
    }
}

/// Single entry point for every reported output kind. The body is only
/// parsed after the bearer check passes.
async fn output_handler(
    State(state): State<ApiState>,
    Path((id, kind)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Err(status) = authorize(&state, &headers, &id, false).await {
        return status;
    }

    let request: OutputRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(job_id = %id, kind = %kind, error = %e, "Malformed output envelope");
            return StatusCode::BAD_REQUEST;
        }
    };
    let output = match UpdateOutput::parse(&kind, request.data) {
        Ok(output) => output,
        Err(e) => {
            warn!(job_id = %id, kind = %kind, error = %e, "Malformed output payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!(job_id = %id, kind = %kind, "Processing reported output");
    match state.processor.handle(&id, output).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            warn!(job_id = %id, kind = %kind, error = %e, "Output processing failed");
            StatusCode::BAD_REQUEST
        }
    }
}
