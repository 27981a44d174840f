//! HTTP API.
//!
//! - POST /generate
//! - GET /healthz
//! - GET /readyz
//! - GET /metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::Backend;
use crate::metrics::{RelayMetrics, RequestOutcome};
use crate::relay::{FragmentStream, GenerationRelay, GenerationRequest, RelayError, SystemPrompt, MAX_TOKENS};
use crate::server::streaming::fragments_to_body;

/// Prompt used when a request body omits one.
pub const DEFAULT_PROMPT: &str = "Explain superconductors in plain English";

/// Application state shared across handlers.
pub struct AppState {
    pub relay: GenerationRelay,
    pub backend: Arc<dyn Backend>,
    pub metrics: Arc<RelayMetrics>,
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let limit = state.max_concurrent_requests.max(1);
    Router::new()
        .route("/generate", post(generate))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(ConcurrencyLimitLayer::new(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Generate request body. Every field is optional.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Absent: configured default. `null` or `""`: no system message.
    #[serde(default)]
    pub system_prompt: SystemPrompt,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}
fn default_max_tokens() -> i64 {
    MAX_TOKENS as i64
}

impl From<GenerateBody> for GenerationRequest {
    fn from(body: GenerateBody) -> Self {
        GenerationRequest::new(body.prompt)
            .with_system_prompt(body.system_prompt)
            .with_max_tokens(body.max_tokens)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub backend: String,
    pub endpoint: String,
}

/// Relay failure that happened before any body was sent.
pub struct ApiError(RelayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            RelayError::BackendUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable"),
            RelayError::StreamInterrupted(_) => (StatusCode::BAD_GATEWAY, "stream_interrupted"),
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: kind.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn generate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let deadline = tokio::time::Instant::now() + state.request_timeout;
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("generate", request_id = %request_id);

    let fragments = open_generation(&state, body, deadline)
        .instrument(span.clone())
        .await?;

    let stream = fragments_to_body(fragments, deadline, state.metrics.clone(), span);

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::HeaderName::from_static("x-request-id"), request_id),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Validate the body and open the relay stream, all before `deadline`.
async fn open_generation(
    state: &AppState,
    body: Result<Json<GenerateBody>, JsonRejection>,
    deadline: tokio::time::Instant,
) -> Result<FragmentStream, ApiError> {
    let opened = match body {
        Ok(Json(body)) => {
            info!(
                max_tokens = body.max_tokens,
                prompt_chars = body.prompt.len(),
                "Generate request"
            );
            tokio::time::timeout_at(deadline, state.relay.generate(body.into()))
                .await
                .unwrap_or_else(|_| {
                    Err(RelayError::BackendUnavailable(format!(
                        "no response from backend within {:?}",
                        state.request_timeout
                    )))
                })
        }
        // Malformed JSON and out-of-range numbers are bad input like any other.
        Err(rejection) => Err(RelayError::Validation(rejection.body_text())),
    };

    match opened {
        Ok(fragments) => {
            state.metrics.record_request(RequestOutcome::Accepted);
            Ok(fragments)
        }
        Err(e) => {
            let outcome = match &e {
                RelayError::Validation(_) => RequestOutcome::Rejected,
                _ => RequestOutcome::Unavailable,
            };
            state.metrics.record_request(outcome);
            warn!(error = %e, "Generate request failed");
            Err(ApiError(e))
        }
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn readyz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.backend.is_ready().await;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready,
            backend: state.backend.name().to_string(),
            endpoint: state.backend.endpoint().to_string(),
        }),
    )
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
