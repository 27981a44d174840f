//! Stub OpenAI-compatible inference server for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::net::TcpListener;

use tgi_relay::relay::types::{ChatCompletionChunk, ChatCompletionRequest, ChunkChoice, ChunkDelta};

/// What the stub does with each chat completion call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then `[DONE]`.
    Complete(Vec<&'static str>),
    /// Stream these fragments, then drop the connection mid-body.
    Crash(Vec<&'static str>),
    /// Stream a fragment every few milliseconds until the client goes away.
    Endless,
    /// Refuse the request with this status.
    Reject(StatusCode),
    /// Accept the request and never answer it.
    Stall,
    /// Hold the response headers for a while, then behave like `Complete`.
    Delayed(Duration, Vec<&'static str>),
}

struct StubState {
    script: Script,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    sent: Arc<AtomicUsize>,
    stream_dropped: Arc<AtomicBool>,
}

pub struct StubBackend {
    pub addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubBackend {
    pub async fn spawn(script: Script) -> Self {
        let state = Arc::new(StubState {
            script,
            requests: Mutex::new(Vec::new()),
            sent: Arc::new(AtomicUsize::new(0)),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .route("/health", get(|| async { StatusCode::OK }))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Fragments written to the wire so far.
    pub fn sent(&self) -> usize {
        self.state.sent.load(Ordering::SeqCst)
    }

    /// Wait until the server side of an `Endless` stream has been torn down.
    pub async fn wait_for_disconnect(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.state.stream_dropped.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Address nothing listens on.
pub fn dead_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/v1")
}

pub fn sse_unit(content: &str) -> Bytes {
    let chunk = ChatCompletionChunk {
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: None,
                content: Some(content.to_string()),
            },
            finish_reason: None,
        }],
    };
    Bytes::from(format!("data: {}\n\n", serde_json::to_string(&chunk).unwrap()))
}

/// `fragments` as SSE units followed by the `[DONE]` terminator.
fn complete_units(fragments: &[&str]) -> Vec<Result<Bytes, io::Error>> {
    fragments
        .iter()
        .map(|f| Ok(sse_unit(f)))
        .chain(std::iter::once(Ok(Bytes::from_static(b"data: [DONE]\n\n"))))
        .collect()
}

/// Flags the stream as dropped when the server lets go of it.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn chat_completions(
    State(state): State<Arc<StubState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    state.requests.lock().unwrap().push(request);

    let body = match &state.script {
        Script::Reject(status) => return (*status, "model is loading").into_response(),
        Script::Stall => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return StatusCode::GATEWAY_TIMEOUT.into_response();
        }
        Script::Delayed(delay, fragments) => {
            tokio::time::sleep(*delay).await;
            state.sent.fetch_add(fragments.len(), Ordering::SeqCst);
            Body::from_stream(stream::iter(complete_units(fragments)))
        }
        Script::Complete(fragments) => {
            state.sent.fetch_add(fragments.len(), Ordering::SeqCst);
            Body::from_stream(stream::iter(complete_units(fragments)))
        }
        Script::Crash(fragments) => {
            let units: Vec<Result<Bytes, io::Error>> = fragments.iter().map(|f| Ok(sse_unit(f))).collect();
            state.sent.fetch_add(fragments.len(), Ordering::SeqCst);
            // Pause before failing so the delivered units are flushed first.
            let crash = stream::once(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(io::Error::other("backend crashed"))
            });
            Body::from_stream(stream::iter(units).chain(crash))
        }
        Script::Endless => {
            let flag = DropFlag(state.stream_dropped.clone());
            let sent = state.sent.clone();
            let ticks = stream::unfold((flag, sent), |(flag, sent)| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let n = sent.fetch_add(1, Ordering::SeqCst);
                Some((Ok::<_, io::Error>(sse_unit(&format!("tick{n} "))), (flag, sent)))
            });
            Body::from_stream(ticks.boxed())
        }
    };

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
