//! OpenAI-compatible streaming chat-completion client.
//!
//! [`ChatBackend`] is the seam the relay talks through; [`OpenAiClient`] is
//! the HTTP implementation used against the local inference server.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::debug;

use crate::relay::sse::{SseDecoder, DONE_SENTINEL};
use crate::relay::types::{ChatCompletionChunk, ChatCompletionRequest};
use crate::relay::RelayError;

/// Decoded response units of one streaming call, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<ChatCompletionChunk, RelayError>>;

/// Something that can run a streaming chat completion.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open the stream. Fails with [`RelayError::BackendUnavailable`] if the
    /// backend cannot be reached or refuses the request.
    async fn stream_chat(&self, request: ChatCompletionRequest) -> Result<ChunkStream, RelayError>;
}

/// HTTP client for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client with a bounded connect timeout. There is no overall
    /// timeout: generations can legitimately stream for minutes.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self::with_client(http, base_url, api_key))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn stream_chat(&self, request: ChatCompletionRequest) -> Result<ChunkStream, RelayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::BackendUnavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::BackendUnavailable(format!(
                "{url} returned {status}: {body}"
            )));
        }

        debug!(url, %status, "Chat completion stream opened");
        Ok(decode_chunks(response.bytes_stream()).boxed())
    }
}

struct ChunkDecoder<S> {
    body: Pin<Box<S>>,
    sse: SseDecoder,
    pending: VecDeque<String>,
    saw_finish_reason: bool,
    eof: bool,
    done: bool,
}

impl<S> ChunkDecoder<S> {
    fn interrupt(&mut self, reason: String) -> RelayError {
        self.done = true;
        RelayError::StreamInterrupted(reason)
    }
}

/// Turn a raw SSE body into chat-completion chunks.
///
/// The stream completes cleanly on `data: [DONE]`, or on end of body after a
/// unit that carried a `finish_reason`. Anything else that ends the body
/// yields a single [`RelayError::StreamInterrupted`] and nothing after it.
/// Dropping the returned stream drops the body, which closes the connection.
pub fn decode_chunks<S, E>(body: S) -> impl Stream<Item = Result<ChatCompletionChunk, RelayError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let state = ChunkDecoder {
        body: Box::pin(body),
        sse: SseDecoder::new(),
        pending: VecDeque::new(),
        saw_finish_reason: false,
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if let Some(data) = st.pending.pop_front() {
                if data == DONE_SENTINEL {
                    st.done = true;
                    return None;
                }
                return match serde_json::from_str::<ChatCompletionChunk>(&data) {
                    Ok(chunk) => {
                        st.saw_finish_reason |= chunk.is_finished();
                        Some((Ok(chunk), st))
                    }
                    Err(e) => {
                        let err = st.interrupt(format!("malformed stream unit: {e}"));
                        Some((Err(err), st))
                    }
                };
            }

            if st.eof {
                st.done = true;
                if st.saw_finish_reason {
                    return None;
                }
                let err = st.interrupt("backend closed the stream before completion".to_string());
                return Some((Err(err), st));
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.sse.push(&bytes);
                    loop {
                        match st.sse.next_event() {
                            Ok(Some(data)) => st.pending.push_back(data),
                            Ok(None) => break,
                            Err(e) => {
                                let err = st.interrupt(format!("invalid UTF-8 in stream: {e}"));
                                return Some((Err(err), st));
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    let err = st.interrupt(e.to_string());
                    return Some((Err(err), st));
                }
                None => {
                    st.eof = true;
                    match st.sse.finish() {
                        Ok(rest) => st.pending.extend(rest),
                        Err(e) => {
                            let err = st.interrupt(format!("invalid UTF-8 in stream: {e}"));
                            return Some((Err(err), st));
                        }
                    }
                }
            }
        }
    })
}
