//! Generation relay: prompt in, streamed text fragments out.
//!
//! - [`generation`]: the relay itself
//! - [`client`]: OpenAI-compatible chat-completion client and the [`client::ChatBackend`] seam
//! - [`sse`]: incremental server-sent-events decoder
//! - [`types`]: request, message and wire types

pub mod client;
pub mod generation;
pub mod sse;
pub mod types;

use thiserror::Error;

pub use client::{ChatBackend, OpenAiClient};
pub use generation::{FragmentStream, GenerationRelay, RelaySettings};
pub use types::{GenerationRequest, Message, Role, SystemPrompt, MAX_TOKENS, MIN_MAX_TOKENS};

/// Everything that can end a `generate` call.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bad input, rejected before the backend is contacted.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The stream broke after it was opened. Fragments already yielded stand.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}
