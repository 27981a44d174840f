//! The generation relay.
//!
//! One call to [`GenerationRelay::generate`] walks
//! `idle → messages-built → request-sent → streaming` and ends in
//! completed, interrupted or failed. Nothing is shared between calls apart
//! from the backend handle, and nothing is retried.

use std::sync::Arc;

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

use crate::relay::client::ChatBackend;
use crate::relay::types::{ChatCompletionRequest, GenerationRequest};
use crate::relay::RelayError;

/// Lazy, single-use stream of generated text fragments.
///
/// Dropping it closes the backend connection.
pub type FragmentStream = BoxStream<'static, Result<String, RelayError>>;

/// Construction-time settings of the relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Model name sent with every request. The backend serves a single
    /// model, so this is a placeholder it ignores.
    pub model_name: String,

    /// System prompt used when a request does not choose one.
    pub default_system_prompt: Option<String>,
}

pub struct GenerationRelay {
    backend: Arc<dyn ChatBackend>,
    settings: RelaySettings,
}

impl GenerationRelay {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: RelaySettings) -> Self {
        Self { backend, settings }
    }

    /// Open a generation and return its fragment stream.
    ///
    /// Validation and connection failures are returned here, before any
    /// fragment exists. Failures after that surface as the stream's last item.
    pub async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, RelayError> {
        let max_tokens = request.validate()?;
        let messages = request.messages(self.settings.default_system_prompt.as_deref());

        debug!(
            messages = messages.len(),
            max_tokens,
            prompt_chars = request.prompt.len(),
            "Sending chat completion"
        );

        let chunks = self
            .backend
            .stream_chat(ChatCompletionRequest {
                model: self.settings.model_name.clone(),
                messages,
                stream: true,
                max_tokens,
            })
            .await?;

        // Units without choices carry no delta; everything else is forwarded,
        // empty text included.
        let fragments = chunks.filter_map(|item| {
            future::ready(match item {
                Ok(chunk) => chunk.into_delta_text().map(Ok),
                Err(e) => Some(Err(e)),
            })
        });

        Ok(fragments.boxed())
    }
}
