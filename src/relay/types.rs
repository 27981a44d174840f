//! Request, message and wire types for the generation relay.

use serde::{Deserialize, Deserializer, Serialize};

use crate::relay::RelayError;

/// Smallest accepted token budget.
pub const MIN_MAX_TOKENS: u32 = 128;

/// Largest accepted token budget, also the default.
pub const MAX_TOKENS: u32 = 1024;

/// Chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Which system prompt a request runs with.
///
/// `Default` defers to the relay's configured prompt. `Disabled` sends no
/// system message at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SystemPrompt {
    #[default]
    Default,
    Custom(String),
    Disabled,
}

impl SystemPrompt {
    /// Resolve against the configured default. Empty text counts as absent.
    pub fn resolve<'a>(&'a self, default: Option<&'a str>) -> Option<&'a str> {
        let prompt = match self {
            Self::Default => default,
            Self::Custom(text) => Some(text.as_str()),
            Self::Disabled => None,
        };
        prompt.filter(|p| !p.is_empty())
    }
}

impl From<Option<String>> for SystemPrompt {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(text) => Self::Custom(text),
            None => Self::Disabled,
        }
    }
}

// A missing field maps to `Default` through `#[serde(default)]` on the
// containing struct; an explicit `null` lands here and means `Disabled`.
impl<'de> Deserialize<'de> for SystemPrompt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(Self::from)
    }
}

/// A single call to `generate`.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: SystemPrompt,
    /// Signed so out-of-range input from any caller reaches validation.
    pub max_tokens: i64,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: SystemPrompt::Default,
            max_tokens: MAX_TOKENS as i64,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: SystemPrompt) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Check the token budget and return it in wire form.
    pub fn validate(&self) -> Result<u32, RelayError> {
        u32::try_from(self.max_tokens)
            .ok()
            .filter(|n| (MIN_MAX_TOKENS..=MAX_TOKENS).contains(n))
            .ok_or_else(|| {
                RelayError::Validation(format!(
                    "max_tokens must be between {MIN_MAX_TOKENS} and {MAX_TOKENS}, got {}",
                    self.max_tokens
                ))
            })
    }

    /// Conversation sent to the backend: optional system message, then the user prompt.
    pub fn messages(&self, default_system_prompt: Option<&str>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system_prompt.resolve(default_system_prompt) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

// ─── OpenAI wire format ────────────────────────────────────────────────────

/// Streaming chat completion request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub max_tokens: u32,
}

/// One `data:` unit of a streaming chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Text of the first choice's delta. A null or missing content is `""`;
    /// `None` only when the unit has no choices at all.
    pub fn into_delta_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.delta.content.unwrap_or_default())
    }

    pub fn is_finished(&self) -> bool {
        self.choices.iter().any(|c| c.finish_reason.is_some())
    }
}
