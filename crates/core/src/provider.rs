//! LLM client trait: the abstraction over chat model backends.
//!
//! A client takes the rendered conversation (system turn first) and streams
//! back chunks: prose, code, and a final usage report. The orchestration loop
//! never knows which backend is answering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Turn;

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmChunk {
    /// Partial prose
    Message { content: String },

    /// Partial code for a block in `format`
    Code { format: String, content: String },

    /// Token accounting, typically the last chunk
    Usage { usage: Usage },
}

impl LlmChunk {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
        }
    }

    pub fn code(format: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Code {
            format: format.into(),
            content: content.into(),
        }
    }

    /// The assistant turn this chunk contributes to, if any.
    pub fn into_turn(self) -> Option<Turn> {
        match self {
            Self::Message { content } => Some(Turn::assistant(content)),
            Self::Code { format, content } => Some(Turn::code(format, content)),
            Self::Usage { .. } => None,
        }
    }
}

/// Stream of chunks returned by [`LlmClient::run`].
pub type ChunkStream = mpsc::Receiver<std::result::Result<LlmChunk, ProviderError>>;

/// The core LLM client trait.
///
/// Implementations translate the turn list into their wire format and push
/// parsed chunks into the returned channel as they arrive.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable backend name (e.g., "openai").
    fn name(&self) -> &str;

    /// The model currently in use.
    fn model(&self) -> &str;

    /// Switch to a different model for subsequent calls.
    fn set_model(&mut self, model: &str);

    /// Whether the model accepts images (drives the computer's image output).
    fn supports_vision(&self) -> bool {
        false
    }

    /// Start a streaming completion over `turns`.
    async fn run(&self, turns: &[Turn]) -> std::result::Result<ChunkStream, ProviderError>;
}
