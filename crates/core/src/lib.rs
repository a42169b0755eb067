//! # codeloop core
//!
//! Domain types, collaborator traits, and error definitions for the codeloop
//! code-execution assistant. This crate has no framework dependencies: it
//! defines the conversation model and the two seams every other crate plugs
//! into.
//!
//! - [`LlmClient`] streams model output as [`LlmChunk`]s.
//! - [`Computer`] runs a code block in a language runtime and streams
//!   [`OutputLine`]s back.
//!
//! Implementations live in `codeloop-providers` and `codeloop-computer`; the
//! orchestration loop lives in `codeloop-agent`.

pub mod computer;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use computer::{Computer, ExecutionFlags, OutputLine, Snapshot};
pub use error::{Error, ExecutionError, ProviderError, Result};
pub use message::{Content, Conversation, ConversationId, PendingCode, Role, Turn, TurnType};
pub use provider::{LlmChunk, LlmClient, Usage};
