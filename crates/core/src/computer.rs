//! Computer trait: the abstraction over the code-execution sandbox.
//!
//! The computer owns the language runtimes, the execution flags, and a
//! serializable state snapshot that can be mirrored into a scripting runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ExecutionError;
use crate::message::Turn;

/// The language that can host the computer API and state mirroring.
pub const SCRIPTING_LANGUAGE: &str = "python";

/// Snapshot keys that never leave the process.
pub const VOLATILE_KEYS: [&str; 2] = ["_hashes", "system_message"];

/// Serializable computer state.
pub type Snapshot = serde_json::Map<String, serde_json::Value>;

/// Remove the volatile keys from a snapshot in place.
pub fn strip_volatile(snapshot: &mut Snapshot) {
    for key in VOLATILE_KEYS {
        snapshot.remove(key);
    }
}

/// Flags propagated to the computer before every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFlags {
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub debug: bool,

    /// Whether image output may be emitted (model supports vision)
    #[serde(default)]
    pub emit_images: bool,

    /// Maximum characters of output kept per line
    #[serde(default = "default_max_output")]
    pub max_output: usize,
}

fn default_max_output() -> usize {
    2800
}

impl Default for ExecutionFlags {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            emit_images: false,
            max_output: default_max_output(),
        }
    }
}

/// One record streamed out of a running code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum OutputLine {
    /// A line of stdout/stderr
    Output { content: String },

    /// The line now executing; `None` once nothing is running
    ActiveLine { line: Option<u32> },
}

impl OutputLine {
    pub fn output(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
        }
    }

    /// The computer-role console turn for this record.
    pub fn into_turn(self) -> Turn {
        match self {
            Self::Output { content } => Turn::console_output(content),
            Self::ActiveLine { line } => Turn::active_line(line),
        }
    }
}

/// Stream of output records returned by [`Computer::run`].
pub type OutputStream = mpsc::Receiver<std::result::Result<OutputLine, ExecutionError>>;

/// The core Computer trait.
#[async_trait]
pub trait Computer: Send + Sync {
    /// Whether a runtime is registered for `language` (name or alias).
    fn supports(&self, language: &str) -> bool;

    /// Per-language instructions to append to the system message.
    fn language_notes(&self) -> Vec<String>;

    /// Description of the computer API exposed to executed code.
    fn api_description(&self) -> &str;

    /// Whether executed scripting code receives an injected `computer` object.
    fn import_computer_api(&self) -> bool;

    fn flags(&self) -> &ExecutionFlags;

    fn flags_mut(&mut self) -> &mut ExecutionFlags;

    /// Run `code` in `language`, streaming output as it is produced.
    async fn run(
        &self,
        language: &str,
        code: &str,
    ) -> std::result::Result<OutputStream, ExecutionError>;

    /// Capture the current state.
    fn to_dict(&self) -> Snapshot;

    /// Replace the current state.
    fn load_dict(&mut self, snapshot: Snapshot);

    /// Run `code` and collect every record.
    async fn run_to_end(
        &self,
        language: &str,
        code: &str,
    ) -> std::result::Result<Vec<OutputLine>, ExecutionError> {
        let mut rx = self.run(language, code).await?;
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line?);
        }
        Ok(lines)
    }
}
