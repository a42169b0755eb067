//! Turn and Conversation domain types.
//!
//! A conversation is an ordered list of turns. The model writes `message` and
//! `code` turns, the computer answers with `console` turns, and `confirmation`
//! turns gate execution. Streamed chunks are absorbed into the turn that is
//! currently open so the store always holds whole turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Console format for regular execution output.
pub const FORMAT_OUTPUT: &str = "output";
/// Console format marking the line currently executing.
pub const FORMAT_ACTIVE_LINE: &str = "active_line";
/// Format carried by confirmation turns.
pub const FORMAT_EXECUTION: &str = "execution";

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (and loop nudges sent on their behalf)
    User,
    /// The language model
    Assistant,
    /// The execution sandbox
    Computer,
    /// System instructions
    System,
}

/// What kind of record a turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnType {
    Message,
    Code,
    Console,
    Confirmation,
}

/// A code block waiting for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCode {
    /// Always `code`
    #[serde(rename = "type")]
    pub kind: TurnType,
    /// The language the block will run in
    pub format: String,
    /// The code itself
    pub content: String,
}

impl PendingCode {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            kind: TurnType::Code,
            format: language.into(),
            content: code.into(),
        }
    }
}

/// Turn payload: plain text, a structured pending block, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Pending(PendingCode),
    Empty,
}

/// A single record in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    #[serde(rename = "type")]
    pub kind: TurnType,

    pub content: Content,

    /// Language for code turns, output kind for console turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Turn {
    fn new(role: Role, kind: TurnType, content: Content, format: Option<String>) -> Self {
        Self {
            role,
            kind,
            content,
            format,
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, TurnType::Message, Content::Text(content.into()), None)
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, TurnType::Message, Content::Text(content.into()), None)
    }

    /// An assistant prose message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            TurnType::Message,
            Content::Text(content.into()),
            None,
        )
    }

    /// An assistant code block in the given language.
    pub fn code(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            TurnType::Code,
            Content::Text(code.into()),
            Some(language.into()),
        )
    }

    /// Console output produced by the computer.
    pub fn console_output(content: impl Into<String>) -> Self {
        Self::new(
            Role::Computer,
            TurnType::Console,
            Content::Text(content.into()),
            Some(FORMAT_OUTPUT.into()),
        )
    }

    /// Active-line marker. `None` means no code is executing.
    pub fn active_line(line: Option<u32>) -> Self {
        let content = match line {
            Some(n) => Content::Text(n.to_string()),
            None => Content::Empty,
        };
        Self::new(
            Role::Computer,
            TurnType::Console,
            content,
            Some(FORMAT_ACTIVE_LINE.into()),
        )
    }

    /// Approval gate for a pending code block.
    pub fn confirmation(pending: PendingCode) -> Self {
        Self::new(
            Role::Computer,
            TurnType::Confirmation,
            Content::Pending(pending),
            Some(FORMAT_EXECUTION.into()),
        )
    }

    /// Text content, or `""` for structured and empty turns.
    pub fn text(&self) -> &str {
        match &self.content {
            Content::Text(s) => s,
            _ => "",
        }
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn is_code(&self) -> bool {
        self.kind == TurnType::Code
    }

    /// Whether this turn is a presentation-only signal that is never stored.
    pub fn is_transient(&self) -> bool {
        self.kind == TurnType::Confirmation
            || (self.kind == TurnType::Console && self.format() == Some(FORMAT_ACTIVE_LINE))
    }

    /// Whether `chunk` continues this turn when streamed.
    fn continues_with(&self, chunk: &Turn) -> bool {
        self.role == chunk.role
            && self.kind == chunk.kind
            && self.format == chunk.format
            && matches!(self.content, Content::Text(_))
            && matches!(chunk.content, Content::Text(_))
    }
}

/// A conversation: the ordered turn store of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered turns
    pub turns: Vec<Turn>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was added
    pub updated_at: DateTime<Utc>,

    /// Index of the turn still receiving streamed chunks
    #[serde(skip)]
    open: Option<usize>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
            open: None,
        }
    }

    /// Append a complete turn. Closes any turn still being streamed.
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
        self.open = None;
    }

    /// Stop appending streamed chunks to the current turn.
    pub fn seal(&mut self) {
        self.open = None;
    }

    /// Absorb a streamed chunk.
    ///
    /// The chunk is appended to the open turn when it continues it (same
    /// role, type and format), otherwise it starts a new open turn.
    /// Transient signals (confirmations, active-line markers) are not stored.
    /// Returns whether anything was stored.
    pub fn absorb(&mut self, chunk: &Turn) -> bool {
        if chunk.is_transient() {
            return false;
        }
        self.updated_at = Utc::now();

        let last = self.turns.len().checked_sub(1);
        if let (Some(open), Some(last)) = (self.open, last) {
            if open == last && self.turns[last].continues_with(chunk) {
                if let Content::Text(existing) = &mut self.turns[last].content {
                    existing.push_str(chunk.text());
                }
                return true;
            }
        }

        self.turns.push(chunk.clone());
        self.open = Some(self.turns.len() - 1);
        true
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    /// The most recent code turn, wherever it sits in the history.
    pub fn last_code(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.is_code())
    }

    pub fn last_code_mut(&mut self) -> Option<&mut Turn> {
        self.turns.iter_mut().rev().find(|t| t.is_code())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replace the whole history (used by history rewrites such as merging).
    pub fn replace(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
        self.open = None;
        self.updated_at = Utc::now();
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.text().len() / 4).sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
