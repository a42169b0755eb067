//! Code-block normalizer.
//!
//! Models often wrap or decorate code in ways the computer cannot run: a
//! stray backtick line, a hallucinated `functions.execute(...)` call, a JSON
//! object holding the language and code. Each repair below is a pure
//! function that recognizes one such shape and returns the fixed block, or
//! `None` to leave it alone. Repairs run in order, each on the output of the
//! previous one.

use serde_json::{Map, Value};
use tracing::debug;

/// Formats that are notes, not code. Such blocks become assistant messages.
pub const PROSE_FORMATS: [&str; 3] = ["text", "markdown", "plaintext"];

/// The language and code of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub format: String,
    pub content: String,
}

impl CodeBlock {
    /// A block with its format lowercased and trimmed.
    pub fn new(format: &str, content: impl Into<String>) -> Self {
        Self {
            format: format.trim().to_lowercase(),
            content: content.into(),
        }
    }

    fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            format: self.format.clone(),
            content: content.into(),
        }
    }

    /// Whether this block is prose dressed as code.
    pub fn is_prose(&self) -> bool {
        PROSE_FORMATS.contains(&self.format.as_str())
    }
}

type Repair = fn(&CodeBlock) -> Option<CodeBlock>;

const REPAIRS: [(&str, Repair); 5] = [
    ("stray backtick line", strip_backtick_line),
    ("functions.execute call", unwrap_execute_call),
    ("executeexecute sentinel", strip_execute_sentinel),
    ("JSON language/code pair", unwrap_json_pair),
    ("unquoted language/code pair", unwrap_unquoted_pair),
];

/// Apply every repair in order.
pub fn normalize(block: CodeBlock) -> CodeBlock {
    REPAIRS.iter().fold(block, |block, (name, repair)| match repair(&block) {
        Some(fixed) => {
            debug!(repair = name, "Repaired code block");
            fixed
        }
        None => block,
    })
}

/// A leading "`\n", left over from a fence the model half-closed.
pub fn strip_backtick_line(block: &CodeBlock) -> Option<CodeBlock> {
    block
        .content
        .strip_prefix("`\n")
        .map(|rest| block.with_content(rest))
}

/// `functions.execute({"language": ..., "code": ...})` written as code.
pub fn unwrap_execute_call(block: &CodeBlock) -> Option<CodeBlock> {
    if !block.content.starts_with("functions.execute(") {
        return None;
    }
    let inner = block.content.replace("functions.execute(", "");
    let args: Map<String, Value> = serde_json::from_str(inner.trim_end_matches(')')).ok()?;

    let format = match args.get("language") {
        Some(Value::String(language)) => language.trim().to_lowercase(),
        _ => block.format.clone(),
    };
    let content = match args.get("code") {
        Some(Value::String(code)) => code.clone(),
        _ => block.content.clone(),
    };
    Some(CodeBlock { format, content })
}

/// A trailing `executeexecute`, which some models append to every block.
pub fn strip_execute_sentinel(block: &CodeBlock) -> Option<CodeBlock> {
    if !block.content.trim().ends_with("executeexecute") {
        return None;
    }
    Some(block.with_content(block.content.replace("executeexecute", "")))
}

/// `{"language": ..., "code": ...}` with exactly those keys.
pub fn unwrap_json_pair(block: &CodeBlock) -> Option<CodeBlock> {
    if !squeezed(&block.content).starts_with(r#"{"language":"#) {
        return None;
    }
    parse_pair(&block.content)
}

/// `{language: ..., code: ...}` with the keys left unquoted.
pub fn unwrap_unquoted_pair(block: &CodeBlock) -> Option<CodeBlock> {
    if !squeezed(&block.content).starts_with("{language:") {
        return None;
    }
    let quoted = block
        .content
        .replace("language: ", r#""language": "#)
        .replace("code: ", r#""code": "#);
    parse_pair(&quoted)
}

/// The text with newlines and spaces removed.
fn squeezed(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != ' ').collect()
}

fn parse_pair(text: &str) -> Option<CodeBlock> {
    let map: Map<String, Value> = serde_json::from_str(text).ok()?;
    if map.len() != 2 {
        return None;
    }
    match (map.get("language"), map.get("code")) {
        (Some(Value::String(language)), Some(Value::String(code))) => {
            Some(CodeBlock::new(language, code.clone()))
        }
        _ => None,
    }
}
