//! Incremental markdown fence splitter.
//!
//! Models without function calling write code as fenced blocks inside their
//! prose. The splitter consumes text deltas as they stream in and turns them
//! into message and code chunks. A line that starts with a backtick is held
//! back until it completes, since only a whole line can be told apart from a
//! fence.

use codeloop_core::provider::LlmChunk;

const FENCE: &str = "```";

/// Language assumed for a fence that names none.
pub const UNLABELED_FORMAT: &str = "text";

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Prose,
    Code(String),
}

/// Splits streamed text into prose and fenced code.
#[derive(Debug)]
pub struct FenceSplitter {
    mode: Mode,
    at_line_start: bool,
    held: String,
    closed: bool,
}

impl Default for FenceSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceSplitter {
    pub fn new() -> Self {
        Self {
            mode: Mode::Prose,
            at_line_start: true,
            held: String::new(),
            closed: false,
        }
    }

    /// Whether a code block has opened and closed. Nothing after it matters.
    pub fn finished_block(&self) -> bool {
        self.closed
    }

    /// Feed a delta, returning the chunks it completes.
    pub fn feed(&mut self, delta: &str) -> Vec<LlmChunk> {
        let mut out = Emitter::default();
        for c in delta.chars() {
            if self.closed {
                break;
            }
            if !self.held.is_empty() {
                self.held.push(c);
                if c == '\n' {
                    let line = std::mem::take(&mut self.held);
                    self.resolve_line(&line, &mut out);
                    self.at_line_start = true;
                }
            } else if self.at_line_start && c == '`' {
                self.held.push(c);
            } else {
                out.push(&self.mode, c);
                self.at_line_start = c == '\n';
            }
        }
        out.finish()
    }

    /// Flush anything held back at end of stream.
    pub fn finish(&mut self) -> Vec<LlmChunk> {
        let mut out = Emitter::default();
        if !self.held.is_empty() && !self.closed {
            let line = std::mem::take(&mut self.held);
            if matches!(self.mode, Mode::Code(_)) && line.trim_end() == FENCE {
                self.closed = true;
            } else {
                out.push_str(&self.mode, &line);
            }
        }
        out.finish()
    }

    fn resolve_line(&mut self, line: &str, out: &mut Emitter) {
        let trimmed = line.trim_end();
        match &self.mode {
            Mode::Prose => {
                if let Some(label) = trimmed.strip_prefix(FENCE) {
                    let label = label.trim();
                    let format = if label.is_empty() {
                        UNLABELED_FORMAT
                    } else {
                        label
                    };
                    self.mode = Mode::Code(format.to_string());
                } else {
                    out.push_str(&self.mode, line);
                }
            }
            Mode::Code(_) => {
                if trimmed == FENCE {
                    self.closed = true;
                    self.mode = Mode::Prose;
                } else {
                    out.push_str(&self.mode, line);
                }
            }
        }
    }
}

/// Coalesces characters into one chunk per contiguous mode run.
#[derive(Default)]
struct Emitter {
    chunks: Vec<LlmChunk>,
    current: Option<(Mode, String)>,
}

impl Emitter {
    fn push(&mut self, mode: &Mode, c: char) {
        match &mut self.current {
            Some((m, buf)) if m == mode => buf.push(c),
            _ => {
                self.flush();
                self.current = Some((mode.clone(), c.to_string()));
            }
        }
    }

    fn push_str(&mut self, mode: &Mode, s: &str) {
        for c in s.chars() {
            self.push(mode, c);
        }
    }

    fn flush(&mut self) {
        if let Some((mode, buf)) = self.current.take() {
            self.chunks.push(match mode {
                Mode::Prose => LlmChunk::message(buf),
                Mode::Code(format) => LlmChunk::code(format, buf),
            });
        }
    }

    fn finish(mut self) -> Vec<LlmChunk> {
        self.flush();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(deltas: &[&str]) -> (Vec<LlmChunk>, bool) {
        let mut splitter = FenceSplitter::new();
        let mut chunks = Vec::new();
        for d in deltas {
            chunks.extend(splitter.feed(d));
        }
        chunks.extend(splitter.finish());
        (chunks, splitter.finished_block())
    }

    fn concat(chunks: &[LlmChunk]) -> (String, Vec<(String, String)>) {
        let mut prose = String::new();
        let mut code: Vec<(String, String)> = Vec::new();
        for chunk in chunks {
            match chunk {
                LlmChunk::Message { content } => prose.push_str(content),
                LlmChunk::Code { format, content } => match code.last_mut() {
                    Some((f, c)) if f == format => c.push_str(content),
                    _ => code.push((format.clone(), content.clone())),
                },
                LlmChunk::Usage { .. } => {}
            }
        }
        (prose, code)
    }

    #[test]
    fn plain_prose_passes_through() {
        let (chunks, done) = split_all(&["Hello ", "world"]);
        assert_eq!(concat(&chunks).0, "Hello world");
        assert!(!done);
    }

    #[test]
    fn fenced_block_becomes_code() {
        let (chunks, done) = split_all(&["Let me check.\n```python\nprint(1)\n```\n"]);
        let (prose, code) = concat(&chunks);
        assert_eq!(prose, "Let me check.\n");
        assert_eq!(code, vec![("python".into(), "print(1)\n".into())]);
        assert!(done);
    }

    #[test]
    fn fences_split_across_deltas() {
        let (chunks, done) = split_all(&["Run:\n`", "``sh", "ell\nls -la\n`", "``", "\n"]);
        let (prose, code) = concat(&chunks);
        assert_eq!(prose, "Run:\n");
        assert_eq!(code, vec![("shell".into(), "ls -la\n".into())]);
        assert!(done);
    }

    #[test]
    fn unlabeled_fence_is_text() {
        let (chunks, _) = split_all(&["```\nsome output\n```"]);
        let (_, code) = concat(&chunks);
        assert_eq!(code, vec![(UNLABELED_FORMAT.into(), "some output\n".into())]);
    }

    #[test]
    fn inline_backticks_stay_prose() {
        let (chunks, done) = split_all(&["Use `ls` here\n`x` too"]);
        assert_eq!(concat(&chunks).0, "Use `ls` here\n`x` too");
        assert!(!done);
    }

    #[test]
    fn text_after_closed_block_is_dropped() {
        let (chunks, _) = split_all(&["```js\n1\n```\nafterwards"]);
        let (prose, code) = concat(&chunks);
        assert_eq!(prose, "");
        assert_eq!(code, vec![("js".into(), "1\n".into())]);
    }
}
