//! Shared test doubles for the loop tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codeloop_core::computer::{Computer, ExecutionFlags, OutputLine, OutputStream, Snapshot};
use codeloop_core::error::{ExecutionError, ProviderError};
use codeloop_core::message::{PendingCode, Turn};
use codeloop_core::provider::{ChunkStream, LlmChunk, LlmClient};
use tokio::sync::mpsc;

use crate::sink::{Decision, TurnSink};
use crate::sync;

/// One scripted model call: a failed call, or the chunks it streams.
pub type Reply = Result<Vec<Result<LlmChunk, ProviderError>>, ProviderError>;

/// A reply that streams `chunks` without errors.
pub fn reply(chunks: Vec<LlmChunk>) -> Reply {
    Ok(chunks.into_iter().map(Ok).collect())
}

/// A mock model that answers each call with the next scripted reply.
///
/// Panics if more calls are made than replies provided.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    requests: Arc<Mutex<Vec<Vec<Turn>>>>,
    model: String,
    shared_model: Arc<Mutex<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            model: "gpt-4o".into(),
            shared_model: Arc::new(Mutex::new("gpt-4o".into())),
        }
    }

    /// Every turn list the model was called with, in order.
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Turn>>>> {
        Arc::clone(&self.requests)
    }

    /// The model name, tracked across `set_model` calls.
    pub fn current_model(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.shared_model)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
        *self.shared_model.lock().unwrap() = model.to_string();
    }

    async fn run(&self, turns: &[Turn]) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().unwrap().push(turns.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        let Some(reply) = next else {
            panic!("ScriptedLlm: no more replies (call #{})", self.requests.lock().unwrap().len());
        };

        let chunks = reply?;
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.try_send(chunk).unwrap();
        }
        Ok(rx)
    }
}

/// An in-memory computer.
///
/// Python and shell are supported. Sync code is interpreted against a
/// separate runtime-side snapshot so state round trips can be observed.
pub struct FakeComputer {
    output: Vec<String>,
    flags: ExecutionFlags,
    import_computer_api: bool,
    state: Snapshot,
    runtime_state: Mutex<Snapshot>,
    runs: Arc<Mutex<Vec<(String, String)>>>,
    fail_sync: bool,
    fail_runs: bool,
}

impl FakeComputer {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            flags: ExecutionFlags::default(),
            import_computer_api: false,
            state: Snapshot::new(),
            runtime_state: Mutex::new(Snapshot::new()),
            runs: Arc::new(Mutex::new(Vec::new())),
            fail_sync: false,
            fail_runs: false,
        }
    }

    /// Print `text` on every run, one output record per line.
    pub fn with_output(mut self, text: &str) -> Self {
        self.output = text.split_inclusive('\n').map(String::from).collect();
        self
    }

    pub fn with_computer_api(mut self) -> Self {
        self.import_computer_api = true;
        self
    }

    pub fn failing_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    pub fn failing_runs(mut self) -> Self {
        self.fail_runs = true;
        self
    }

    /// `(language, code)` of every non-sync run.
    pub fn runs(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        Arc::clone(&self.runs)
    }

    fn sync_error() -> ExecutionError {
        ExecutionError::SpawnFailed {
            language: "python".into(),
            reason: "no runtime".into(),
        }
    }

    /// Stream `lines`, each cut to `max_output` characters like a real runtime.
    fn stream(&self, lines: Vec<String>) -> OutputStream {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let line: String = line.chars().take(self.flags.max_output).collect();
            tx.try_send(Ok(OutputLine::output(line))).unwrap();
        }
        rx
    }
}

#[async_trait]
impl Computer for FakeComputer {
    fn supports(&self, language: &str) -> bool {
        matches!(language, "python" | "shell")
    }

    fn language_notes(&self) -> Vec<String> {
        vec!["Shell commands run in sh.".into()]
    }

    fn api_description(&self) -> &str {
        "A `computer` object is available."
    }

    fn import_computer_api(&self) -> bool {
        self.import_computer_api
    }

    fn flags(&self) -> &ExecutionFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut ExecutionFlags {
        &mut self.flags
    }

    async fn run(&self, language: &str, code: &str) -> Result<OutputStream, ExecutionError> {
        if let Some(payload) = sync::pushed_payload(code) {
            if self.fail_sync {
                return Err(Self::sync_error());
            }
            *self.runtime_state.lock().unwrap() = serde_json::from_str(payload).unwrap();
            return Ok(self.stream(vec![]));
        }
        if code == sync::PULL_CODE {
            if self.fail_sync {
                return Err(Self::sync_error());
            }
            let json = serde_json::to_string(&*self.runtime_state.lock().unwrap()).unwrap();
            return Ok(self.stream(vec![format!("{json}\n")]));
        }

        self.runs
            .lock()
            .unwrap()
            .push((language.to_string(), code.to_string()));
        if self.fail_runs {
            return Err(ExecutionError::Io(std::io::Error::other("runtime crashed")));
        }
        Ok(self.stream(self.output.clone()))
    }

    fn to_dict(&self) -> Snapshot {
        self.state.clone()
    }

    fn load_dict(&mut self, snapshot: Snapshot) {
        self.state = snapshot;
    }
}

/// A sink that records everything and answers from a script.
pub struct RecordingSink {
    pub emitted: Vec<Turn>,
    pub notices: Vec<String>,
    pub confirmations: Vec<PendingCode>,
    pub questions: Vec<String>,
    decisions: VecDeque<Decision>,
    switch_answer: bool,
}

impl RecordingSink {
    /// Approves every block and declines model switches.
    pub fn approving() -> Self {
        Self::with_decisions(vec![])
    }

    /// Answers confirmations with `decisions` in order, then approves.
    pub fn with_decisions(decisions: Vec<Decision>) -> Self {
        Self {
            emitted: Vec::new(),
            notices: Vec::new(),
            confirmations: Vec::new(),
            questions: Vec::new(),
            decisions: decisions.into(),
            switch_answer: false,
        }
    }

    pub fn answering_switch(mut self, answer: bool) -> Self {
        self.switch_answer = answer;
        self
    }
}

#[async_trait]
impl TurnSink for RecordingSink {
    fn emit(&mut self, turn: &Turn) {
        self.emitted.push(turn.clone());
    }

    fn display_message(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    async fn confirm(&mut self, pending: &PendingCode) -> Decision {
        self.confirmations.push(pending.clone());
        self.decisions.pop_front().unwrap_or(Decision::Approve)
    }

    async fn ask_model_switch(&mut self, question: &str) -> bool {
        self.questions.push(question.to_string());
        self.switch_answer
    }
}
