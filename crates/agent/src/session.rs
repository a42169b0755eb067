//! Session state: the conversation, its settings, and both collaborators.

use codeloop_config::AppConfig;
use codeloop_core::computer::Computer;
use codeloop_core::message::{Conversation, Turn};
use codeloop_core::provider::LlmClient;
use codeloop_core::Result;

use crate::respond::{respond, Outcome};
use crate::sink::TurnSink;
use crate::system_message::{self, Placeholders};

/// Everything one response loop reads and mutates.
///
/// A session is borrowed mutably by [`respond`] for the duration of a reply;
/// between replies the caller may inspect or edit it freely.
pub struct Session {
    pub conversation: Conversation,

    /// Base persona text
    pub system_message: String,
    pub custom_instructions: String,

    /// Nudge the model when it stops without a completion phrase
    pub loop_enabled: bool,
    pub loop_message: String,
    pub loop_breakers: Vec<String>,

    /// Screen mode; the nudge asks for a screenshot check
    pub os: bool,

    pub verbose: bool,
    pub debug: bool,
    pub max_output: usize,

    /// Mirror the computer snapshot into the scripting runtime around runs
    pub sync_computer: bool,

    /// Local model; hosted-provider recovery is skipped
    pub offline: bool,

    /// Model offered when the configured one is unavailable
    pub fallback_model: String,

    /// Code of the last block rejected for its language
    pub last_unsupported_code: Option<String>,

    pub llm: Box<dyn LlmClient>,
    pub computer: Box<dyn Computer>,
}

impl Session {
    /// A session with default settings.
    pub fn new(llm: Box<dyn LlmClient>, computer: Box<dyn Computer>) -> Self {
        Self::from_config(&AppConfig::default(), llm, computer)
    }

    pub fn from_config(
        config: &AppConfig,
        llm: Box<dyn LlmClient>,
        computer: Box<dyn Computer>,
    ) -> Self {
        let s = &config.session;
        Self {
            conversation: Conversation::new(),
            system_message: s.system_message.clone(),
            custom_instructions: s.custom_instructions.clone(),
            loop_enabled: s.loop_enabled,
            loop_message: s.loop_message.clone(),
            loop_breakers: s.loop_breakers.clone(),
            os: s.os,
            verbose: s.verbose,
            debug: s.debug,
            max_output: s.max_output,
            sync_computer: s.sync_computer,
            offline: s.offline,
            fallback_model: config.llm.fallback_model.clone(),
            last_unsupported_code: None,
            llm,
            computer,
        }
    }

    /// The system message for the next model call, placeholders rendered.
    pub fn render_system_message(&self) -> String {
        let api = self
            .computer
            .import_computer_api()
            .then(|| self.computer.api_description());
        let composed = system_message::compose(
            &self.system_message,
            &self.computer.language_notes(),
            &self.custom_instructions,
            api,
        );
        system_message::render(&composed, &Placeholders::from_env())
    }

    /// Append a user message and respond to it.
    pub async fn chat(
        &mut self,
        message: impl Into<String>,
        sink: &mut dyn TurnSink,
    ) -> Result<Outcome> {
        self.conversation.push(Turn::user(message));
        respond(self, sink).await
    }

    /// Forget the conversation, keeping settings and collaborators.
    pub fn reset(&mut self) {
        self.conversation = Conversation::new();
        self.last_unsupported_code = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("turns", &self.conversation.len())
            .field("model", &self.llm.model())
            .field("loop_enabled", &self.loop_enabled)
            .field("os", &self.os)
            .field("sync_computer", &self.sync_computer)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}
