//! The response loop.
//!
//! One call to [`respond`] produces the assistant's whole reply to the
//! latest user turn:
//!
//! 1. **Compose** the system message
//! 2. **Stream the model** when the history does not end in code
//! 3. **Dispatch** the code block when it does, feeding output back in
//! 4. **Nudge** the model when it stalls with looping enabled
//!
//! and repeats until the model stops asking for execution.

use codeloop_core::error::{report, Error, ProviderError, Result};
use codeloop_core::message::Turn;
use codeloop_core::provider::LlmChunk;
use tracing::{debug, info, warn};

use crate::dispatch::{self, Step};
use crate::recovery::{self, Recovery};
use crate::session::Session;
use crate::sink::TurnSink;
use crate::stall_guard;

/// Separates a nudged reply from what came before it.
pub const SPACER: &str = "\n\n";

/// How a reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model stopped asking for execution
    Done,

    /// The approver declined to run a block
    Cancelled,

    /// The model repeated a block in a language that cannot run
    RepeatedUnsupported,

    /// The session spend cap was reached
    BudgetExceeded,

    /// The provider quota is used up
    QuotaExhausted,
}

/// Emit a turn and store it in the conversation.
pub(crate) fn record(session: &mut Session, sink: &mut dyn TurnSink, turn: Turn) {
    sink.emit(&turn);
    session.conversation.absorb(&turn);
}

/// Respond to the conversation until the model is done.
///
/// Dropping the returned future interrupts the reply; the session stays
/// usable and keeps whatever was streamed so far.
pub async fn respond(session: &mut Session, sink: &mut dyn TurnSink) -> Result<Outcome> {
    if session.conversation.is_empty() {
        return Err(Error::Internal(
            "respond needs at least one turn in the conversation".into(),
        ));
    }

    session.last_unsupported_code = None;
    let mut nudge: Option<String> = None;
    let mut iteration = 0usize;

    loop {
        iteration += 1;
        let system_message = session.render_system_message();
        debug!(iteration, turns = session.conversation.len(), "Response loop iteration");

        if let Some(text) = nudge.take() {
            session.conversation.push(Turn::user(text));
            sink.emit(&Turn::assistant(SPACER));
        }

        if !ends_in_code(session) {
            if let Err(err) = stream_reply(session, sink, system_message).await {
                warn!(error = %err, "Model call failed");
                let model = session.llm.model().to_string();
                match recovery::classify(&err, &model, &session.fallback_model, session.offline) {
                    Recovery::Stop { notice, outcome } => {
                        sink.display_message(&notice);
                        return Ok(outcome);
                    }
                    Recovery::SwitchModel { question, model } => {
                        if !sink.ask_model_switch(&question).await {
                            return Err(err.into());
                        }
                        session.llm.set_model(&model);
                        info!(model = %model, "Switched to fallback model");
                        sink.display_message(&format!("> Model set to `{model}`"));
                        continue;
                    }
                    Recovery::Fail(e) => return Err(e),
                }
            }
        }

        if ends_in_code(session) {
            match dispatch::dispatch(session, sink).await {
                Ok(Step::Continue) => continue,
                Ok(Step::Stop(outcome)) => return Ok(outcome),
                Err(err) => {
                    warn!(error = %err, "Code execution failed");
                    session.conversation.seal();
                    record(session, sink, Turn::console_output(report(&err)));
                    session.conversation.seal();
                    continue;
                }
            }
        }

        nudge = stall_guard::check(
            &mut session.conversation,
            session.loop_enabled,
            &session.loop_message,
            &session.loop_breakers,
            session.os,
        );
        if nudge.is_none() {
            return Ok(Outcome::Done);
        }
    }
}

fn ends_in_code(session: &Session) -> bool {
    session.conversation.last().is_some_and(Turn::is_code)
}

/// Stream one model reply into the conversation.
async fn stream_reply(
    session: &mut Session,
    sink: &mut dyn TurnSink,
    system_message: String,
) -> std::result::Result<(), ProviderError> {
    let mut turns = Vec::with_capacity(session.conversation.len() + 1);
    turns.push(Turn::system(system_message));
    turns.extend(session.conversation.turns.iter().cloned());

    session.conversation.seal();
    let mut stream = session.llm.run(&turns).await?;

    while let Some(chunk) = stream.recv().await {
        match chunk? {
            LlmChunk::Usage { usage } => {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }
            chunk => {
                if let Some(turn) = chunk.into_turn() {
                    record(session, sink, turn);
                }
            }
        }
    }

    session.conversation.seal();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{unsupported_notice, EMPTY_CODE_NOTICE};
    use crate::sink::Decision;
    use crate::test_helpers::*;
    use codeloop_core::computer::Computer;
    use serde_json::json;

    fn new_session(llm: ScriptedLlm, computer: FakeComputer) -> Session {
        let mut session = Session::new(Box::new(llm), Box::new(computer));
        session.conversation.push(Turn::user("list files"));
        session
    }

    fn console_texts(turns: &[Turn]) -> Vec<String> {
        turns
            .iter()
            .filter(|t| t.kind == codeloop_core::message::TurnType::Console && !t.is_transient())
            .map(|t| t.text().to_string())
            .collect()
    }

    #[tokio::test]
    async fn empty_history_is_an_error() {
        let mut session = Session::new(
            Box::new(ScriptedLlm::new(vec![])),
            Box::new(FakeComputer::new()),
        );
        let result = respond(&mut session, &mut RecordingSink::approving()).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn message_reply_finishes() {
        let llm = ScriptedLlm::new(vec![reply(vec![
            LlmChunk::message("Hello"),
            LlmChunk::message(" there"),
        ])]);
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(session.conversation.last(), Some(&Turn::assistant("Hello there")));
        assert_eq!(sink.emitted.len(), 2);
    }

    #[tokio::test]
    async fn code_runs_and_output_goes_back_to_the_model() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![
                LlmChunk::message("Listing."),
                LlmChunk::code("shell", "ls"),
            ]),
            reply(vec![LlmChunk::message("Two files.")]),
        ]);
        let seen = llm.requests();
        let computer = FakeComputer::new().with_output("a.txt\nb.txt\n");
        let mut session = new_session(llm, computer);
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(
            session.conversation.turns,
            vec![
                Turn::user("list files"),
                Turn::assistant("Listing."),
                Turn::code("shell", "ls"),
                Turn::console_output("a.txt\nb.txt\n"),
                Turn::assistant("Two files."),
            ]
        );

        // The second request carries the system turn and the console output
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1][0].role, codeloop_core::message::Role::System);
        assert_eq!(seen[1].last(), Some(&Turn::console_output("a.txt\nb.txt\n")));
    }

    #[tokio::test]
    async fn execute_call_hallucination_is_repaired() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code(
                "json",
                r#"functions.execute({"language":"python","code":"print(1)"})"#,
            )]),
            reply(vec![LlmChunk::message("Printed.")]),
        ]);
        let computer = FakeComputer::new();
        let runs = computer.runs();
        let mut session = new_session(llm, computer);

        respond(&mut session, &mut RecordingSink::approving()).await.unwrap();
        assert_eq!(session.conversation.turns[1], Turn::code("python", "print(1)"));
        assert_eq!(runs.lock().unwrap()[0], ("python".to_string(), "print(1)".to_string()));
    }

    #[tokio::test]
    async fn markdown_block_is_rewrapped_without_confirmation() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("markdown", "- item")]),
            reply(vec![LlmChunk::message("Noted.")]),
        ]);
        let computer = FakeComputer::new();
        let runs = computer.runs();
        let mut session = new_session(llm, computer);
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert!(sink.confirmations.is_empty());
        assert!(runs.lock().unwrap().is_empty());
        assert_eq!(session.conversation.turns[1], Turn::assistant("```\n- item\n```"));
    }

    #[tokio::test]
    async fn repeated_unsupported_code_stops_after_one_notice() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("cobol", "DISPLAY 'HI'.")]),
            reply(vec![LlmChunk::code("cobol", "DISPLAY 'HI'.")]),
            reply(vec![LlmChunk::message("never reached")]),
        ]);
        let calls = llm.requests();
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::RepeatedUnsupported);
        assert_eq!(calls.lock().unwrap().len(), 2);

        let notices: Vec<_> = console_texts(&sink.emitted)
            .into_iter()
            .filter(|t| t.contains("disabled or not supported"))
            .collect();
        assert_eq!(notices, vec![unsupported_notice("cobol")]);
    }

    #[tokio::test]
    async fn alternating_unsupported_code_is_not_caught() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("cobol", "A")]),
            reply(vec![LlmChunk::code("cobol", "B")]),
            reply(vec![LlmChunk::message("giving up")]),
        ]);
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(console_texts(&session.conversation.turns).len(), 2);
    }

    #[tokio::test]
    async fn empty_code_is_reported_and_loop_continues() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("python", "   ")]),
            reply(vec![LlmChunk::message("Oops.")]),
        ]);
        let mut session = new_session(llm, FakeComputer::new());

        let outcome = respond(&mut session, &mut RecordingSink::approving()).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(session.conversation.turns[2], Turn::console_output(EMPTY_CODE_NOTICE));
    }

    #[tokio::test]
    async fn cancel_at_confirmation_stops_cleanly() {
        let llm = ScriptedLlm::new(vec![reply(vec![LlmChunk::code("shell", "ls")])]);
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::with_decisions(vec![Decision::Cancel]);

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(sink.confirmations, vec![codeloop_core::message::PendingCode::new("shell", "ls")]);
    }

    #[tokio::test]
    async fn execution_error_becomes_console_turn() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("shell", "boom")]),
            reply(vec![LlmChunk::message("It failed.")]),
        ]);
        let mut session = new_session(llm, FakeComputer::new().failing_runs());

        let outcome = respond(&mut session, &mut RecordingSink::approving()).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        let error_turn = &session.conversation.turns[2];
        assert!(error_turn.text().starts_with("Execution error"));
        assert!(error_turn.text().contains("Caused by"));
    }

    #[tokio::test]
    async fn stall_nudges_without_piling_up() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::message("Working on it.")]),
            reply(vec![LlmChunk::message("Still working.")]),
            reply(vec![LlmChunk::message("The task is done.")]),
        ]);
        let seen = llm.requests();
        let mut session = new_session(llm, FakeComputer::new());
        session.loop_enabled = true;
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Done);

        let nudge = session.loop_message.clone();
        let nudges = session
            .conversation
            .turns
            .iter()
            .filter(|t| t.text() == nudge)
            .count();
        assert_eq!(nudges, 1);
        assert_eq!(
            session.conversation.turns,
            vec![
                Turn::user("list files"),
                Turn::assistant("Working on it.\nStill working."),
                Turn::user(nudge.clone()),
                Turn::assistant("The task is done."),
            ]
        );

        // Each nudged call saw exactly one nudge, preceded by a spacer
        for request in seen.lock().unwrap().iter().skip(1) {
            assert_eq!(request.iter().filter(|t| t.text() == nudge).count(), 1);
        }
        assert_eq!(
            sink.emitted.iter().filter(|t| t.text() == SPACER).count(),
            2
        );
    }

    #[tokio::test]
    async fn screen_mode_nudge_asks_for_screenshot() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::message("Opened the app.")]),
            reply(vec![LlmChunk::message("The task is done.")]),
        ]);
        let mut session = new_session(llm, FakeComputer::new());
        session.loop_enabled = true;
        session.os = true;

        respond(&mut session, &mut RecordingSink::approving()).await.unwrap();
        assert!(session.conversation.turns[2].text().contains("take a screenshot"));
    }

    #[tokio::test]
    async fn budget_exceeded_displays_notice_and_stops() {
        let llm = ScriptedLlm::new(vec![Err(ProviderError::BudgetExceeded {
            spent_usd: 1.2,
            max_usd: 1.0,
        })]);
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::approving();

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::BudgetExceeded);
        assert!(sink.notices[0].starts_with("> Max budget exceeded"));
    }

    #[tokio::test]
    async fn model_switch_accepted_retries_on_fallback() {
        let llm = ScriptedLlm::new(vec![
            Err(ProviderError::AccessDenied("You do not have access to gpt-4o".into())),
            reply(vec![LlmChunk::message("Hi from the fallback.")]),
        ]);
        let model = llm.current_model();
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::approving().answering_switch(true);

        let outcome = respond(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(*model.lock().unwrap(), session.fallback_model);
        assert_eq!(sink.questions.len(), 1);
        assert!(sink
            .notices
            .contains(&format!("> Model set to `{}`", session.fallback_model)));
    }

    #[tokio::test]
    async fn model_switch_declined_fails() {
        let llm = ScriptedLlm::new(vec![Err(ProviderError::AccessDenied(
            "You do not have access to gpt-4o".into(),
        ))]);
        let mut session = new_session(llm, FakeComputer::new());
        let mut sink = RecordingSink::approving().answering_switch(false);

        let result = respond(&mut session, &mut sink).await;
        assert!(matches!(result, Err(Error::Provider(ProviderError::AccessDenied(_)))));
    }

    #[tokio::test]
    async fn auth_failure_propagates_with_help() {
        let llm = ScriptedLlm::new(vec![Err(ProviderError::AuthenticationFailed(
            "Incorrect API key provided".into(),
        ))]);
        let mut session = new_session(llm, FakeComputer::new());

        let result = respond(&mut session, &mut RecordingSink::approving()).await;
        assert!(matches!(result, Err(Error::ProviderHelp { .. })));
    }

    #[tokio::test]
    async fn mid_stream_failure_is_classified() {
        let llm = ScriptedLlm::new(vec![Ok(vec![
            Ok(LlmChunk::message("partial")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ])]);
        let mut session = new_session(llm, FakeComputer::new());

        let result = respond(&mut session, &mut RecordingSink::approving()).await;
        assert!(matches!(result, Err(Error::Provider(ProviderError::StreamInterrupted(_)))));
        assert_eq!(session.conversation.last(), Some(&Turn::assistant("partial")));
    }

    #[tokio::test]
    async fn computer_import_is_shimmed_before_running() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("python", "import computer\nprint(1)")]),
            reply(vec![LlmChunk::message("Done.")]),
        ]);
        let computer = FakeComputer::new().with_computer_api();
        let runs = computer.runs();
        let mut session = new_session(llm, computer);

        respond(&mut session, &mut RecordingSink::approving()).await.unwrap();
        assert_eq!(runs.lock().unwrap()[0], ("python".to_string(), "pass\nprint(1)".to_string()));
        // The stored turn keeps what the model wrote
        assert_eq!(session.conversation.turns[1].text(), "import computer\nprint(1)");
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_sync() {
        let llm = ScriptedLlm::new(vec![
            reply(vec![LlmChunk::code("python", "x = 1")]),
            reply(vec![LlmChunk::message("Set.")]),
        ]);
        let mut computer = FakeComputer::new();
        computer.load_dict(
            json!({
                "cwd": "/work",
                "notes": ["it's", "fine"],
                "_hashes": {"a": 1},
                "system_message": "volatile"
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let original = computer.to_dict();
        let mut session = new_session(llm, computer);
        session.sync_computer = true;

        respond(&mut session, &mut RecordingSink::approving()).await.unwrap();

        let mut expected = original;
        expected.remove("_hashes");
        expected.remove("system_message");
        assert_eq!(session.computer.to_dict(), expected);
    }
}
