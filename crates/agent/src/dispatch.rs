//! Execution dispatcher: takes the code turn at the end of the history
//! through repair, the language and emptiness checks, the approval gate, the
//! import shim, state sync and finally the computer.

use codeloop_core::computer::SCRIPTING_LANGUAGE;
use codeloop_core::error::Result;
use codeloop_core::message::{Content, PendingCode, Turn};
use tracing::{debug, warn};

use crate::normalize::{self, CodeBlock};
use crate::respond::{record, Outcome};
use crate::session::Session;
use crate::shim;
use crate::sink::{Decision, TurnSink};
use crate::sync;

/// Console text for an empty block.
pub const EMPTY_CODE_NOTICE: &str =
    "Code block was empty. Please try again, be sure to write code before executing.";

/// Stored when a run printed nothing, so the block is not run again.
pub const NO_OUTPUT_NOTICE: &str = "No output";

/// What the loop does after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Go around again
    Continue,

    /// End the reply
    Stop(Outcome),
}

/// Console text for a language the computer cannot run.
pub fn unsupported_notice(language: &str) -> String {
    format!("`{language}` disabled or not supported.")
}

/// Handle the code turn at the end of the history.
pub async fn dispatch(session: &mut Session, sink: &mut dyn TurnSink) -> Result<Step> {
    session.conversation.seal();

    let Some(block) = repair_last_turn(session) else {
        return Ok(Step::Continue);
    };
    let CodeBlock {
        format: language,
        content: code,
    } = block;

    if session.verbose {
        debug!(language = %language, code = %code, "Running code");
    }

    if !session.computer.supports(&language) {
        // The same rejected code twice in a row: the model is stuck
        if session.last_unsupported_code.as_deref() == Some(code.as_str()) {
            debug!(language = %language, "Repeated unsupported code, stopping");
            return Ok(Step::Stop(Outcome::RepeatedUnsupported));
        }
        record(session, sink, Turn::console_output(unsupported_notice(&language)));
        session.last_unsupported_code = Some(code);
        return Ok(Step::Continue);
    }

    if code.trim().is_empty() {
        record(session, sink, Turn::console_output(EMPTY_CODE_NOTICE));
        return Ok(Step::Continue);
    }

    let pending = PendingCode::new(&language, &code);
    sink.emit(&Turn::confirmation(pending.clone()));
    match sink.confirm(&pending).await {
        Decision::Approve => {}
        Decision::Edit(edited) => {
            if let Some(turn) = session.conversation.last_code_mut() {
                turn.content = Content::Text(edited);
            }
        }
        Decision::Cancel => {
            debug!("Execution cancelled at confirmation");
            return Ok(Step::Stop(Outcome::Cancelled));
        }
    }

    // The approver may have edited it
    let mut code = session
        .conversation
        .last_code()
        .map(|t| t.text().to_string())
        .unwrap_or(code);

    let scripting = language == SCRIPTING_LANGUAGE;
    if session.computer.import_computer_api() && scripting {
        code = shim::rewrite_computer_imports(&code);
    }

    let emit_images = session.llm.supports_vision();
    let flags = session.computer.flags_mut();
    flags.verbose = session.verbose;
    flags.debug = session.debug;
    flags.emit_images = emit_images;
    flags.max_output = session.max_output;

    let syncing = session.sync_computer && scripting;
    if syncing {
        tolerate_sync_failure(session.debug, sync::push(session.computer.as_mut()).await)?;
    }

    let stored_before = session.conversation.len();
    let mut output = session.computer.run(&language, &code).await?;
    while let Some(line) = output.recv().await {
        record(session, sink, line?.into_turn());
    }
    session.conversation.seal();

    if syncing {
        tolerate_sync_failure(session.debug, sync::pull(session.computer.as_mut()).await)?;
    }

    if session.conversation.len() == stored_before {
        record(session, sink, Turn::console_output(NO_OUTPUT_NOTICE));
        session.conversation.seal();
    }

    record(session, sink, Turn::active_line(None));
    Ok(Step::Continue)
}

/// Normalize the trailing code turn in place.
///
/// Returns `None` when the block was prose and has been turned into an
/// assistant message instead.
fn repair_last_turn(session: &mut Session) -> Option<CodeBlock> {
    let turn = session.conversation.last_mut()?;
    let raw = CodeBlock::new(turn.format().unwrap_or_default(), turn.text());
    let block = normalize::normalize(raw);

    if block.is_prose() {
        debug!(format = %block.format, "Prose block stored as a message");
        *turn = Turn::assistant(format!("```\n{}\n```", block.content));
        return None;
    }

    turn.format = Some(block.format.clone());
    turn.content = Content::Text(block.content.clone());
    Some(block)
}

fn tolerate_sync_failure(debug: bool, result: Result<()>) -> Result<()> {
    match result {
        Err(e) if !debug => {
            warn!(error = %e, "Computer state sync failed, continuing");
            Ok(())
        }
        other => other,
    }
}
