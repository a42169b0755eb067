//! Loop-stall guard.
//!
//! When looping is on and the model stops talking without saying one of the
//! completion phrases, it is sent a nudge and the loop continues. Old nudges
//! are removed first so they never pile up, and the assistant messages they
//! separated are merged into one.

use codeloop_core::message::{Conversation, Role, Turn, TurnType};
use tracing::debug;

const SCREEN_ANCHOR: &str = "If the entire task I asked for is done,";
const SCREEN_CHECK: &str = "If the entire task I asked for is done, take a screenshot to verify it's complete, or if you've already taken a screenshot and verified it's complete,";

/// The nudge text, rewritten for screen mode when `os` is set.
pub fn nudge_text(loop_message: &str, os: bool) -> String {
    if os {
        loop_message.replace(SCREEN_ANCHOR, SCREEN_CHECK)
    } else {
        loop_message.to_string()
    }
}

/// Whether the last turn is an assistant message that did not finish the task.
pub fn stalled(turns: &[Turn], breakers: &[String]) -> bool {
    let Some(last) = turns.last() else {
        return false;
    };
    last.role == Role::Assistant
        && last.kind == TurnType::Message
        && !breakers.iter().any(|b| last.text().contains(b.as_str()))
}

/// Remove every earlier copy of `nudge` and merge adjacent assistant messages.
pub fn tidy(conversation: &mut Conversation, nudge: &str) {
    let mut merged: Vec<Turn> = Vec::with_capacity(conversation.len());

    for turn in conversation.turns.drain(..) {
        if turn.text() == nudge {
            continue;
        }
        match merged.last_mut() {
            Some(prev) if is_assistant_message(prev) && is_assistant_message(&turn) => {
                let joined = format!("{}\n{}", prev.text(), turn.text());
                *prev = Turn::assistant(joined);
            }
            _ => merged.push(turn),
        }
    }

    conversation.replace(merged);
}

fn is_assistant_message(turn: &Turn) -> bool {
    turn.role == Role::Assistant && turn.kind == TurnType::Message
}

/// Decide whether to nudge. On `Some`, the history has been tidied and the
/// returned text should be sent as the next user turn.
pub fn check(
    conversation: &mut Conversation,
    loop_enabled: bool,
    loop_message: &str,
    breakers: &[String],
    os: bool,
) -> Option<String> {
    if !loop_enabled || !stalled(&conversation.turns, breakers) {
        return None;
    }
    let nudge = nudge_text(loop_message, os);
    tidy(conversation, &nudge);
    debug!(turns = conversation.len(), "Model stalled, nudging");
    Some(nudge)
}
