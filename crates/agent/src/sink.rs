//! The display side of the loop.
//!
//! Everything the loop shows or asks goes through a [`TurnSink`]: streamed
//! turns, out-of-band notices, the approval gate before execution and the
//! model-switch question after an access failure. The loop never touches a
//! terminal itself.

use async_trait::async_trait;
use codeloop_core::message::{PendingCode, Turn};

/// The approver's answer to a confirmation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run the code as shown
    Approve,

    /// Run this code instead; it replaces the stored code turn
    Edit(String),

    /// Stop the response without running anything
    Cancel,
}

#[async_trait]
pub trait TurnSink: Send {
    /// A turn as it streams (assistant chunks, console output, markers).
    fn emit(&mut self, turn: &Turn);

    /// A notice for the human that is not part of the conversation.
    fn display_message(&mut self, message: &str);

    /// Ask whether `pending` may run.
    async fn confirm(&mut self, pending: &PendingCode) -> Decision;

    /// Ask a y/n question about switching models; `true` means yes.
    async fn ask_model_switch(&mut self, question: &str) -> bool;
}

/// A sink that approves everything and prints nothing.
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl TurnSink for AutoApprove {
    fn emit(&mut self, _turn: &Turn) {}

    fn display_message(&mut self, _message: &str) {}

    async fn confirm(&mut self, _pending: &PendingCode) -> Decision {
        Decision::Approve
    }

    async fn ask_model_switch(&mut self, _question: &str) -> bool {
        false
    }
}
