//! The response loop of codeloop.
//!
//! The loop follows a **Stream → Repair → Confirm → Execute** cycle:
//!
//! 1. **Compose** the system message (persona, language notes, instructions)
//! 2. **Stream** the model's reply into the conversation
//! 3. **Repair** a malformed code block and check it can run
//! 4. **Confirm** with the human, then **execute** it on the computer
//! 5. **Feed** the output back and go to step 1
//!
//! The loop ends when the model answers without code and either looping is
//! off or the answer contains a completion phrase.

pub mod dispatch;
pub mod normalize;
pub mod recovery;
pub mod respond;
pub mod session;
pub mod shim;
pub mod sink;
pub mod stall_guard;
pub mod sync;
pub mod system_message;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use normalize::CodeBlock;
pub use recovery::Recovery;
pub use respond::{respond, Outcome};
pub use session::Session;
pub use sink::{AutoApprove, Decision, TurnSink};
