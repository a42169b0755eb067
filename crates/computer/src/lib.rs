//! Local computer for codeloop.
//!
//! Runs each code block in a fresh interpreter subprocess (code on stdin),
//! streaming stdout and stderr back line by line. The set of languages is
//! driven by `[computer.languages]` in the config file.

pub mod language;
pub mod local;
pub mod subprocess;

pub use language::{Language, LanguageTable};
pub use local::LocalComputer;
