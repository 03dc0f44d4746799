//! Data structures for terminal state.
//!
//! This module contains the message log and command history owned by the
//! link session.

pub mod history;
pub mod message_log;

pub use history::CommandHistory;
pub use message_log::{MessageKind, MessageLog, TerminalMessage};
