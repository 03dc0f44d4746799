//! Command history.
//!
//! Most-recent-first list of sent text commands. Re-sending a command does not
//! deduplicate it; the new entry simply goes to the front.

use std::collections::VecDeque;

use crate::config::TerminalConfig;

/// Bounded most-recent-first list of sent commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(&TerminalConfig::default())
    }
}

impl CommandHistory {
    /// Create an empty history.
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: config.history_capacity.max(1),
        }
    }

    /// Insert a command at the front, dropping the oldest beyond capacity.
    ///
    /// Blank commands are not recorded. Returns whether the entry was added.
    pub fn push(&mut self, command: &str) -> bool {
        if command.trim().is_empty() {
            return false;
        }
        self.entries.push_front(command.to_string());
        self.entries.truncate(self.capacity);
        true
    }

    /// Entry at `index`, 0 being the most recent.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    /// All entries, most recent first.
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_first() {
        let mut history = CommandHistory::default();
        history.push("AT");
        history.push("AT+VER");
        assert_eq!(history.get(0), Some("AT+VER"));
        assert_eq!(history.get(1), Some("AT"));
    }

    #[test]
    fn test_duplicates_reinserted_at_front() {
        let mut history = CommandHistory::default();
        history.push("AT");
        history.push("AT+VER");
        history.push("AT");
        assert_eq!(history.entries(), vec!["AT", "AT+VER", "AT"]);
    }

    #[test]
    fn test_bounded() {
        let config = TerminalConfig::default().with_history_capacity(3);
        let mut history = CommandHistory::new(&config);
        for command in ["a", "b", "c", "d"] {
            history.push(command);
        }
        assert_eq!(history.entries(), vec!["d", "c", "b"]);
    }

    #[test]
    fn test_blank_ignored() {
        let mut history = CommandHistory::default();
        assert!(!history.push(""));
        assert!(!history.push("   "));
        assert!(history.is_empty());
    }
}
