//! Terminal message log.
//!
//! Bounded, append-only record of everything the terminal sent, received or
//! reported. Appending is the only mutation; when the log outgrows its
//! capacity the oldest block of entries is dropped in one go.

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::utils::escape_line_breaks;

/// Timestamp format used by [`MessageLog::export`].
pub const EXPORT_TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Kind of a terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageKind {
    /// Data sent to the peripheral.
    Tx,
    /// Data received from the peripheral.
    Rx,
    /// Lifecycle information.
    Info,
    /// A reported failure.
    Error,
}

impl MessageKind {
    /// Prefix used in exported logs.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Tx => "TX:",
            Self::Rx => "RX:",
            Self::Info => "INFO:",
            Self::Error => "ERROR:",
        }
    }
}

/// A single immutable log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerminalMessage {
    id: Uuid,
    sequence: u64,
    timestamp: DateTime<Local>,
    kind: MessageKind,
    text: String,
}

impl TerminalMessage {
    /// Unique identity of this entry.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Position in the overall append order, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the entry was created.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// The kind of entry.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The rendered payload.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render as an export line: `[HH:mm:ss.mmm] PREFIX text`.
    ///
    /// Line breaks inside the text are escaped, so one entry is one line.
    pub fn export_line(&self) -> String {
        format!(
            "[{}] {} {}",
            self.timestamp.format(EXPORT_TIME_FORMAT),
            self.kind.prefix(),
            escape_line_breaks(&self.text)
        )
    }
}

/// Bounded, ordered message log.
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<TerminalMessage>,
    capacity: usize,
    eviction_batch: usize,
    next_sequence: u64,
    last_timestamp: Option<DateTime<Local>>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(&TerminalConfig::default())
    }
}

impl MessageLog {
    /// Create an empty log with the configured bounds.
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            messages: Vec::new(),
            capacity: config.message_log_capacity.max(1),
            eviction_batch: config
                .message_eviction_batch
                .clamp(1, config.message_log_capacity.max(1)),
            next_sequence: 1,
            last_timestamp: None,
        }
    }

    /// Append an entry stamped with the current time.
    pub fn append(&mut self, text: impl Into<String>, kind: MessageKind) -> &TerminalMessage {
        // Wall clock can step backwards; keep entries chronologically ordered.
        let now = Local::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        let message = TerminalMessage {
            id: Uuid::new_v4(),
            sequence: self.next_sequence,
            timestamp,
            kind,
            text: text.into(),
        };
        self.next_sequence += 1;

        self.messages.push(message);
        if self.messages.len() > self.capacity {
            self.messages.drain(..self.eviction_batch);
        }

        &self.messages[self.messages.len() - 1]
    }

    /// Remove all entries, then record that the log was cleared.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.append("Messages cleared", MessageKind::Info);
    }

    /// Render every entry, one per line.
    pub fn export(&self) -> String {
        export_messages(&self.messages)
    }

    /// All entries in append order.
    pub fn messages(&self) -> &[TerminalMessage] {
        &self.messages
    }

    /// Entries appended after the given sequence number.
    pub fn since(&self, sequence: u64) -> impl Iterator<Item = &TerminalMessage> {
        let start = self
            .messages
            .partition_point(|message| message.sequence <= sequence);
        self.messages[start..].iter()
    }

    /// Sequence number of the newest entry, or 0 if nothing was ever appended.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Render a set of messages as an export.
pub fn export_messages(messages: &[TerminalMessage]) -> String {
    messages
        .iter()
        .map(TerminalMessage::export_line)
        .collect::<Vec<_>>()
        .join("\n")
}
