//! Append-only chat log.
//!
//! Arrival order is display order. Entries are never reordered, edited or
//! removed individually; the whole log is only replaced on join/rejoin
//! resynchronization and cleared on leave.

use std::collections::HashSet;

use crate::envelope::ChatMessage;

/// Outcome of [`MessageStream::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Appended at the tail.
    Appended,
    /// Appended, but its ordering key is lower than the previous tail's.
    OutOfOrder,
    /// Dropped: an entry with the same permanent id is already present.
    Duplicate,
}

/// Ordered message log for the current session.
///
/// # Invariants
///
/// - No two entries share a `perm_id` unless the server history itself
///   contained them.
/// - `revision` increases on every mutation.
#[derive(Debug, Clone, Default)]
pub struct MessageStream {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
    revision: u64,
}

impl MessageStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the tail.
    pub fn append(&mut self, message: ChatMessage) -> Append {
        if self.seen.contains(&message.perm_id) {
            return Append::Duplicate;
        }

        let ordered =
            self.messages.last().is_none_or(|tail| tail.ordering_key() <= message.ordering_key());

        self.seen.insert(message.perm_id.clone());
        self.messages.push(message);
        self.revision += 1;

        if ordered { Append::Appended } else { Append::OutOfOrder }
    }

    /// Replace the whole log with server-supplied history.
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.seen = messages.iter().map(|m| m.perm_id.clone()).collect();
        self.messages = messages;
        self.revision += 1;
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.revision += 1;
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Mutation counter for cheap change detection.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
