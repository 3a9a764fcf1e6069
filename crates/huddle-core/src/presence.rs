//! Typing presence.
//!
//! Local side is level-triggered: every input event re-asserts the flag, which
//! is idempotent for the backend and heals a lost update on the next
//! keystroke. Remote side is overwritten wholesale by each backend update;
//! there is no merging and no expiry.

use std::collections::BTreeSet;

use crate::envelope::{Outbound, TypingUpdate};

/// Local emission and remote aggregation of typing state.
#[derive(Debug, Clone, Default)]
pub struct TypingPresence {
    local_typing: bool,
    anyone_typing: bool,
    users_typing: BTreeSet<String>,
    revision: u64,
}

impl TypingPresence {
    /// Create with nobody typing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the local flag and produce the update to broadcast.
    pub fn set_local_typing(&mut self, typing: bool) -> Outbound {
        self.local_typing = typing;
        Outbound::SetTypingPresence { typing }
    }

    /// Final `false` after blur or a successful send.
    pub fn release(&mut self) -> Outbound {
        self.set_local_typing(false)
    }

    /// Overwrite the aggregated remote state.
    pub fn apply_remote(&mut self, update: TypingUpdate) {
        self.anyone_typing = update.anyone_typing;
        self.users_typing = update.users_typing.into_iter().collect();
        self.revision += 1;
    }

    /// Forget remote state, keep the local flag.
    pub fn clear_remote(&mut self) {
        if self.anyone_typing || !self.users_typing.is_empty() {
            self.anyone_typing = false;
            self.users_typing.clear();
            self.revision += 1;
        }
    }

    /// Back to defaults.
    pub fn reset(&mut self) {
        self.local_typing = false;
        self.clear_remote();
    }

    /// Last flag emitted for the local user.
    pub fn local_typing(&self) -> bool {
        self.local_typing
    }

    /// True if the backend reports anyone typing.
    pub fn anyone_typing(&self) -> bool {
        self.anyone_typing
    }

    /// Ids of remote participants typing.
    pub fn users_typing(&self) -> &BTreeSet<String> {
        &self.users_typing
    }

    /// Mutation counter for remote state.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
