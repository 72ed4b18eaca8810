use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::models::{Message, Role};

/// Tracks which conversations have had a resume attempt this engine
/// lifetime, so a conversation left mid-generation is resumed exactly once
/// across repeated snapshot updates.
///
/// Not persisted: a reload gets a fresh map and may legitimately resume
/// again. Entries are keyed by conversation id and idempotent, which makes
/// the map safe to share across open conversation views.
pub struct ResumeCoordinator {
    attempted: Mutex<HashMap<String, bool>>,
}

impl ResumeCoordinator {
    pub fn new() -> Self {
        Self {
            attempted: Mutex::new(HashMap::new()),
        }
    }

    /// A conversation needs a resume when its last message is user-authored
    /// with no assistant reply after it, or when the backend explicitly
    /// flags it as streaming.
    pub fn needs_resume(messages: &[Message], streaming_hint: bool) -> bool {
        if streaming_hint {
            return true;
        }
        messages.last().is_some_and(|m| m.role == Role::User)
    }

    /// Check-and-mark in one step. Returns true at most once per
    /// conversation id until [`mark_failed`](Self::mark_failed) re-arms it.
    pub fn should_attempt(
        &self,
        conversation_id: &str,
        messages: &[Message],
        streaming_hint: bool,
    ) -> bool {
        if !Self::needs_resume(messages, streaming_hint) {
            return false;
        }
        let mut attempted = self.attempted.lock();
        if attempted.get(conversation_id).copied().unwrap_or(false) {
            return false;
        }
        attempted.insert(conversation_id.to_string(), true);
        debug!(conversation = %conversation_id, "marking resume attempt");
        true
    }

    /// A failed attempt clears the flag so a later natural retrigger (for
    /// example the user re-navigating) can try again.
    pub fn mark_failed(&self, conversation_id: &str) {
        self.attempted
            .lock()
            .insert(conversation_id.to_string(), false);
    }

    pub fn attempted(&self, conversation_id: &str) -> bool {
        self.attempted
            .lock()
            .get(conversation_id)
            .copied()
            .unwrap_or(false)
    }
}

impl Default for ResumeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
