use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::message::Message;

/// Upper bound on locally-held optimistic messages. Inserting past the cap
/// evicts the oldest entry by `created_at` (FIFO), so a burst of sends
/// issued faster than confirmations arrive cannot grow the map unbounded.
pub const MAX_PENDING: usize = 64;

/// Merges the authoritative message list with locally-held optimistic
/// messages into one ordered, de-duplicated view.
///
/// Pending entries are never mutated, only dropped: the instant an
/// authoritative message with the same `(role, content)` signature appears,
/// the pending copy is retired. The pending map shrinks monotonically as
/// confirmations arrive.
pub struct ConversationMessageStore {
    pending: HashMap<String, Message>,
}

impl ConversationMessageStore {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Insert an optimistic message keyed by its id.
    pub fn add_optimistic(&mut self, message: Message) {
        if self.pending.len() >= MAX_PENDING && !self.pending.contains_key(&message.id) {
            if let Some(oldest) = self
                .pending
                .values()
                .min_by_key(|m| m.created_at)
                .map(|m| m.id.clone())
            {
                debug!(evicted = %oldest, "pending map at capacity, evicting oldest entry");
                self.pending.remove(&oldest);
            }
        }
        self.pending.insert(message.id.clone(), message);
    }

    /// Drop all optimistic messages. Invoked whenever the authoritative
    /// source context changes (conversation switch) so stale entries cannot
    /// leak across conversations.
    pub fn clear_optimistic(&mut self) {
        self.pending.clear();
    }

    /// Remove a single optimistic message (e.g. after its write failed).
    pub fn remove_optimistic(&mut self, message_id: &str) {
        self.pending.remove(message_id);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Merge the latest authoritative snapshot with surviving pending
    /// messages, ordered by `created_at` ascending, stable on ties.
    ///
    /// `None` means the authoritative list has not loaded yet; only pending
    /// messages are returned.
    pub fn merge(&self, authoritative: Option<&[Message]>) -> Vec<Message> {
        let Some(authoritative) = authoritative else {
            let mut pending: Vec<Message> = self.pending.values().cloned().collect();
            pending.sort_by_key(|m| m.created_at);
            return pending;
        };

        let confirmed: HashSet<String> = authoritative.iter().map(|m| m.signature()).collect();

        let mut merged: Vec<Message> = authoritative.to_vec();
        let mut surviving: Vec<Message> = self
            .pending
            .values()
            .filter(|m| !confirmed.contains(&m.signature()))
            .cloned()
            .collect();
        surviving.sort_by_key(|m| m.created_at);
        merged.extend(surviving);

        // Stable sort keeps insertion order on created_at ties.
        merged.sort_by_key(|m| m.created_at);
        merged
    }

    /// Retire pending entries already confirmed by the given snapshot.
    pub fn retire_confirmed(&mut self, authoritative: &[Message]) {
        let confirmed: HashSet<String> = authoritative.iter().map(|m| m.signature()).collect();
        self.pending.retain(|_, m| !confirmed.contains(&m.signature()));
    }
}

impl Default for ConversationMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

/// First assistant message still satisfying the streaming predicate.
pub fn find_streaming_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().find(|m| m.is_streaming())
}

/// Two-tier streaming check: the backend may think a message is unfinished
/// (streaming predicate) while the user may or may not still be waiting on
/// it (`is_generating`, caller-supplied UI intent). Both must hold.
pub fn is_message_streaming(messages: &[Message], message_id: &str, is_generating: bool) -> bool {
    if !is_generating {
        return false;
    }
    if let Some(streaming) = find_streaming_message(messages) {
        if streaming.id == message_id {
            return true;
        }
    }
    messages
        .iter()
        .find(|m| m.id == message_id)
        .is_some_and(|m| m.is_streaming())
}
