use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::BackendResult;
use crate::models::Message;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Latest value of the authoritative message subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageSnapshot {
    /// No conversation id is set; the subscription is not active.
    Skip,
    /// Subscribed but the first snapshot has not arrived yet.
    Loading,
    /// Current ordered messages for the conversation.
    Ready(Vec<Message>),
}

impl MessageSnapshot {
    pub fn messages(&self) -> Option<&[Message]> {
        match self {
            MessageSnapshot::Ready(messages) => Some(messages),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, MessageSnapshot::Loading)
    }
}

/// Which message a retry re-generates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryTarget {
    User,
    Assistant,
}

/// The durable backing store's write path and live subscription.
///
/// The engine consumes this and never implements it itself; the embedding
/// application supplies a backend speaking to its server or local store.
pub trait ChatBackend: Send + Sync + 'static {
    /// Live snapshot channel for a conversation. The receiver starts at
    /// `Loading` and moves to `Ready` once the first snapshot arrives;
    /// every subsequent write publishes a fresh snapshot.
    fn subscribe(&self, conversation_id: &str) -> watch::Receiver<MessageSnapshot>;

    /// Append a user message and kick off assistant generation.
    fn send_follow_up(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> BoxFuture<'static, BackendResult<()>>;

    /// Replace a message's content and re-generate from it.
    fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: String,
    ) -> BoxFuture<'static, BackendResult<()>>;

    /// Re-generate from the given user or assistant message.
    fn retry_from_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        target: RetryTarget,
    ) -> BoxFuture<'static, BackendResult<()>>;

    fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, BackendResult<()>>;

    fn delete_conversation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>>;

    fn stop_generation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>>;

    /// Re-trigger assistant generation for a conversation left mid-stream.
    fn resume_conversation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>>;

    /// Persist a new conversation in one step; returns the assigned id.
    fn create_conversation(
        &self,
        title: String,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, BackendResult<String>>;
}
