use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use super::chat_backend::{BoxFuture, ChatBackend, MessageSnapshot, RetryTarget};
use super::error::{BackendError, BackendResult};
use crate::models::{Message, MessageStatus, Role};

#[derive(Debug, Clone)]
struct StoredConversation {
    title: String,
    messages: Vec<Message>,
    streaming: bool,
    updated_at: i64,
}

/// In-memory chat backend.
///
/// Backs the engine integration tests and local development; also the
/// durable target of ephemeral "save" in embeddings without a server.
/// Every mutation publishes a fresh snapshot on the conversation's watch
/// channel, mimicking a push-based live query.
#[derive(Clone)]
pub struct InMemoryChatBackend {
    conversations: Arc<Mutex<HashMap<String, StoredConversation>>>,
    channels: Arc<Mutex<HashMap<String, watch::Sender<MessageSnapshot>>>>,
}

impl InMemoryChatBackend {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(Mutex::new(HashMap::new())),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Seed a conversation directly, bypassing the write path.
    pub fn insert_conversation(&self, id: &str, title: &str, messages: Vec<Message>) {
        self.conversations.lock().insert(
            id.to_string(),
            StoredConversation {
                title: title.to_string(),
                messages,
                streaming: false,
                updated_at: Utc::now().timestamp(),
            },
        );
        self.publish(id);
    }

    /// Append a finished assistant reply, as a server would after
    /// generation completes.
    pub fn append_assistant_reply(&self, id: &str, content: &str) {
        {
            let mut store = self.conversations.lock();
            let Some(conversation) = store.get_mut(id) else {
                return;
            };
            let mut message = Message::new(Role::Assistant, content);
            message.metadata.finish_reason = Some("stop".to_string());
            message.metadata.status = Some(MessageStatus::Done);
            conversation.messages.push(message);
            conversation.streaming = false;
            conversation.updated_at = Utc::now().timestamp();
        }
        self.publish(id);
    }

    pub fn conversation_messages(&self, id: &str) -> Option<Vec<Message>> {
        self.conversations.lock().get(id).map(|c| c.messages.clone())
    }

    pub fn conversation_title(&self, id: &str) -> Option<String> {
        self.conversations.lock().get(id).map(|c| c.title.clone())
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.conversations
            .lock()
            .get(id)
            .is_some_and(|c| c.streaming)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.lock().contains_key(id)
    }

    fn publish(&self, id: &str) {
        let snapshot = self
            .conversations
            .lock()
            .get(id)
            .map(|c| MessageSnapshot::Ready(c.messages.clone()));
        if let Some(snapshot) = snapshot
            && let Some(sender) = self.channels.lock().get(id)
        {
            sender.send_replace(snapshot);
        }
    }

    fn with_conversation<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredConversation) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut store = self.conversations.lock();
        let conversation = store
            .get_mut(id)
            .ok_or_else(|| BackendError::ConversationNotFound { id: id.to_string() })?;
        let result = f(conversation);
        conversation.updated_at = Utc::now().timestamp();
        drop(store);
        self.publish(id);
        result
    }
}

impl Default for InMemoryChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatBackend for InMemoryChatBackend {
    fn subscribe(&self, conversation_id: &str) -> watch::Receiver<MessageSnapshot> {
        let initial = self
            .conversations
            .lock()
            .get(conversation_id)
            .map(|c| MessageSnapshot::Ready(c.messages.clone()))
            .unwrap_or(MessageSnapshot::Loading);

        let mut channels = self.channels.lock();
        let sender = channels
            .entry(conversation_id.to_string())
            .or_insert_with(|| watch::channel(initial.clone()).0);
        sender.send_replace(initial);
        sender.subscribe()
    }

    fn send_follow_up(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        Box::pin(async move {
            this.with_conversation(&id, |conversation| {
                conversation.messages.push(message);
                conversation.streaming = true;
                Ok(())
            })
        })
    }

    fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: String,
    ) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        let message_id = message_id.to_string();
        Box::pin(async move {
            this.with_conversation(&id, |conversation| {
                let Some(index) = conversation.messages.iter().position(|m| m.id == message_id)
                else {
                    return Err(BackendError::Rejected {
                        message: format!("message {} not found", message_id),
                    });
                };
                conversation.messages[index].content = content;
                // Editing re-generates from this point; later messages are
                // superseded.
                conversation.messages.truncate(index + 1);
                conversation.streaming = true;
                Ok(())
            })
        })
    }

    fn retry_from_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        target: RetryTarget,
    ) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        let message_id = message_id.to_string();
        Box::pin(async move {
            this.with_conversation(&id, |conversation| {
                let Some(index) = conversation.messages.iter().position(|m| m.id == message_id)
                else {
                    return Err(BackendError::Rejected {
                        message: format!("message {} not found", message_id),
                    });
                };
                let keep = match target {
                    RetryTarget::User => index + 1,
                    RetryTarget::Assistant => index,
                };
                conversation.messages.truncate(keep);
                conversation.streaming = true;
                Ok(())
            })
        })
    }

    fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        let message_id = message_id.to_string();
        Box::pin(async move {
            this.with_conversation(&id, |conversation| {
                conversation.messages.retain(|m| m.id != message_id);
                Ok(())
            })
        })
    }

    fn delete_conversation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        Box::pin(async move {
            let removed = this.conversations.lock().remove(&id);
            if removed.is_none() {
                return Err(BackendError::ConversationNotFound { id });
            }
            if let Some(sender) = this.channels.lock().remove(&id) {
                sender.send_replace(MessageSnapshot::Ready(Vec::new()));
            }
            Ok(())
        })
    }

    fn stop_generation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        Box::pin(async move {
            this.with_conversation(&id, |conversation| {
                conversation.streaming = false;
                if let Some(last) = conversation
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|m| m.is_streaming())
                {
                    last.metadata.stopped = true;
                    last.metadata.status = Some(MessageStatus::Done);
                }
                Ok(())
            })
        })
    }

    fn resume_conversation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>> {
        let this = self.clone();
        let id = conversation_id.to_string();
        Box::pin(async move {
            this.with_conversation(&id, |conversation| {
                conversation.streaming = true;
                Ok(())
            })
        })
    }

    fn create_conversation(
        &self,
        title: String,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, BackendResult<String>> {
        let this = self.clone();
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            this.conversations.lock().insert(
                id.clone(),
                StoredConversation {
                    title,
                    messages,
                    streaming: false,
                    updated_at: Utc::now().timestamp(),
                },
            );
            this.publish(&id);
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_read_back() {
        let backend = InMemoryChatBackend::new();
        let id = backend
            .create_conversation("Test".to_string(), vec![Message::user("hi")])
            .await
            .unwrap();

        let messages = backend.conversation_messages(&id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(backend.conversation_title(&id).as_deref(), Some("Test"));
    }

    #[tokio::test]
    async fn test_send_follow_up_appends_and_marks_streaming() {
        let backend = InMemoryChatBackend::new();
        backend.insert_conversation("c1", "T", vec![]);

        backend
            .send_follow_up("c1", Message::user("question"))
            .await
            .unwrap();

        assert_eq!(backend.conversation_messages("c1").unwrap().len(), 1);
        assert!(backend.is_streaming("c1"));
    }

    #[tokio::test]
    async fn test_send_follow_up_unknown_conversation() {
        let backend = InMemoryChatBackend::new();
        let err = backend
            .send_follow_up("missing", Message::user("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ConversationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_subscription_publishes_updates() {
        let backend = InMemoryChatBackend::new();
        backend.insert_conversation("c1", "T", vec![]);

        let mut rx = backend.subscribe("c1");
        assert!(matches!(&*rx.borrow(), MessageSnapshot::Ready(m) if m.is_empty()));

        backend
            .send_follow_up("c1", Message::user("hello"))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(matches!(&*rx.borrow(), MessageSnapshot::Ready(m) if m.len() == 1));
    }

    #[tokio::test]
    async fn test_subscribe_before_creation_is_loading() {
        let backend = InMemoryChatBackend::new();
        let rx = backend.subscribe("later");
        assert!(rx.borrow().is_loading());
    }

    #[tokio::test]
    async fn test_edit_truncates_later_messages() {
        let backend = InMemoryChatBackend::new();
        let user = Message::user("original");
        let user_id = user.id.clone();
        let mut reply = Message::new(Role::Assistant, "reply");
        reply.metadata.finish_reason = Some("stop".to_string());
        backend.insert_conversation("c1", "T", vec![user, reply]);

        backend
            .edit_message("c1", &user_id, "edited".to_string())
            .await
            .unwrap();

        let messages = backend.conversation_messages("c1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "edited");
    }

    #[tokio::test]
    async fn test_retry_targets() {
        let backend = InMemoryChatBackend::new();
        let user = Message::user("q");
        let user_id = user.id.clone();
        let reply = Message::new(Role::Assistant, "a");
        let reply_id = reply.id.clone();
        backend.insert_conversation("c1", "T", vec![user.clone(), reply.clone()]);

        backend
            .retry_from_message("c1", &reply_id, RetryTarget::Assistant)
            .await
            .unwrap();
        assert_eq!(backend.conversation_messages("c1").unwrap().len(), 1);

        backend.insert_conversation("c2", "T", vec![user, reply]);
        backend
            .retry_from_message("c2", &user_id, RetryTarget::User)
            .await
            .unwrap();
        assert_eq!(backend.conversation_messages("c2").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_marks_streaming_message() {
        let backend = InMemoryChatBackend::new();
        let partial = Message::new(Role::Assistant, "partial");
        backend.insert_conversation("c1", "T", vec![partial]);
        backend.resume_conversation("c1").await.unwrap();

        backend.stop_generation("c1").await.unwrap();

        assert!(!backend.is_streaming("c1"));
        let messages = backend.conversation_messages("c1").unwrap();
        assert!(messages[0].metadata.stopped);
    }

    #[tokio::test]
    async fn test_delete_conversation() {
        let backend = InMemoryChatBackend::new();
        backend.insert_conversation("c1", "T", vec![Message::user("x")]);
        backend.delete_conversation("c1").await.unwrap();
        assert!(!backend.contains("c1"));

        let err = backend.delete_conversation("c1").await.unwrap_err();
        assert!(matches!(err, BackendError::ConversationNotFound { .. }));
    }
}
