use std::sync::Arc;

use tracing::{debug, warn};

use super::{StrategyContext, classify_backend_error};
use crate::backend::RetryTarget;
use crate::error::{ChatError, ChatResult};
use crate::models::Message;

/// Strategy for conversations whose identity and messages live in durable
/// storage. Every operation is forwarded to the backing store's write
/// path; the authoritative subscription reflects the result.
pub struct PersistedStrategy {
    ctx: Arc<StrategyContext>,
    conversation_id: String,
    /// Latest authoritative messages, captured at selection time. Used for
    /// the last-visible-message delete decision.
    snapshot: Vec<Message>,
}

impl PersistedStrategy {
    pub fn new(ctx: Arc<StrategyContext>, conversation_id: String, snapshot: Vec<Message>) -> Self {
        Self {
            ctx,
            conversation_id,
            snapshot,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn send_message(&self, message: Message) -> ChatResult<()> {
        self.ctx.machine.lock().send_message(message.id.clone());

        self.ctx
            .backend
            .send_follow_up(&self.conversation_id, message)
            .await
            .map_err(|err| {
                let err = classify_backend_error(err);
                self.ctx.machine.lock().set_error(err.to_string(), true);
                self.ctx.report(err)
            })
    }

    pub async fn edit_message(&self, message_id: &str, new_content: &str) -> ChatResult<()> {
        self.ctx
            .backend
            .edit_message(&self.conversation_id, message_id, new_content.to_string())
            .await
            .map_err(|err| self.ctx.report(classify_backend_error(err)))
    }

    pub async fn retry_from_message(
        &self,
        message_id: &str,
        target: RetryTarget,
    ) -> ChatResult<()> {
        self.ctx
            .backend
            .retry_from_message(&self.conversation_id, message_id, target)
            .await
            .map_err(|err| self.ctx.report(classify_backend_error(err)))
    }

    /// Delete a message, or the whole conversation when the target is the
    /// last visible message. Navigation happens *before* the delete so the
    /// caller never renders a just-removed conversation.
    pub async fn delete_message(&self, message_id: &str) -> ChatResult<()> {
        let visible: Vec<&Message> = self.snapshot.iter().filter(|m| m.is_visible()).collect();
        let deletes_conversation = visible.len() == 1 && visible[0].id == message_id;

        if deletes_conversation {
            self.ctx.navigator.leave_conversation(&self.conversation_id);
            self.ctx
                .backend
                .delete_conversation(&self.conversation_id)
                .await
                .map_err(|err| self.ctx.report(classify_backend_error(err)))
        } else {
            self.ctx
                .backend
                .delete_message(&self.conversation_id, message_id)
                .await
                .map_err(|err| self.ctx.report(classify_backend_error(err)))
        }
    }

    /// Flip local generation state to non-generating synchronously with the
    /// user's intent, then confirm with the backend. A rejected
    /// confirmation rolls the optimistic flip back.
    pub async fn stop_generation(&self) -> ChatResult<()> {
        let previous = {
            let mut machine = self.ctx.machine.lock();
            let previous = machine.status();
            machine.stop_generation();
            previous
        };

        match self
            .ctx
            .backend
            .stop_generation(&self.conversation_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.ctx.machine.lock().force_status(previous);
                Err(self.ctx.report(classify_backend_error(err)))
            }
        }
    }

    pub async fn save_conversation(&self) -> ChatResult<Option<String>> {
        debug!(conversation = %self.conversation_id, "already persisted, save is a no-op");
        Ok(None)
    }

    /// Resume failures are not notified here; the coordinator degrades to
    /// "not attempted" so a later natural retrigger can try again.
    pub async fn resume(&self) -> ChatResult<()> {
        self.ctx
            .backend
            .resume_conversation(&self.conversation_id)
            .await
            .map_err(|err| {
                warn!(conversation = %self.conversation_id, error = %err, "resume attempt failed");
                ChatError::ResumeFailed {
                    message: err.to_string(),
                }
            })
    }
}
