use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::resume_coordinator::ResumeCoordinator;
use crate::backend::{
    ChatBackend, CredentialResolver, FileStore, MessageSnapshot, Navigator, Notifier, RetryTarget,
};
use crate::error::{ChatError, ChatResult};
use crate::models::{
    Attachment, ConversationMessageStore, GenerationState, GenerationStatus, Message,
    MessageStateMachine, find_streaming_message, is_message_streaming,
};
use crate::services::attachment_pipeline::{self, AttachmentMode};
use crate::services::model_client::{ModelClient, ModelDescriptor};
use crate::strategies::{ChatStrategy, OnError, StrategyContext};

/// Lifetime of the cosmetic "transitioning" flag. Purely visual; clears
/// regardless of outcome.
const TRANSITION_DEBOUNCE: Duration = Duration::from_millis(300);

/// External collaborators the engine consumes but never implements.
pub struct EngineCollaborators {
    pub backend: Arc<dyn ChatBackend>,
    pub file_store: Arc<dyn FileStore>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub model_client: Arc<dyn ModelClient>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
    pub on_error: OnError,
}

/// One engine instance per open conversation view.
///
/// Owns the merged message view, the generation state machine, the
/// optimistic pending set and the resume coordinator. Callers interact only
/// through these operations; authoritative snapshots are pushed in via
/// [`handle_snapshot`](Self::handle_snapshot).
pub struct ChatEngine {
    ctx: Arc<StrategyContext>,
    store: Mutex<ConversationMessageStore>,
    resume: Arc<ResumeCoordinator>,
    conversation_id: Mutex<Option<String>>,
    latest: Mutex<MessageSnapshot>,
    /// Message array for ephemeral (not yet persisted) conversations.
    local: Arc<Mutex<Vec<Message>>>,
    model: Mutex<Option<ModelDescriptor>>,
    cancel_flag: Arc<AtomicBool>,
    transitioning: Arc<AtomicBool>,
}

impl ChatEngine {
    pub fn new(collaborators: EngineCollaborators) -> Self {
        let ctx = Arc::new(StrategyContext {
            backend: collaborators.backend,
            file_store: collaborators.file_store,
            credentials: collaborators.credentials,
            model_client: collaborators.model_client,
            navigator: collaborators.navigator,
            notifier: collaborators.notifier,
            on_error: collaborators.on_error,
            machine: Arc::new(Mutex::new(MessageStateMachine::new())),
        });

        Self {
            ctx,
            store: Mutex::new(ConversationMessageStore::new()),
            resume: Arc::new(ResumeCoordinator::new()),
            conversation_id: Mutex::new(None),
            latest: Mutex::new(MessageSnapshot::Skip),
            local: Arc::new(Mutex::new(Vec::new())),
            model: Mutex::new(None),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            transitioning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_model(&self, model: Option<ModelDescriptor>) {
        *self.model.lock() = model;
    }

    /// Switch the authoritative source context. Clears optimistic state so
    /// pending entries never leak across conversations.
    pub fn set_conversation(&self, conversation_id: Option<String>) {
        {
            let mut current = self.conversation_id.lock();
            if *current == conversation_id {
                return;
            }
            *current = conversation_id.clone();
        }

        // Abandon any in-flight ephemeral stream for the old context.
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.store.lock().clear_optimistic();
        self.ctx.machine.lock().reset();
        *self.latest.lock() = match conversation_id {
            Some(_) => MessageSnapshot::Loading,
            None => MessageSnapshot::Skip,
        };
        self.begin_transition();
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id.lock().clone()
    }

    /// Subscription handle for the current conversation, if any. The owner
    /// forwards each received snapshot to [`handle_snapshot`](Self::handle_snapshot).
    pub fn subscribe(&self) -> Option<watch::Receiver<MessageSnapshot>> {
        self.conversation_id
            .lock()
            .as_deref()
            .map(|id| self.ctx.backend.subscribe(id))
    }

    /// Entry point for the push-based authoritative subscription. Retires
    /// confirmed optimistic entries, syncs the state machine with what the
    /// backend reports, and triggers at most one resume per conversation.
    pub async fn handle_snapshot(&self, snapshot: MessageSnapshot, streaming_hint: bool) {
        *self.latest.lock() = snapshot.clone();

        let conversation_id = self.conversation_id.lock().clone();
        let (Some(conversation_id), MessageSnapshot::Ready(messages)) =
            (conversation_id, snapshot)
        else {
            return;
        };

        self.store.lock().retire_confirmed(&messages);
        self.sync_machine(&messages);

        if self
            .resume
            .should_attempt(&conversation_id, &messages, streaming_hint)
        {
            let strategy = self.strategy();
            if let Err(err) = strategy.resume().await {
                // Documented degradation: a failed resume re-arms the
                // coordinator for a later natural retrigger.
                warn!(conversation = %conversation_id, error = %err, "resume attempt failed");
                self.resume.mark_failed(&conversation_id);
            }
        }
    }

    /// The merged, ordered, de-duplicated message list.
    pub fn messages(&self) -> Vec<Message> {
        if self.conversation_id.lock().is_some() {
            let latest = self.latest.lock();
            self.store.lock().merge(latest.messages())
        } else {
            self.local.lock().clone()
        }
    }

    pub fn is_loading_messages(&self) -> bool {
        self.conversation_id.lock().is_some() && self.latest.lock().is_loading()
    }

    pub fn is_streaming(&self) -> bool {
        if self.ctx.machine.lock().is_active() {
            return true;
        }
        self.latest
            .lock()
            .messages()
            .is_some_and(|messages| find_streaming_message(messages).is_some())
    }

    /// Two-tier per-message check combining the backend's view with the
    /// caller-supplied generation intent.
    pub fn is_message_streaming(&self, message_id: &str, is_generating: bool) -> bool {
        is_message_streaming(&self.messages(), message_id, is_generating)
    }

    pub fn generation(&self) -> GenerationState {
        self.ctx.machine.lock().state().clone()
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning.load(Ordering::Relaxed)
    }

    pub async fn send_message(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> ChatResult<()> {
        let content = content.into();
        let strategy = self.strategy();

        // Validation short-circuits before any network call.
        if !strategy.is_usable() {
            return Err(ChatError::ModelNotSelected);
        }
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mode = match &strategy {
            ChatStrategy::Ephemeral(_) => AttachmentMode::Inline,
            _ => AttachmentMode::Durable,
        };
        let outcome =
            attachment_pipeline::materialize(attachments, mode, self.ctx.file_store.as_ref())
                .await;
        for failure in &outcome.failures {
            self.ctx.report(failure.clone());
        }

        let message = Message::user(content).with_attachments(outcome.attachments);

        if matches!(&strategy, ChatStrategy::Persisted(_)) {
            self.store.lock().add_optimistic(message.clone());
        }

        let message_id = message.id.clone();
        strategy.send_message(message).await.inspect_err(|_| {
            self.store.lock().remove_optimistic(&message_id);
        })
    }

    pub async fn edit_message(&self, message_id: &str, new_content: &str) -> ChatResult<()> {
        self.strategy().edit_message(message_id, new_content).await
    }

    pub async fn retry_user_message(&self, message_id: &str) -> ChatResult<()> {
        self.strategy()
            .retry_from_message(message_id, RetryTarget::User)
            .await
    }

    pub async fn retry_assistant_message(&self, message_id: &str) -> ChatResult<()> {
        self.strategy()
            .retry_from_message(message_id, RetryTarget::Assistant)
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> ChatResult<()> {
        self.strategy().delete_message(message_id).await
    }

    pub async fn stop_generation(&self) -> ChatResult<()> {
        self.strategy().stop_generation().await
    }

    /// Promote an ephemeral conversation to durable storage. On success the
    /// engine re-targets the newly assigned conversation id.
    pub async fn save_conversation(&self, title: Option<String>) -> ChatResult<Option<String>> {
        let saved = self.strategy().save_conversation(title).await?;
        if let Some(id) = &saved {
            debug!(conversation = %id, "conversation saved, switching to persisted mode");
            self.set_conversation(Some(id.clone()));
        }
        Ok(saved)
    }

    pub fn add_optimistic_message(&self, message: Message) {
        self.store.lock().add_optimistic(message);
    }

    pub fn clear_optimistic_messages(&self) {
        self.store.lock().clear_optimistic();
    }

    /// Build the strategy for the current cycle by explicit rule:
    /// conversation id → persisted; model available → ephemeral; otherwise
    /// unusable.
    fn strategy(&self) -> ChatStrategy {
        let conversation_id = self.conversation_id.lock().clone();
        let snapshot = self
            .latest
            .lock()
            .messages()
            .map(|m| m.to_vec())
            .unwrap_or_default();
        let model = self.model.lock().clone();
        ChatStrategy::select(
            self.ctx.clone(),
            conversation_id,
            snapshot,
            model,
            self.local.clone(),
            self.cancel_flag.clone(),
        )
    }

    /// Keep the state machine consistent with server-side generation
    /// progress observed through snapshots.
    fn sync_machine(&self, messages: &[Message]) {
        let mut machine = self.ctx.machine.lock();
        if let Some(streaming) = find_streaming_message(messages) {
            if machine.status() == GenerationStatus::Sending {
                machine.start_streaming(streaming.id.clone());
            }
        } else if machine.is_active() {
            machine.reset();
        }
    }

    fn begin_transition(&self) {
        self.transitioning.store(true, Ordering::Relaxed);
        let flag = self.transitioning.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(TRANSITION_DEBOUNCE).await;
                    flag.store(false, Ordering::Relaxed);
                });
            }
            Err(_) => flag.store(false, Ordering::Relaxed),
        }
    }
}
