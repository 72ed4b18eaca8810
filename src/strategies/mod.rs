pub mod ephemeral;
pub mod persisted;

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use regex::Regex;
use tracing::error;

use crate::backend::{
    BackendError, ChatBackend, CredentialResolver, FileStore, Navigator, NoticeLevel, Notifier,
    RetryTarget,
};
use crate::error::{ChatError, ChatResult};
use crate::models::{Message, MessageStateMachine};
use crate::services::model_client::{ModelClient, ModelDescriptor};

pub use ephemeral::EphemeralStrategy;
pub use persisted::PersistedStrategy;

/// Upstream failure callback, e.g. for clearing optimistic state.
pub type OnError = Arc<dyn Fn(&ChatError) + Send + Sync>;

/// Collaborator handles shared by both strategies.
pub struct StrategyContext {
    pub backend: Arc<dyn ChatBackend>,
    pub file_store: Arc<dyn FileStore>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub model_client: Arc<dyn ModelClient>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
    pub on_error: OnError,
    pub machine: Arc<Mutex<MessageStateMachine>>,
}

impl StrategyContext {
    /// Convert a failure into a user-facing notification plus the upstream
    /// error callback, then hand it back for propagation. Never swallows.
    pub(crate) fn report(&self, err: ChatError) -> ChatError {
        error!(error = %err, "chat operation failed");
        self.notifier.notify(NoticeLevel::Error, &err.to_string());
        (self.on_error)(&err);
        err
    }
}

static LIMIT_RE: OnceLock<Regex> = OnceLock::new();

fn limit_re() -> &'static Regex {
    LIMIT_RE.get_or_init(|| Regex::new(r"(?i)limit of (\d+)").expect("valid regex literal"))
}

/// Classify a backend rejection into the user-facing taxonomy. Quota
/// rejections carry the parsed numeric limit for display.
pub(crate) fn classify_backend_error(err: BackendError) -> ChatError {
    match err {
        BackendError::ConversationNotFound { .. } => ChatError::ConversationNotFound,
        BackendError::Rejected { message } => {
            let limit = limit_re()
                .captures(&message)
                .and_then(|caps| caps[1].parse::<u32>().ok());
            match limit {
                Some(limit) => ChatError::MessageLimitReached { limit },
                None => ChatError::WriteFailed { message },
            }
        }
        other => ChatError::WriteFailed {
            message: other.to_string(),
        },
    }
}

/// How send/edit/retry/delete/stop/save are actually carried out.
///
/// Exactly three cases, selected once per update cycle by explicit rule:
/// a conversation id selects `Persisted`; otherwise a fully
/// capability-described model selects `Ephemeral`; otherwise every
/// operation fails with `ModelNotSelected` (`Unusable`).
pub enum ChatStrategy {
    Persisted(PersistedStrategy),
    Ephemeral(EphemeralStrategy),
    Unusable,
}

impl ChatStrategy {
    pub fn select(
        ctx: Arc<StrategyContext>,
        conversation_id: Option<String>,
        snapshot: Vec<Message>,
        model: Option<ModelDescriptor>,
        local: Arc<Mutex<Vec<Message>>>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        match (conversation_id, model) {
            (Some(id), _) => ChatStrategy::Persisted(PersistedStrategy::new(ctx, id, snapshot)),
            (None, Some(model)) => {
                ChatStrategy::Ephemeral(EphemeralStrategy::new(ctx, model, local, cancel_flag))
            }
            (None, None) => ChatStrategy::Unusable,
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, ChatStrategy::Unusable)
    }

    pub async fn send_message(&self, message: Message) -> ChatResult<()> {
        match self {
            ChatStrategy::Persisted(s) => s.send_message(message).await,
            ChatStrategy::Ephemeral(s) => s.send_message(message).await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }

    pub async fn edit_message(&self, message_id: &str, new_content: &str) -> ChatResult<()> {
        match self {
            ChatStrategy::Persisted(s) => s.edit_message(message_id, new_content).await,
            ChatStrategy::Ephemeral(s) => s.edit_message(message_id, new_content).await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }

    pub async fn retry_from_message(
        &self,
        message_id: &str,
        target: RetryTarget,
    ) -> ChatResult<()> {
        match self {
            ChatStrategy::Persisted(s) => s.retry_from_message(message_id, target).await,
            ChatStrategy::Ephemeral(s) => s.retry_from_message(message_id, target).await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }

    pub async fn delete_message(&self, message_id: &str) -> ChatResult<()> {
        match self {
            ChatStrategy::Persisted(s) => s.delete_message(message_id).await,
            ChatStrategy::Ephemeral(s) => s.delete_message(message_id).await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }

    pub async fn stop_generation(&self) -> ChatResult<()> {
        match self {
            ChatStrategy::Persisted(s) => s.stop_generation().await,
            ChatStrategy::Ephemeral(s) => s.stop_generation().await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }

    /// Promote to durable storage. Only meaningful for ephemeral
    /// conversations; returns the assigned conversation id.
    pub async fn save_conversation(&self, title: Option<String>) -> ChatResult<Option<String>> {
        match self {
            ChatStrategy::Persisted(s) => s.save_conversation().await,
            ChatStrategy::Ephemeral(s) => s.save_conversation(title).await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }

    pub async fn resume(&self) -> ChatResult<()> {
        match self {
            ChatStrategy::Persisted(s) => s.resume().await,
            ChatStrategy::Ephemeral(s) => s.resume().await,
            ChatStrategy::Unusable => Err(ChatError::ModelNotSelected),
        }
    }
}
