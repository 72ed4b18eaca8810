use super::chat_backend::BoxFuture;
use super::error::BackendResult;
use crate::models::Attachment;

/// Durable file storage. `upload` consumes an inline attachment and returns
/// the same attachment carrying a durable reference.
pub trait FileStore: Send + Sync + 'static {
    fn upload(&self, attachment: Attachment) -> BoxFuture<'static, BackendResult<Attachment>>;
}

/// Resolves a decrypted API credential for a provider/model pair. Used only
/// by the ephemeral strategy; `None` means no usable key is configured.
pub trait CredentialResolver: Send + Sync + 'static {
    fn get_decrypted_key(&self, provider: &str, model_id: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible toast/notification sink.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Navigation side effects outside the engine's responsibility. The caller
/// must be moved away from a conversation *before* the conversation row is
/// deleted, to avoid a flash of "conversation not found".
pub trait Navigator: Send + Sync + 'static {
    fn leave_conversation(&self, conversation_id: &str);
}
