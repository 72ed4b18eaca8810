use thiserror::Error;

/// User-facing engine errors.
///
/// Validation errors (`ModelNotSelected`, `EmptyMessage`) are raised before
/// any network call. Everything else is classified at the strategy boundary
/// from a [`BackendError`](crate::backend::BackendError) or an upload result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("No model selected")]
    ModelNotSelected,

    #[error("Conversation not found")]
    ConversationNotFound,

    /// Monthly/anonymous quota exhausted. Carries the parsed numeric limit
    /// for display; not retryable until the quota resets.
    #[error("Message limit of {limit} reached")]
    MessageLimitReached { limit: u32 },

    /// Upload failure for a single attachment. `recoverable` is decided
    /// purely by file size relative to the inline-fallback threshold.
    #[error("Upload failed for '{name}'")]
    UploadFailed { name: String, recoverable: bool },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Resume failed: {message}")]
    ResumeFailed { message: String },

    #[error("Message has no content or attachments")]
    EmptyMessage,
}

pub type ChatResult<T> = Result<T, ChatError>;
