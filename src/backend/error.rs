use thiserror::Error;

/// Errors surfaced by the backing store's write path.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    /// Generic rejection. The message text may carry a numeric quota limit
    /// ("message limit of N reached") which the strategy layer parses out.
    #[error("Write rejected: {message}")]
    Rejected { message: String },
}

pub type BackendResult<T> = Result<T, BackendError>;
