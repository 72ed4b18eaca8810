pub mod chat_backend;
pub mod collaborators;
pub mod error;
pub mod in_memory_backend;

pub use chat_backend::{BoxFuture, ChatBackend, MessageSnapshot, RetryTarget};
pub use collaborators::{CredentialResolver, FileStore, Navigator, NoticeLevel, Notifier};
pub use error::{BackendError, BackendResult};
pub use in_memory_backend::InMemoryChatBackend;
