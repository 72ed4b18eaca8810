pub mod attachment;
pub mod error_store;
pub mod generation;
pub mod message;
pub mod message_store;

pub use attachment::{Attachment, AttachmentKind};
pub use error_store::{ErrorEntry, ErrorLevel, ErrorStore};
pub use generation::{GenerationState, GenerationStatus, MessageStateMachine};
pub use message::{Message, MessageMetadata, MessageStatus, Role};
pub use message_store::{
    ConversationMessageStore, MAX_PENDING, find_streaming_message, is_message_streaming,
};
