//! Client-side chat synchronization and streaming engine.
//!
//! Keeps a conversation's message list consistent while an assistant reply
//! is generated, across reloads, network interruptions and two backing
//! modes: durable (server-persisted) and ephemeral (local-only until an
//! explicit save). The engine reconciles user actions, local optimistic
//! updates and server-confirmed state without duplicate or stale messages,
//! with cancellation, retry and exactly-once resume semantics.
//!
//! Entry point: [`ChatEngine`]. The embedding application supplies the
//! collaborators in [`EngineCollaborators`] (backing store, file storage,
//! credentials, model client, navigation, notifications) and forwards each
//! authoritative snapshot to [`ChatEngine::handle_snapshot`].

pub mod backend;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod strategies;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{ChatEngine, EngineCollaborators, ResumeCoordinator};
pub use error::{ChatError, ChatResult};
pub use models::{
    Attachment, AttachmentKind, ConversationMessageStore, GenerationState, GenerationStatus,
    Message, MessageMetadata, MessageStateMachine, MessageStatus, Role,
};
pub use services::model_client::{ModelClient, ModelDescriptor, ResponseStream, StreamChunk};
pub use strategies::{ChatStrategy, EphemeralStrategy, PersistedStrategy};
