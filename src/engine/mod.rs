pub mod chat_engine;
pub mod resume_coordinator;

pub use chat_engine::{ChatEngine, EngineCollaborators};
pub use resume_coordinator::ResumeCoordinator;
