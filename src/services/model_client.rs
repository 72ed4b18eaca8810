use anyhow::Result;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::backend::BoxFuture;
use crate::models::Message;

/// Stream chunks emitted during assistant responses
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Reasoning(String),
    Done { finish_reason: Option<String> },
    Error(String),
}

/// Type alias for response streams
pub type ResponseStream = BoxStream<'static, Result<StreamChunk>>;

/// Capability description of the currently selected model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
    pub context_length: u32,
    pub supports_images: bool,
    pub supports_pdf: bool,
}

impl ModelDescriptor {
    pub fn supports_mime(&self, mime_type: &str) -> bool {
        if mime_type.starts_with("text/") || mime_type == "application/json" {
            return true;
        }
        if mime_type.starts_with("image/") {
            return self.supports_images;
        }
        if mime_type == "application/pdf" {
            return self.supports_pdf;
        }
        false
    }
}

/// Direct model access for conversations that live only in client memory.
/// The wire protocol behind it is out of scope; implementations adapt a
/// provider SDK or HTTP client.
pub trait ModelClient: Send + Sync + 'static {
    /// Stream an assistant turn for the given history.
    fn stream_chat(
        &self,
        model: &ModelDescriptor,
        api_key: &str,
        history: Vec<Message>,
    ) -> ResponseStream;

    /// One-shot, non-streaming completion (title generation).
    fn complete(
        &self,
        model: &ModelDescriptor,
        api_key: &str,
        prompt: String,
    ) -> BoxFuture<'static, Result<String>>;
}
