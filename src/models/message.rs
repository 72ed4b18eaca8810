use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachment::Attachment;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Context,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Context => "context",
        }
    }
}

/// Write-confirmation status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Error,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

fn default_main_branch() -> bool {
    true
}

/// A single message within a conversation.
///
/// Within a conversation, messages are ordered by `created_at` (Unix
/// milliseconds); ties break by insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    pub created_at: i64,
    /// Branch/retry lineage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default = "default_main_branch")]
    pub is_main_branch: bool,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            reasoning: None,
            attachments: Vec::new(),
            citations: Vec::new(),
            created_at: Utc::now().timestamp_millis(),
            parent_id: None,
            is_main_branch: true,
            metadata: MessageMetadata::default(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant placeholder about to receive streamed content.
    pub fn assistant_pending() -> Self {
        let mut message = Self::new(Role::Assistant, "");
        message.metadata.status = Some(MessageStatus::Pending);
        message
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// A message is streaming iff it is an assistant message with no finish
    /// reason and not stopped.
    pub fn is_streaming(&self) -> bool {
        self.role == Role::Assistant
            && self.metadata.finish_reason.is_none()
            && !self.metadata.stopped
    }

    /// Content-based identity used to retire optimistic messages once the
    /// authoritative copy appears. Intentionally not id-based: the
    /// authoritative id is unknown until the write confirms.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.role.as_str(), self.content)
    }

    /// Visible messages count toward the "deleting the last message deletes
    /// the conversation" rule. System messages and empty assistant shells
    /// (no content, no reasoning) are not visible.
    pub fn is_visible(&self) -> bool {
        match self.role {
            Role::System => false,
            Role::Assistant => {
                !self.content.is_empty()
                    || self.reasoning.as_ref().is_some_and(|r| !r.is_empty())
            }
            _ => true,
        }
    }
}
