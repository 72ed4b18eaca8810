use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Text,
    Image,
    Pdf,
}

/// A prepared file attachment.
///
/// Exactly one content representation is meaningful at a time: inline
/// `content` (UTF-8 text for `Text`, base64 otherwise) paired with
/// `mime_type`, or a durable `storage_id`. Once a durable reference exists
/// the inline content must not reach the write path again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    /// Text extracted from a PDF, carried alongside whichever content
    /// representation is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

impl Attachment {
    pub fn inline(
        kind: AttachmentKind,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            size,
            mime_type: Some(mime_type.into()),
            content: Some(content.into()),
            storage_id: None,
            extracted_text: None,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.storage_id.is_some()
    }

    pub fn has_inline_content(&self) -> bool {
        self.content.is_some()
    }

    /// Rewrite inline content as a `data:` URI. Text content is base64
    /// encoded first; image/PDF content is already base64.
    pub fn into_inline_data_uri(mut self) -> Self {
        use base64::Engine as _;
        use base64::engine::general_purpose::STANDARD;

        let Some(content) = self.content.take() else {
            return self;
        };
        if content.starts_with("data:") {
            self.content = Some(content);
            return self;
        }

        let mime = self
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let payload = match self.kind {
            AttachmentKind::Text => STANDARD.encode(content.as_bytes()),
            AttachmentKind::Image | AttachmentKind::Pdf => content,
        };
        self.content = Some(format!("data:{};base64,{}", mime, payload));
        self
    }

    /// Drop inline content once a durable reference exists, so it is never
    /// re-sent to the write path.
    pub fn into_durable(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self.content = None;
        self
    }
}
