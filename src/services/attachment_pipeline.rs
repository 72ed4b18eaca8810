use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::backend::FileStore;
use crate::error::ChatError;
use crate::models::{Attachment, AttachmentKind};
use crate::services::model_client::ModelDescriptor;

/// Ceiling for generic (non-PDF) attachments.
pub const MAX_ATTACHMENT_SIZE: u64 = 5_242_880; // 5MB
/// PDFs get a larger ceiling; their text is extracted at send time.
pub const MAX_PDF_SIZE: u64 = 10_485_760; // 10MB
/// Upload failures at or below this size fall back silently to the inline
/// attachment; above it the failure is fatal for that file.
pub const UPLOAD_FALLBACK_MAX: u64 = 1_048_576; // 1MB

const JPEG_QUALITY: u8 = 80;

/// A user-selected file before classification.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Structured per-file rejection reason; rejection of one file never stops
/// the remaining files from being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TooLarge { size: u64, max: u64 },
    UnsupportedType { mime_type: String },
    UnsupportedByModel { mime_type: String },
    NoModelSelected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRejection {
    pub name: String,
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct PrepareOutcome {
    pub accepted: Vec<Attachment>,
    pub rejected: Vec<AttachmentRejection>,
}

/// Whether attachment content stays inline or is uploaded to durable
/// storage before send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentMode {
    /// Privacy mode: content becomes a `data:` URI, never uploaded.
    Inline,
    /// Content is uploaded and replaced by a durable reference.
    Durable,
}

#[derive(Debug, Default)]
pub struct MaterializeOutcome {
    pub attachments: Vec<Attachment>,
    /// Fatal per-file upload failures (size above the fallback threshold).
    pub failures: Vec<ChatError>,
}

/// Classify and validate raw files against the selected model.
pub fn prepare(files: Vec<RawFile>, model: Option<&ModelDescriptor>) -> PrepareOutcome {
    let mut outcome = PrepareOutcome::default();

    for file in files {
        let Some(model) = model else {
            outcome.rejected.push(AttachmentRejection {
                name: file.name,
                reason: RejectReason::NoModelSelected,
            });
            continue;
        };

        let Some(kind) = classify(&file.mime_type) else {
            outcome.rejected.push(AttachmentRejection {
                name: file.name,
                reason: RejectReason::UnsupportedType {
                    mime_type: file.mime_type,
                },
            });
            continue;
        };

        let max = match kind {
            AttachmentKind::Pdf => MAX_PDF_SIZE,
            _ => MAX_ATTACHMENT_SIZE,
        };
        let size = file.bytes.len() as u64;
        if size > max {
            outcome.rejected.push(AttachmentRejection {
                name: file.name,
                reason: RejectReason::TooLarge { size, max },
            });
            continue;
        }

        if !model.supports_mime(&file.mime_type) {
            outcome.rejected.push(AttachmentRejection {
                name: file.name,
                reason: RejectReason::UnsupportedByModel {
                    mime_type: file.mime_type,
                },
            });
            continue;
        }

        outcome.accepted.push(build_attachment(kind, file, size));
    }

    outcome
}

fn classify(mime_type: &str) -> Option<AttachmentKind> {
    if mime_type.starts_with("text/") || mime_type == "application/json" {
        Some(AttachmentKind::Text)
    } else if mime_type == "application/pdf" {
        Some(AttachmentKind::Pdf)
    } else if mime_type.starts_with("image/") {
        Some(AttachmentKind::Image)
    } else {
        None
    }
}

fn build_attachment(kind: AttachmentKind, file: RawFile, size: u64) -> Attachment {
    match kind {
        AttachmentKind::Text => Attachment::inline(
            kind,
            file.name,
            size,
            file.mime_type,
            String::from_utf8_lossy(&file.bytes).into_owned(),
        ),
        // Text extraction is deferred to send time; only the bytes travel.
        AttachmentKind::Pdf => Attachment::inline(
            kind,
            file.name,
            size,
            file.mime_type,
            STANDARD.encode(&file.bytes),
        ),
        AttachmentKind::Image => match reencode_image(&file.bytes) {
            Some(jpeg) => Attachment::inline(
                kind,
                file.name,
                size,
                "image/jpeg",
                STANDARD.encode(&jpeg),
            ),
            None => {
                warn!(name = %file.name, "image re-encode failed, keeping original bytes");
                Attachment::inline(
                    kind,
                    file.name,
                    size,
                    file.mime_type,
                    STANDARD.encode(&file.bytes),
                )
            }
        },
    }
}

/// Best-effort re-encode to a compact JPEG.
fn reencode_image(bytes: &[u8]) -> Option<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).ok()?;
    // JPEG has no alpha channel.
    let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).ok()?;
    Some(buf)
}

/// Resolve each attachment's final content representation for the given
/// mode. Text-type and already-durable attachments pass through unchanged
/// in both modes.
pub async fn materialize(
    attachments: Vec<Attachment>,
    mode: AttachmentMode,
    file_store: &dyn FileStore,
) -> MaterializeOutcome {
    let mut outcome = MaterializeOutcome::default();

    for attachment in attachments {
        if attachment.is_durable() {
            outcome.attachments.push(attachment);
            continue;
        }

        match mode {
            AttachmentMode::Inline => {
                if attachment.has_inline_content() {
                    outcome.attachments.push(attachment.into_inline_data_uri());
                } else {
                    outcome.attachments.push(attachment);
                }
            }
            AttachmentMode::Durable => {
                if attachment.kind == AttachmentKind::Text || !attachment.has_inline_content() {
                    outcome.attachments.push(attachment);
                    continue;
                }

                let extracted_text = attachment.extracted_text.clone();
                let name = attachment.name.clone();
                let size = attachment.size;
                match file_store.upload(attachment.clone()).await {
                    Ok(mut uploaded) => {
                        if uploaded.is_durable() {
                            // Inline content must not reach the write path
                            // once a durable reference exists.
                            uploaded.content = None;
                        }
                        if uploaded.kind == AttachmentKind::Pdf
                            && uploaded.extracted_text.is_none()
                        {
                            uploaded.extracted_text = extracted_text;
                        }
                        outcome.attachments.push(uploaded);
                    }
                    Err(err) if size <= UPLOAD_FALLBACK_MAX => {
                        debug!(name = %name, error = %err, "upload failed, keeping inline attachment");
                        outcome.attachments.push(attachment);
                    }
                    Err(err) => {
                        warn!(name = %name, error = %err, "upload failed for oversized attachment");
                        outcome.failures.push(ChatError::UploadFailed {
                            name,
                            recoverable: false,
                        });
                    }
                }
            }
        }
    }

    outcome
}
