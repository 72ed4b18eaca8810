use anyhow::{Result, anyhow};
use tracing::debug;

use crate::models::{Message, Role};
use crate::services::model_client::{ModelClient, ModelDescriptor};

/// Truncate text to max length
fn truncate_text(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

/// Clean and validate a generated title
fn clean_title(raw_title: &str) -> String {
    let cleaned = raw_title
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .lines()
        .next()
        .unwrap_or("New Chat")
        .to_string();

    if cleaned.len() > 100 {
        format!("{}...", &cleaned[..97])
    } else if cleaned.is_empty() {
        "New Chat".to_string()
    } else {
        cleaned
    }
}

/// Fallback when generation fails or no assistant reply exists yet: an
/// excerpt of the first user message.
pub fn fallback_title(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.is_empty())
        .map(|m| clean_title(&truncate_text(&m.content, 60)))
        .unwrap_or_else(|| "New Chat".to_string())
}

/// Generate a concise conversation title from the first user/assistant
/// exchange.
///
/// # Errors
/// Returns an error if no user message exists or the model call fails.
/// Callers degrade gracefully to [`fallback_title`].
pub async fn generate_title(
    client: &dyn ModelClient,
    model: &ModelDescriptor,
    api_key: &str,
    messages: &[Message],
) -> Result<String> {
    let user_text = messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.is_empty())
        .map(|m| m.content.clone())
        .ok_or_else(|| anyhow!("title generation requires at least one user message"))?;

    let assistant_text = messages
        .iter()
        .find(|m| m.role == Role::Assistant && !m.content.is_empty())
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let title_prompt = format!(
        "Generate a concise, descriptive title (3-7 words) for this conversation. \
        Output ONLY the title, no quotes, no explanation.\n\n\
        User: {}\n\nAssistant: {}",
        truncate_text(&user_text, 500),
        truncate_text(&assistant_text, 500)
    );

    let response_text = client.complete(model, api_key, title_prompt).await?;
    let title = clean_title(&response_text);
    debug!(title = %title, "generated conversation title");

    Ok(title)
}
