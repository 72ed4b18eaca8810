use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{StrategyContext, classify_backend_error};
use crate::backend::RetryTarget;
use crate::error::{ChatError, ChatResult};
use crate::models::{Message, MessageStatus, Role};
use crate::services::model_client::{ModelDescriptor, StreamChunk};
use crate::services::title_generator::{fallback_title, generate_title};

/// Strategy for conversations that exist only in process memory.
///
/// "Send" invokes the model client directly with a decrypted credential and
/// appends the assistant message as it streams. Only `save_conversation`
/// crosses into durable storage, promoting the whole message list in one
/// step.
pub struct EphemeralStrategy {
    ctx: Arc<StrategyContext>,
    model: ModelDescriptor,
    local: Arc<Mutex<Vec<Message>>>,
    /// Cancellation token checked between stream chunks.
    cancel_flag: Arc<AtomicBool>,
}

impl EphemeralStrategy {
    pub fn new(
        ctx: Arc<StrategyContext>,
        model: ModelDescriptor,
        local: Arc<Mutex<Vec<Message>>>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            model,
            local,
            cancel_flag,
        }
    }

    pub async fn send_message(&self, message: Message) -> ChatResult<()> {
        if self.ctx.machine.lock().is_active() {
            warn!("send_message while a generation is active; ignoring");
            return Ok(());
        }
        self.local.lock().push(message);
        self.run_generation().await
    }

    pub async fn edit_message(&self, message_id: &str, new_content: &str) -> ChatResult<()> {
        let regenerate = {
            let mut local = self.local.lock();
            let Some(index) = local.iter().position(|m| m.id == message_id) else {
                return Err(ChatError::WriteFailed {
                    message: format!("message {} not found", message_id),
                });
            };
            local[index].content = new_content.to_string();
            if local[index].role == Role::User {
                // The edited message supersedes everything after it.
                local.truncate(index + 1);
                true
            } else {
                false
            }
        };

        if regenerate {
            self.run_generation().await
        } else {
            Ok(())
        }
    }

    pub async fn retry_from_message(
        &self,
        message_id: &str,
        target: RetryTarget,
    ) -> ChatResult<()> {
        {
            let mut local = self.local.lock();
            let Some(index) = local.iter().position(|m| m.id == message_id) else {
                return Err(ChatError::WriteFailed {
                    message: format!("message {} not found", message_id),
                });
            };
            let keep = match target {
                RetryTarget::User => index + 1,
                RetryTarget::Assistant => index,
            };
            local.truncate(keep);
        }
        self.run_generation().await
    }

    pub async fn delete_message(&self, message_id: &str) -> ChatResult<()> {
        self.local.lock().retain(|m| m.id != message_id);
        Ok(())
    }

    /// Effective immediately: the flag is observed before the next chunk is
    /// applied, independent of the transport.
    pub async fn stop_generation(&self) -> ChatResult<()> {
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.ctx.machine.lock().stop_generation();
        Ok(())
    }

    /// Promote the in-memory conversation to durable storage and clear
    /// local state on success.
    pub async fn save_conversation(&self, title: Option<String>) -> ChatResult<Option<String>> {
        let messages = self.local.lock().clone();
        if messages.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let title = match title {
            Some(title) => title,
            None => self.derive_title(&messages).await,
        };

        match self.ctx.backend.create_conversation(title, messages).await {
            Ok(id) => {
                self.local.lock().clear();
                Ok(Some(id))
            }
            Err(err) => Err(self.ctx.report(classify_backend_error(err))),
        }
    }

    pub async fn resume(&self) -> ChatResult<()> {
        debug!("ephemeral conversation has nothing to resume");
        Ok(())
    }

    async fn derive_title(&self, messages: &[Message]) -> String {
        let key = self
            .ctx
            .credentials
            .get_decrypted_key(&self.model.provider, &self.model.id);
        if let Some(key) = key {
            match generate_title(self.ctx.model_client.as_ref(), &self.model, &key, messages).await
            {
                Ok(title) => return title,
                // Documented degradation: continue without a generated title.
                Err(err) => {
                    warn!(error = %err, "title generation failed, falling back to excerpt")
                }
            }
        }
        fallback_title(messages)
    }

    /// Stream one assistant turn into a fresh placeholder message.
    async fn run_generation(&self) -> ChatResult<()> {
        let Some(api_key) = self
            .ctx
            .credentials
            .get_decrypted_key(&self.model.provider, &self.model.id)
        else {
            return Err(self.ctx.report(ChatError::WriteFailed {
                message: format!(
                    "No API key configured for provider {}",
                    self.model.provider
                ),
            }));
        };

        let history = self.local.lock().clone();

        let mut assistant = Message::assistant_pending();
        assistant.parent_id = history.last().map(|m| m.id.clone());
        let assistant_id = assistant.id.clone();

        if !self.ctx.machine.lock().send_message(assistant_id.clone()) {
            return Ok(());
        }
        self.local.lock().push(assistant);
        self.cancel_flag.store(false, Ordering::Relaxed);

        let mut stream = self
            .ctx
            .model_client
            .stream_chat(&self.model, &api_key, history);
        self.ctx.machine.lock().start_streaming(assistant_id.clone());

        while let Some(item) = stream.next().await {
            if self.cancel_flag.load(Ordering::Relaxed) {
                debug!(message = %assistant_id, "generation cancelled");
                self.with_assistant(&assistant_id, |m| {
                    m.metadata.stopped = true;
                    m.metadata.status = Some(MessageStatus::Done);
                });
                return Ok(());
            }

            match item {
                Ok(StreamChunk::Text(text)) => {
                    self.ctx.machine.lock().add_stream_chunk(&text);
                    self.with_assistant(&assistant_id, |m| m.content.push_str(&text));
                }
                Ok(StreamChunk::Reasoning(text)) => {
                    self.with_assistant(&assistant_id, |m| {
                        m.reasoning.get_or_insert_with(String::new).push_str(&text);
                    });
                }
                Ok(StreamChunk::Done { finish_reason }) => {
                    let reason = finish_reason.unwrap_or_else(|| "stop".to_string());
                    self.with_assistant(&assistant_id, |m| {
                        m.metadata.finish_reason = Some(reason.clone());
                        m.metadata.status = Some(MessageStatus::Done);
                    });
                    self.ctx.machine.lock().finish();
                }
                Ok(StreamChunk::Error(error)) => {
                    return Err(self.fail_generation(&assistant_id, error));
                }
                Err(err) => {
                    return Err(self.fail_generation(&assistant_id, err.to_string()));
                }
            }
        }

        Ok(())
    }

    fn fail_generation(&self, assistant_id: &str, error: String) -> ChatError {
        self.ctx.machine.lock().set_error(error.clone(), true);
        self.with_assistant(assistant_id, |m| {
            m.metadata.status = Some(MessageStatus::Error);
        });
        self.ctx.report(ChatError::WriteFailed { message: error })
    }

    fn with_assistant(&self, message_id: &str, f: impl FnOnce(&mut Message)) {
        let mut local = self.local.lock();
        if let Some(message) = local.iter_mut().find(|m| m.id == message_id) {
            f(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoxFuture;
    use crate::models::GenerationStatus;
    use crate::services::model_client::{ModelClient, ResponseStream};
    use crate::test_support::TestHarness;

    fn build(
        harness: &TestHarness,
        ctx: &Arc<StrategyContext>,
    ) -> (EphemeralStrategy, Arc<Mutex<Vec<Message>>>, Arc<AtomicBool>) {
        let local = Arc::new(Mutex::new(Vec::new()));
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let strategy = EphemeralStrategy::new(
            ctx.clone(),
            harness.model(),
            local.clone(),
            cancel_flag.clone(),
        );
        (strategy, local, cancel_flag)
    }

    #[tokio::test]
    async fn test_send_streams_text_and_reasoning() {
        let harness = TestHarness::new();
        harness.model_client.push_script(vec![
            StreamChunk::Reasoning("thinking".to_string()),
            StreamChunk::Text("Hello".to_string()),
            StreamChunk::Text(" World".to_string()),
            StreamChunk::Done {
                finish_reason: Some("stop".to_string()),
            },
        ]);
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);

        strategy.send_message(Message::user("hi")).await.unwrap();

        let messages = local.lock().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hello World");
        assert_eq!(messages[1].reasoning.as_deref(), Some("thinking"));
        assert_eq!(messages[1].metadata.finish_reason.as_deref(), Some("stop"));
        assert_eq!(messages[1].parent_id.as_deref(), Some(&messages[0].id[..]));
        assert_eq!(ctx.machine.lock().status(), GenerationStatus::Complete);
        assert_eq!(ctx.machine.lock().state().stream_content, "Hello World");
    }

    /// Sets the cancel flag after the first text chunk, as a concurrent
    /// stop_generation would.
    struct CancellingClient {
        flag: Arc<AtomicBool>,
    }

    impl ModelClient for CancellingClient {
        fn stream_chat(
            &self,
            _model: &ModelDescriptor,
            _api_key: &str,
            _history: Vec<Message>,
        ) -> ResponseStream {
            let flag = self.flag.clone();
            Box::pin(async_stream::stream! {
                yield Ok(StreamChunk::Text("Hello".to_string()));
                flag.store(true, Ordering::Relaxed);
                yield Ok(StreamChunk::Text(" World".to_string()));
                yield Ok(StreamChunk::Done { finish_reason: Some("stop".to_string()) });
            })
        }

        fn complete(
            &self,
            _model: &ModelDescriptor,
            _api_key: &str,
            _prompt: String,
        ) -> BoxFuture<'static, anyhow::Result<String>> {
            Box::pin(async { Ok("unused".to_string()) })
        }
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_between_chunks() {
        let harness = TestHarness::new();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(StrategyContext {
            backend: harness.backend.clone(),
            file_store: harness.file_store.clone(),
            credentials: harness.credentials.clone(),
            model_client: Arc::new(CancellingClient {
                flag: cancel_flag.clone(),
            }),
            navigator: harness.navigator.clone(),
            notifier: harness.notifier.clone(),
            on_error: Arc::new(|_| {}),
            machine: Arc::new(Mutex::new(crate::models::MessageStateMachine::new())),
        });
        let local = Arc::new(Mutex::new(Vec::new()));
        let strategy =
            EphemeralStrategy::new(ctx, harness.model(), local.clone(), cancel_flag);

        strategy.send_message(Message::user("hi")).await.unwrap();

        let messages = local.lock().clone();
        assert_eq!(messages[1].content, "Hello");
        assert!(messages[1].metadata.stopped);
        assert!(!messages[1].is_streaming());
    }

    #[tokio::test]
    async fn test_missing_credential_is_reported() {
        let harness = TestHarness::without_credentials();
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);

        let err = strategy.send_message(Message::user("hi")).await.unwrap_err();

        assert!(matches!(err, ChatError::WriteFailed { .. }));
        assert_eq!(harness.notifier.notices.lock().len(), 1);
        // The user message stays; only generation failed to start.
        assert_eq!(local.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_marks_message_and_machine() {
        let harness = TestHarness::new();
        harness.model_client.push_script(vec![
            StreamChunk::Text("par".to_string()),
            StreamChunk::Error("connection reset".to_string()),
        ]);
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);

        let err = strategy.send_message(Message::user("hi")).await.unwrap_err();

        assert!(matches!(err, ChatError::WriteFailed { .. }));
        assert!(ctx.machine.lock().has_error());
        let messages = local.lock().clone();
        assert_eq!(messages[1].metadata.status, Some(MessageStatus::Error));
    }

    #[tokio::test]
    async fn test_retry_assistant_truncates_and_regenerates() {
        let harness = TestHarness::new();
        harness.model_client.push_script(vec![
            StreamChunk::Text("first answer".to_string()),
            StreamChunk::Done { finish_reason: None },
        ]);
        harness.model_client.push_script(vec![
            StreamChunk::Text("second answer".to_string()),
            StreamChunk::Done { finish_reason: None },
        ]);
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);

        strategy.send_message(Message::user("q")).await.unwrap();
        let first_reply_id = local.lock()[1].id.clone();

        ctx.machine.lock().reset();
        strategy
            .retry_from_message(&first_reply_id, RetryTarget::Assistant)
            .await
            .unwrap();

        let messages = local.lock().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "second answer");
        assert_ne!(messages[1].id, first_reply_id);
    }

    #[tokio::test]
    async fn test_edit_user_message_regenerates() {
        let harness = TestHarness::new();
        harness.model_client.push_script(vec![
            StreamChunk::Text("old".to_string()),
            StreamChunk::Done { finish_reason: None },
        ]);
        harness.model_client.push_script(vec![
            StreamChunk::Text("new".to_string()),
            StreamChunk::Done { finish_reason: None },
        ]);
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);

        strategy.send_message(Message::user("original")).await.unwrap();
        let user_id = local.lock()[0].id.clone();

        ctx.machine.lock().reset();
        strategy.edit_message(&user_id, "edited").await.unwrap();

        let messages = local.lock().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "edited");
        assert_eq!(messages[1].content, "new");
    }

    #[tokio::test]
    async fn test_save_generates_title_and_clears_local() {
        let harness = TestHarness::new();
        harness.model_client.push_script(vec![
            StreamChunk::Text("answer".to_string()),
            StreamChunk::Done { finish_reason: None },
        ]);
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);
        strategy.send_message(Message::user("question")).await.unwrap();

        let id = strategy.save_conversation(None).await.unwrap().unwrap();

        assert!(local.lock().is_empty());
        assert!(harness.backend.inner.contains(&id));
        assert_eq!(
            harness.backend.inner.conversation_title(&id).as_deref(),
            Some("Generated Title")
        );
        assert_eq!(
            harness.backend.inner.conversation_messages(&id).unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_save_falls_back_to_excerpt_when_title_fails() {
        let harness = TestHarness::new();
        harness.model_client.set_title_error("model offline");
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);
        local.lock().push(Message::user("what is borrow checking?"));

        let id = strategy.save_conversation(None).await.unwrap().unwrap();

        // Degrades gracefully: no notification, excerpt title.
        assert!(harness.notifier.notices.lock().is_empty());
        assert_eq!(
            harness.backend.inner.conversation_title(&id).as_deref(),
            Some("what is borrow checking?")
        );
    }

    #[tokio::test]
    async fn test_save_empty_conversation_rejected() {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let (strategy, _, _) = build(&harness, &ctx);
        assert_eq!(
            strategy.save_conversation(None).await.unwrap_err(),
            ChatError::EmptyMessage
        );
    }

    #[tokio::test]
    async fn test_delete_message_removes_from_local() {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let (strategy, local, _) = build(&harness, &ctx);
        let message = Message::user("bye");
        let id = message.id.clone();
        local.lock().push(message);

        strategy.delete_message(&id).await.unwrap();
        assert!(local.lock().is_empty());
    }
}
