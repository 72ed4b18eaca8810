//! Shared test doubles for strategy and engine tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::backend::{
    BackendError, BackendResult, BoxFuture, ChatBackend, CredentialResolver, FileStore,
    InMemoryChatBackend, MessageSnapshot, Navigator, NoticeLevel, Notifier, RetryTarget,
};
use crate::engine::{ChatEngine, EngineCollaborators};
use crate::error::ChatError;
use crate::models::{Attachment, Message, MessageStateMachine};
use crate::services::model_client::{ModelClient, ModelDescriptor, ResponseStream, StreamChunk};
use crate::strategies::StrategyContext;

/// In-memory backend wrapper with scriptable failures.
pub struct TestBackend {
    pub inner: InMemoryChatBackend,
    fail_stop: AtomicBool,
    fail_resume: AtomicBool,
    next_send_rejection: Mutex<Option<String>>,
    resume_calls: AtomicUsize,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            inner: InMemoryChatBackend::new(),
            fail_stop: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            next_send_rejection: Mutex::new(None),
            resume_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_resume(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::Relaxed);
    }

    pub fn reject_next_send(&self, message: &str) {
        *self.next_send_rejection.lock() = Some(message.to_string());
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::Relaxed)
    }
}

impl ChatBackend for TestBackend {
    fn subscribe(&self, conversation_id: &str) -> watch::Receiver<MessageSnapshot> {
        self.inner.subscribe(conversation_id)
    }

    fn send_follow_up(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> BoxFuture<'static, BackendResult<()>> {
        if let Some(rejection) = self.next_send_rejection.lock().take() {
            return Box::pin(async move { Err(BackendError::Rejected { message: rejection }) });
        }
        self.inner.send_follow_up(conversation_id, message)
    }

    fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: String,
    ) -> BoxFuture<'static, BackendResult<()>> {
        self.inner.edit_message(conversation_id, message_id, content)
    }

    fn retry_from_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        target: RetryTarget,
    ) -> BoxFuture<'static, BackendResult<()>> {
        self.inner
            .retry_from_message(conversation_id, message_id, target)
    }

    fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, BackendResult<()>> {
        self.inner.delete_message(conversation_id, message_id)
    }

    fn delete_conversation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>> {
        self.inner.delete_conversation(conversation_id)
    }

    fn stop_generation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>> {
        if self.fail_stop.load(Ordering::Relaxed) {
            return Box::pin(async {
                Err(BackendError::Rejected {
                    message: "stop rejected".to_string(),
                })
            });
        }
        self.inner.stop_generation(conversation_id)
    }

    fn resume_conversation(&self, conversation_id: &str) -> BoxFuture<'static, BackendResult<()>> {
        self.resume_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_resume.load(Ordering::Relaxed) {
            return Box::pin(async {
                Err(BackendError::Rejected {
                    message: "resume rejected".to_string(),
                })
            });
        }
        self.inner.resume_conversation(conversation_id)
    }

    fn create_conversation(
        &self,
        title: String,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, BackendResult<String>> {
        self.inner.create_conversation(title, messages)
    }
}

pub struct StubFileStore {
    pub fail: AtomicBool,
}

impl StubFileStore {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

impl FileStore for StubFileStore {
    fn upload(&self, attachment: Attachment) -> BoxFuture<'static, BackendResult<Attachment>> {
        let fail = self.fail.load(Ordering::Relaxed);
        Box::pin(async move {
            if fail {
                Err(BackendError::Rejected {
                    message: "storage unavailable".to_string(),
                })
            } else {
                Ok(attachment.into_durable("test-store"))
            }
        })
    }
}

pub struct StaticCredentials {
    key: Option<String>,
}

impl CredentialResolver for StaticCredentials {
    fn get_decrypted_key(&self, _provider: &str, _model_id: &str) -> Option<String> {
        self.key.clone()
    }
}

pub struct RecordingNotifier {
    pub notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().push((level, message.to_string()));
    }
}

pub struct RecordingNavigator {
    pub left: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn leave_conversation(&self, conversation_id: &str) {
        self.left.lock().push(conversation_id.to_string());
    }
}

/// Model client replaying canned chunk scripts, one per generation.
pub struct ScriptedModelClient {
    scripts: Mutex<VecDeque<Vec<StreamChunk>>>,
    title_response: Mutex<Result<String, String>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            title_response: Mutex::new(Ok("Generated Title".to_string())),
        }
    }

    pub fn push_script(&self, chunks: Vec<StreamChunk>) {
        self.scripts.lock().push_back(chunks);
    }

    pub fn set_title_error(&self, message: &str) {
        *self.title_response.lock() = Err(message.to_string());
    }
}

impl ModelClient for ScriptedModelClient {
    fn stream_chat(
        &self,
        _model: &ModelDescriptor,
        _api_key: &str,
        _history: Vec<Message>,
    ) -> ResponseStream {
        let chunks = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![StreamChunk::Done { finish_reason: None }]);
        Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
    }

    fn complete(
        &self,
        _model: &ModelDescriptor,
        _api_key: &str,
        _prompt: String,
    ) -> BoxFuture<'static, anyhow::Result<String>> {
        let response = self.title_response.lock().clone();
        Box::pin(async move { response.map_err(|e| anyhow!(e)) })
    }
}

/// Everything an engine or strategy test needs, with handles kept for
/// assertions.
pub struct TestHarness {
    pub backend: Arc<TestBackend>,
    pub file_store: Arc<StubFileStore>,
    pub credentials: Arc<StaticCredentials>,
    pub model_client: Arc<ScriptedModelClient>,
    pub navigator: Arc<RecordingNavigator>,
    pub notifier: Arc<RecordingNotifier>,
    pub errors: Arc<Mutex<Vec<ChatError>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_key(Some("sk-test"))
    }

    pub fn without_credentials() -> Self {
        Self::with_key(None)
    }

    fn with_key(key: Option<&str>) -> Self {
        Self {
            backend: Arc::new(TestBackend::new()),
            file_store: Arc::new(StubFileStore::new()),
            credentials: Arc::new(StaticCredentials {
                key: key.map(String::from),
            }),
            model_client: Arc::new(ScriptedModelClient::new()),
            navigator: Arc::new(RecordingNavigator {
                left: Mutex::new(Vec::new()),
            }),
            notifier: Arc::new(RecordingNotifier {
                notices: Mutex::new(Vec::new()),
            }),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn model(&self) -> ModelDescriptor {
        ModelDescriptor {
            id: "model-1".to_string(),
            provider: "test".to_string(),
            context_length: 128_000,
            supports_images: true,
            supports_pdf: true,
        }
    }

    pub fn ctx(&self) -> Arc<StrategyContext> {
        let errors = self.errors.clone();
        Arc::new(StrategyContext {
            backend: self.backend.clone(),
            file_store: self.file_store.clone(),
            credentials: self.credentials.clone(),
            model_client: self.model_client.clone(),
            navigator: self.navigator.clone(),
            notifier: self.notifier.clone(),
            on_error: Arc::new(move |err| errors.lock().push(err.clone())),
            machine: Arc::new(Mutex::new(MessageStateMachine::new())),
        })
    }

    pub fn engine(&self) -> ChatEngine {
        let errors = self.errors.clone();
        ChatEngine::new(EngineCollaborators {
            backend: self.backend.clone(),
            file_store: self.file_store.clone(),
            credentials: self.credentials.clone(),
            model_client: self.model_client.clone(),
            navigator: self.navigator.clone(),
            notifier: self.notifier.clone(),
            on_error: Arc::new(move |err| errors.lock().push(err.clone())),
        })
    }
}
