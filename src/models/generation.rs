use tracing::{debug, warn};

/// Lifecycle of a single send/generate cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Idle,
    Sending,
    Streaming,
    Stopped,
    Complete,
    Error,
}

/// Observable state of the current generation cycle.
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub status: GenerationStatus,
    pub current_message_id: Option<String>,
    /// Append-only while streaming; cleared by `reset()`.
    pub stream_content: String,
    pub error: Option<String>,
    pub can_retry: bool,
}

impl Default for GenerationState {
    fn default() -> Self {
        Self {
            status: GenerationStatus::Idle,
            current_message_id: None,
            stream_content: String::new(),
            error: None,
            can_retry: false,
        }
    }
}

/// Finite-state tracker for the in-flight generation.
///
/// Pure state, no side effects. Consumed by the UI for feedback and by the
/// strategies for cancellation decisions.
pub struct MessageStateMachine {
    state: GenerationState,
}

impl MessageStateMachine {
    pub fn new() -> Self {
        Self {
            state: GenerationState::default(),
        }
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn status(&self) -> GenerationStatus {
        self.state.status
    }

    pub fn is_idle(&self) -> bool {
        self.state.status == GenerationStatus::Idle
    }

    pub fn is_streaming(&self) -> bool {
        self.state.status == GenerationStatus::Streaming
    }

    pub fn is_stopped(&self) -> bool {
        self.state.status == GenerationStatus::Stopped
    }

    pub fn has_error(&self) -> bool {
        self.state.status == GenerationStatus::Error
    }

    /// True while a cycle is in flight (sending or streaming).
    pub fn is_active(&self) -> bool {
        matches!(
            self.state.status,
            GenerationStatus::Sending | GenerationStatus::Streaming
        )
    }

    /// Begin a cycle. Requires no active generation; a call while one is in
    /// flight is rejected and surfaced as a programming error upstream.
    pub fn send_message(&mut self, message_id: impl Into<String>) -> bool {
        if self.is_active() {
            warn!(
                current = ?self.state.current_message_id,
                "send_message called while a generation is active; ignoring"
            );
            return false;
        }
        self.state = GenerationState {
            status: GenerationStatus::Sending,
            current_message_id: Some(message_id.into()),
            ..GenerationState::default()
        };
        true
    }

    pub fn start_streaming(&mut self, message_id: impl Into<String>) {
        if self.state.status != GenerationStatus::Sending {
            debug!(status = ?self.state.status, "start_streaming outside sending; ignoring");
            return;
        }
        self.state.status = GenerationStatus::Streaming;
        self.state.current_message_id = Some(message_id.into());
    }

    /// Append a chunk to the accumulated stream content. Ignored outside
    /// the streaming state.
    pub fn add_stream_chunk(&mut self, text: &str) {
        if self.state.status != GenerationStatus::Streaming {
            return;
        }
        self.state.stream_content.push_str(text);
    }

    /// Valid from sending or streaming; idempotent.
    pub fn stop_generation(&mut self) {
        match self.state.status {
            GenerationStatus::Sending | GenerationStatus::Streaming => {
                self.state.status = GenerationStatus::Stopped;
            }
            GenerationStatus::Stopped => {}
            other => {
                debug!(status = ?other, "stop_generation outside an active cycle; ignoring");
            }
        }
    }

    pub fn finish(&mut self) {
        if self.state.status == GenerationStatus::Streaming {
            self.state.status = GenerationStatus::Complete;
        }
    }

    pub fn set_error(&mut self, error: impl Into<String>, can_retry: bool) {
        self.state.status = GenerationStatus::Error;
        self.state.error = Some(error.into());
        self.state.can_retry = can_retry;
    }

    pub fn reset(&mut self) {
        self.state = GenerationState::default();
    }

    /// Restore a status after a failed optimistic transition (e.g. a stop
    /// whose backend confirmation was rejected).
    pub(crate) fn force_status(&mut self, status: GenerationStatus) {
        self.state.status = status;
    }
}

impl Default for MessageStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
