use chrono::{DateTime, Utc};

use crate::content::{Citation, CompletionMetadata, FeedbackRequest, Progress};
use crate::errors::SessionFailure;
use crate::stream::{PROTOCOL_ERROR_CODE, StreamEvent};

/// Lifecycle of one research session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Reasoning,
    Generating,
    Complete,
    Error,
}

impl Phase {
    /// Returns true for `Complete` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingPhase {
    Thinking,
    Done,
    Error,
}

/// Reasoning trace shown beside the answer while the backend thinks.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ThinkingState {
    pub phase: ThinkingPhase,
    pub thoughts: Vec<String>,
    pub is_thinking: bool,
}

impl ThinkingState {
    fn open() -> Self {
        Self {
            phase: ThinkingPhase::Thinking,
            thoughts: Vec::new(),
            is_thinking: true,
        }
    }

    fn close(&mut self) -> bool {
        if !self.is_thinking {
            return false;
        }
        self.phase = ThinkingPhase::Done;
        self.is_thinking = false;
        true
    }
}

/// Why a session reached `Complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// The backend sent a completion event.
    Explicit,
    /// The backend closed the stream normally after sending content.
    ServerClosed,
    /// The session ceiling elapsed with content buffered.
    TimedOut,
}

/// What a single fold changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    /// False when the event was dropped (terminal session, empty text).
    pub applied: bool,
    /// The event moved the session to `Complete` or `Error`.
    pub terminal: bool,
    /// The thinking trace was created, extended, or closed.
    pub thinking_changed: bool,
}

impl FoldOutcome {
    const IGNORED: Self = Self {
        applied: false,
        terminal: false,
        thinking_changed: false,
    };

    fn applied() -> Self {
        Self {
            applied: true,
            ..Self::IGNORED
        }
    }

    fn thinking(changed: bool) -> Self {
        Self {
            applied: true,
            terminal: false,
            thinking_changed: changed,
        }
    }

    fn terminal(thinking_changed: bool) -> Self {
        Self {
            applied: true,
            terminal: true,
            thinking_changed,
        }
    }
}

/// Authoritative state of one research session.
///
/// Every mutation goes through [`SessionState::fold`] or one of the explicit
/// terminal transitions. `buffered_text` and `citations` only ever grow, and
/// once the phase is terminal nothing changes except thinking cleanup.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SessionState {
    pub id: String,
    pub phase: Phase,
    pub buffered_text: String,
    pub citations: Vec<Citation>,
    pub metadata: Option<CompletionMetadata>,
    pub error: Option<SessionFailure>,
    pub progress: Option<Progress>,
    pub thinking: Option<ThinkingState>,
    pub awaiting_feedback: Option<FeedbackRequest>,
    pub completion_kind: Option<CompletionKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: Phase::Idle,
            buffered_text: String::new(),
            citations: Vec::new(),
            metadata: None,
            error: None,
            progress: None,
            thinking: None,
            awaiting_feedback: None,
            completion_kind: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Number of characters buffered so far.
    pub fn char_count(&self) -> usize {
        self.buffered_text.chars().count()
    }

    /// Applies one stream event.
    pub fn fold(&mut self, event: StreamEvent) -> FoldOutcome {
        if self.is_terminal() {
            tracing::debug!(session_id = %self.id, ?event, "event after terminal phase dropped");
            return FoldOutcome::IGNORED;
        }
        match event {
            StreamEvent::Connecting => {
                self.phase = Phase::Connecting;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
                FoldOutcome::applied()
            }
            StreamEvent::ReasoningStarted => {
                self.phase = Phase::Reasoning;
                self.awaiting_feedback = None;
                self.thinking = Some(ThinkingState::open());
                FoldOutcome::thinking(true)
            }
            StreamEvent::ReasoningChunk { text } => {
                if text.is_empty() {
                    return FoldOutcome::IGNORED;
                }
                self.awaiting_feedback = None;
                let thinking_changed = match self.thinking.as_mut() {
                    Some(thinking) if thinking.is_thinking => {
                        thinking.thoughts.push(text.clone());
                        true
                    }
                    _ => false,
                };
                self.buffered_text.push_str(&text);
                FoldOutcome::thinking(thinking_changed)
            }
            StreamEvent::ReasoningComplete => {
                self.phase = Phase::Generating;
                let closed = self.thinking.as_mut().is_some_and(ThinkingState::close);
                FoldOutcome::thinking(closed)
            }
            StreamEvent::ContentChunk { text } => {
                if text.is_empty() {
                    return FoldOutcome::IGNORED;
                }
                self.awaiting_feedback = None;
                if matches!(self.phase, Phase::Idle | Phase::Connecting) {
                    self.phase = Phase::Generating;
                }
                self.buffered_text.push_str(&text);
                FoldOutcome::applied()
            }
            StreamEvent::Progress(progress) => {
                self.progress = Some(progress);
                FoldOutcome::applied()
            }
            StreamEvent::Citations { citations } => {
                self.merge_citations(citations);
                FoldOutcome::applied()
            }
            StreamEvent::AwaitingFeedback(request) => {
                self.awaiting_feedback = Some(request);
                FoldOutcome::applied()
            }
            StreamEvent::Completion {
                accumulated_text,
                final_text,
                citations,
                metadata,
            } => {
                if self.buffered_text.is_empty() {
                    let fallback = accumulated_text
                        .filter(|t| !t.is_empty())
                        .or(final_text)
                        .unwrap_or_default();
                    self.buffered_text = fallback;
                }
                self.merge_citations(citations);
                if self.metadata.is_none() {
                    self.metadata = metadata;
                }
                self.finish(CompletionKind::Explicit)
            }
            StreamEvent::Error { message, code } => {
                let failure = if code.as_deref() == Some(PROTOCOL_ERROR_CODE) {
                    SessionFailure::Protocol { message }
                } else {
                    SessionFailure::Upstream { message, code }
                };
                self.fail(failure)
            }
        }
    }

    /// Completes the session without a completion event, keeping whatever was
    /// buffered.
    pub fn complete(&mut self, kind: CompletionKind) -> FoldOutcome {
        if self.is_terminal() {
            return FoldOutcome::IGNORED;
        }
        self.finish(kind)
    }

    /// Records a terminal failure. Buffered text is kept.
    pub fn fail(&mut self, failure: SessionFailure) -> FoldOutcome {
        if self.is_terminal() {
            return FoldOutcome::IGNORED;
        }
        let thinking_changed = match self.thinking.as_mut() {
            Some(thinking) => {
                thinking.phase = ThinkingPhase::Error;
                thinking.is_thinking = false;
                thinking.thoughts.push(failure.to_string());
                true
            }
            None => false,
        };
        tracing::warn!(session_id = %self.id, error = %failure, "research session failed");
        self.phase = Phase::Error;
        self.error = Some(failure);
        self.awaiting_feedback = None;
        self.ended_at = Some(Utc::now());
        FoldOutcome::terminal(thinking_changed)
    }

    /// Takes the pending feedback request when the caller answers it.
    pub fn take_feedback_request(&mut self) -> Option<FeedbackRequest> {
        if self.is_terminal() {
            return None;
        }
        self.awaiting_feedback.take()
    }

    /// Drops the thinking trace. Returns false when there was none.
    pub fn clear_thinking(&mut self) -> bool {
        self.thinking.take().is_some()
    }

    fn finish(&mut self, kind: CompletionKind) -> FoldOutcome {
        let closed = self.thinking.as_mut().is_some_and(ThinkingState::close);
        self.phase = Phase::Complete;
        self.completion_kind = Some(kind);
        self.awaiting_feedback = None;
        self.ended_at = Some(Utc::now());
        tracing::info!(
            session_id = %self.id,
            completion = ?kind,
            chars = self.char_count(),
            citations = self.citations.len(),
            "research session complete"
        );
        FoldOutcome::terminal(closed)
    }

    fn merge_citations(&mut self, citations: Vec<Citation>) {
        for citation in citations {
            if citation.url.is_empty() || self.citations.iter().any(|c| c.url == citation.url) {
                continue;
            }
            self.citations.push(citation);
        }
    }
}
