use crate::content::{Citation, CompletionMetadata, FeedbackRequest, Progress};

/// Error code carried by `StreamEvent::Error` when a frame could not be decoded.
pub const PROTOCOL_ERROR_CODE: &str = "protocol_error";

/// Message used when a raw frame could not be decoded.
pub const PARSE_FAILURE_MESSAGE: &str = "failed to parse server response";

/// Normalized, backend-independent unit of protocol progress.
///
/// Exactly one terminal event (`Completion` or `Error`) ends a session; every
/// other event precedes it.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Connection to the backend is being established.
    Connecting,
    /// The backend started emitting its reasoning trace.
    ReasoningStarted,
    /// Incremental reasoning text.
    ReasoningChunk { text: String },
    /// The reasoning trace finished; answer generation follows.
    ReasoningComplete,
    /// Incremental answer text.
    ContentChunk { text: String },
    /// Latest progress hint from the backend.
    Progress(Progress),
    /// Sources discovered while the session is still running.
    Citations { citations: Vec<Citation> },
    /// The backend paused and waits for caller feedback.
    AwaitingFeedback(FeedbackRequest),
    /// Terminal success event.
    Completion {
        accumulated_text: Option<String>,
        final_text: Option<String>,
        citations: Vec<Citation>,
        metadata: Option<CompletionMetadata>,
    },
    /// Terminal failure event.
    Error {
        message: String,
        code: Option<String>,
    },
}

impl StreamEvent {
    /// Returns true for `Completion` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion { .. } | Self::Error { .. })
    }

    /// Completion without any fallback text, citations, or metadata.
    pub fn bare_completion() -> Self {
        Self::Completion {
            accumulated_text: None,
            final_text: None,
            citations: Vec::new(),
            metadata: None,
        }
    }

    /// The error emitted for a frame that could not be decoded.
    pub fn parse_failure() -> Self {
        Self::Error {
            message: PARSE_FAILURE_MESSAGE.to_string(),
            code: Some(PROTOCOL_ERROR_CODE.to_string()),
        }
    }
}
