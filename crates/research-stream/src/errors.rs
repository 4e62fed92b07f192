use crate::model::BackendKind;

/// Errors raised by a transport channel before they are folded into a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The remote endpoint could not be reached or refused the request.
    #[error("connection refused ({backend}): {message}")]
    ConnectionRefused {
        backend: BackendKind,
        message: String,
        status_code: Option<u16>,
    },
    /// The handshake or response framing did not follow the protocol.
    #[error("protocol violation ({backend}): {message}")]
    ProtocolViolation {
        backend: BackendKind,
        message: String,
    },
    /// The connection closed with a non-normal status.
    #[error("connection closed abnormally ({backend}, code {code:?}): {reason}")]
    ClosedAbnormally {
        backend: BackendKind,
        code: Option<u16>,
        reason: String,
    },
    /// Reading from or writing to an established connection failed.
    #[error("transport error ({backend}): {message}")]
    Transport {
        backend: BackendKind,
        message: String,
    },
}

impl ChannelError {
    /// Creates a connection-refused error.
    pub fn refused(
        backend: BackendKind,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::ConnectionRefused {
            backend,
            message: message.into(),
            status_code,
        }
    }

    /// Creates a protocol-violation error.
    pub fn protocol(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            backend,
            message: message.into(),
        }
    }

    /// Creates an abnormal-close error.
    pub fn closed(backend: BackendKind, code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ClosedAbnormally {
            backend,
            code,
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            message: message.into(),
        }
    }

    /// Returns the backend that produced this error.
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::ConnectionRefused { backend, .. }
            | Self::ProtocolViolation { backend, .. }
            | Self::ClosedAbnormally { backend, .. }
            | Self::Transport { backend, .. } => *backend,
        }
    }
}

/// Terminal session failure, recorded on the session and sent to its ticket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFailure {
    /// Connection refused, dropped, or closed abnormally.
    #[error("connection error: {message}")]
    Connection { message: String },
    /// A frame could not be decoded.
    #[error("protocol error: {message}")]
    Protocol { message: String },
    /// No terminal event and no content within the session ceiling.
    #[error("research session timed out after {elapsed_secs}s without a response")]
    Timeout { elapsed_secs: u64 },
    /// The remote service reported an error.
    #[error("{message}")]
    Upstream {
        message: String,
        code: Option<String>,
    },
    /// The caller stopped the session.
    #[error("research cancelled by user")]
    Cancelled,
}

/// Top-level error type for the public session API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResearchError {
    /// Invalid engine or channel configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input to `start`.
    #[error("validation error: {0}")]
    Validation(String),
    /// No channel is registered for the requested backend.
    #[error("backend not registered: {backend}")]
    BackendNotFound { backend: BackendKind },
    /// The session ended with a terminal failure.
    #[error(transparent)]
    Failed(SessionFailure),
    /// The session was reset or replaced by a newer one before it finished.
    #[error("session superseded")]
    Superseded,
}

impl ResearchError {
    pub(crate) fn failed(failure: SessionFailure) -> Self {
        Self::Failed(failure)
    }
}

impl From<SessionFailure> for ResearchError {
    fn from(value: SessionFailure) -> Self {
        ResearchError::Failed(value)
    }
}

pub(crate) fn session_failure_from_channel_error(err: &ChannelError) -> SessionFailure {
    match err {
        ChannelError::ProtocolViolation { message, .. } => SessionFailure::Protocol {
            message: message.clone(),
        },
        ChannelError::ConnectionRefused { .. }
        | ChannelError::ClosedAbnormally { .. }
        | ChannelError::Transport { .. } => SessionFailure::Connection {
            message: err.to_string(),
        },
    }
}
