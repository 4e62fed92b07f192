//! Transport channels for the two backend wire protocols.
//!
//! Both variants implement [`Channel`]; the session unifier only ever talks to
//! that trait. Backend-specific request options are attached to
//! [`StartOptions`] through the extension traits defined here.
mod event_stream;
mod options;
mod socket;
pub(crate) mod sse;

use std::pin::Pin;
use std::sync::Arc;

pub use event_stream::EventStreamChannel;
pub use options::{EventStreamOptions, SocketOptions};
pub use socket::SocketChannel;

use crate::config::EngineConfig;
use crate::errors::{ChannelError, ResearchError};
use crate::model::{BackendKind, StartOptions};

/// One undecoded message received from a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    /// SSE event name; `None` for socket frames.
    pub event: Option<String>,
    /// Frame payload (JSON text for both backends).
    pub data: String,
}

impl RawMessage {
    /// A socket text frame.
    pub fn frame(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// A named server-sent event.
    pub fn event(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(name.into()),
            data: data.into(),
        }
    }
}

/// Request handed to a channel when a session opens (or resumes) a connection.
#[derive(Clone, Debug)]
pub struct ChannelRequest {
    pub session_id: String,
    pub query: String,
    /// Backend-specific options blob, deserialized by the channel.
    pub options: Option<serde_json::Value>,
    /// Caller feedback when resuming a paused session.
    pub feedback: Option<String>,
}

/// Boxed stream of raw backend messages.
pub type RawMessageStream =
    Pin<Box<dyn futures::Stream<Item = Result<RawMessage, ChannelError>> + Send + 'static>>;

type Closer = Box<dyn FnOnce() + Send + 'static>;

/// An open connection: the incoming message stream plus its release hook.
///
/// `close` runs the release hook at most once; dropping the handle closes it.
pub struct ChannelHandle {
    backend: BackendKind,
    messages: Option<RawMessageStream>,
    closer: Option<Closer>,
}

impl ChannelHandle {
    pub fn new(backend: BackendKind, messages: RawMessageStream) -> Self {
        Self {
            backend,
            messages: Some(messages),
            closer: None,
        }
    }

    /// Registers the hook that releases the underlying connection.
    pub fn with_closer(mut self, closer: impl FnOnce() + Send + 'static) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Waits for the next message. Returns `None` once the stream ended or the
    /// handle was closed.
    pub async fn next_message(&mut self) -> Option<Result<RawMessage, ChannelError>> {
        use futures::StreamExt as _;
        match self.messages.as_mut() {
            Some(messages) => messages.next().await,
            None => None,
        }
    }

    /// Releases the connection. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        let had_stream = self.messages.take().is_some();
        match self.closer.take() {
            Some(closer) => {
                closer();
                tracing::debug!(backend = %self.backend, "channel closed");
                true
            }
            None => had_stream,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.messages.is_none() && self.closer.is_none()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capability interface shared by every transport.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Backend kind this channel serves.
    fn kind(&self) -> BackendKind;

    /// Whether a paused session can be resumed with caller feedback.
    fn supports_feedback(&self) -> bool {
        false
    }

    /// Opens a connection, sends the request, and returns the message stream.
    async fn open(&self, request: &ChannelRequest) -> Result<ChannelHandle, ChannelError>;
}

/// Builds the channel for `kind` from engine configuration.
pub fn from_config(
    kind: BackendKind,
    config: &EngineConfig,
) -> Result<Arc<dyn Channel>, ResearchError> {
    match kind {
        BackendKind::Socket => Ok(Arc::new(SocketChannel::new(config)?)),
        BackendKind::EventStream => Ok(Arc::new(EventStreamChannel::new(config)?)),
    }
}

/// Attaches socket backend options to a session start.
pub trait SocketStartExt {
    fn socket_options(self, options: SocketOptions) -> Self;
}

impl SocketStartExt for StartOptions {
    fn socket_options(self, options: SocketOptions) -> Self {
        let value = serde_json::to_value(options).unwrap_or(serde_json::Value::Null);
        self.set_backend_options_json(BackendKind::Socket, value)
    }
}

/// Attaches event-stream backend options to a session start.
pub trait EventStreamStartExt {
    fn event_stream_options(self, options: EventStreamOptions) -> Self;
}

impl EventStreamStartExt for StartOptions {
    fn event_stream_options(self, options: EventStreamOptions) -> Self {
        let value = serde_json::to_value(options).unwrap_or(serde_json::Value::Null);
        self.set_backend_options_json(BackendKind::EventStream, value)
    }
}

pub(crate) fn read_options<T>(
    backend: BackendKind,
    request: &ChannelRequest,
) -> Result<T, ChannelError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match request.options.as_ref() {
        Some(serde_json::Value::Null) | None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ChannelError::protocol(backend, format!("invalid {backend} options: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn start_options_store_backend_blobs_under_their_kind() {
        let options = StartOptions::default()
            .socket_options(SocketOptions::default().research_type("risk_assessment"))
            .event_stream_options(EventStreamOptions::default().auto_accepted_plan(true));
        let socket = options
            .backend_options_value(BackendKind::Socket)
            .expect("socket options");
        assert_eq!(
            socket.get("research_type").and_then(|v| v.as_str()),
            Some("risk_assessment")
        );
        let sse = options
            .backend_options_value(BackendKind::EventStream)
            .expect("event stream options");
        assert_eq!(sse.get("auto_accepted_plan").and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn close_runs_release_hook_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let mut handle = ChannelHandle::new(BackendKind::Socket, Box::pin(futures::stream::empty()))
            .with_closer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(handle.close());
        assert!(!handle.close());
        drop(handle);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_handle_yields_no_messages() {
        let mut handle = ChannelHandle::new(
            BackendKind::EventStream,
            Box::pin(futures::stream::iter(vec![Ok(RawMessage::frame("{}"))])),
        );
        handle.close();
        assert!(handle.is_closed());
        assert!(handle.next_message().await.is_none());
    }

    #[test]
    fn missing_options_fall_back_to_defaults() {
        let request = ChannelRequest {
            session_id: "s".into(),
            query: "q".into(),
            options: None,
            feedback: None,
        };
        let options: EventStreamOptions =
            read_options(BackendKind::EventStream, &request).expect("defaults");
        assert_eq!(options, EventStreamOptions::default());
    }
}
