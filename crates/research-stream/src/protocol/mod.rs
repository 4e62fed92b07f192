//! Wire decoding for both backends.
//!
//! [`decode`] is pure: every raw message maps to zero or more
//! [`StreamEvent`]s and a frame that cannot be parsed becomes a single
//! protocol error event instead of an `Err`.

mod event_stream;
mod socket;

use crate::channel::RawMessage;
use crate::model::BackendKind;
use crate::stream::StreamEvent;

/// Decodes one raw backend message.
pub fn decode(backend: BackendKind, raw: &RawMessage) -> Vec<StreamEvent> {
    match backend {
        BackendKind::Socket => socket::decode_frame(&raw.data),
        BackendKind::EventStream => event_stream::decode_event(raw.event.as_deref(), &raw.data),
    }
}

/// Brackets reasoning text so both backends walk the same phases.
///
/// The event-stream backend never announces when reasoning starts or ends, so
/// the normalizer opens a reasoning section on the first reasoning chunk and
/// closes it before the first content chunk that follows.
#[derive(Debug, Default)]
pub struct Normalizer {
    started: bool,
    open: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites one decoded event into its normalized sequence.
    pub fn push(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        match event {
            StreamEvent::ReasoningStarted => {
                if self.open {
                    return Vec::new();
                }
                self.started = true;
                self.open = true;
                vec![StreamEvent::ReasoningStarted]
            }
            StreamEvent::ReasoningChunk { text } => {
                let mut out = Vec::with_capacity(2);
                if !self.started {
                    self.started = true;
                    self.open = true;
                    out.push(StreamEvent::ReasoningStarted);
                }
                out.push(StreamEvent::ReasoningChunk { text });
                out
            }
            StreamEvent::ReasoningComplete => {
                if !self.open {
                    return Vec::new();
                }
                self.open = false;
                vec![StreamEvent::ReasoningComplete]
            }
            StreamEvent::ContentChunk { text } => {
                let mut out = Vec::with_capacity(2);
                if self.open {
                    self.open = false;
                    out.push(StreamEvent::ReasoningComplete);
                }
                out.push(StreamEvent::ContentChunk { text });
                out
            }
            other => vec![other],
        }
    }

    /// Pushes a batch, preserving order.
    pub fn push_all(&mut self, events: impl IntoIterator<Item = StreamEvent>) -> Vec<StreamEvent> {
        events.into_iter().flat_map(|event| self.push(event)).collect()
    }

    /// True while a reasoning section is open.
    pub fn reasoning_open(&self) -> bool {
        self.open
    }
}
