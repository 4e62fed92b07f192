//! Streaming research session engine with a builder-first async API.
//!
//! One [`ResearchSession`] drives a query against a remote reasoning service
//! over either a WebSocket (`BackendKind::Socket`) or a server-sent event
//! stream (`BackendKind::EventStream`), folds the backend's events into one
//! session state, and publishes a paced "currently displayed text" view.
//!
//! Backend-specific request options are attached through extension traits in
//! [`channel`].
//!
//! # Usage
//!
//! ```no_run
//! use research_stream::channel::{SocketOptions, SocketStartExt};
//! use research_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ResearchError> {
//! let engine = Engine::builder()
//!     .config(EngineConfig::from_env()?)
//!     .with_default_channels()
//!     .build()?;
//!
//! let mut session = engine.session();
//! let mut updates = session.subscribe();
//! let ticket = session
//!     .start(
//!         "Validate a subscription box for indoor plants",
//!         BackendKind::Socket,
//!         StartOptions::default()
//!             .socket_options(SocketOptions::default().research_type("market_analysis")),
//!     )
//!     .await?;
//!
//! tokio::spawn(async move {
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow_and_update().clone();
//!         println!("{:?}: {}", snapshot.phase(), snapshot.display.displayed_text);
//!     }
//! });
//!
//! let report = ticket.wait().await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

/// Transport channels and backend-specific start options.
pub mod channel;
/// Engine configuration.
pub mod config;
/// Citations, completion metadata, progress, and feedback payloads.
pub mod content;
/// Engine entry point, builder, and UI observer hook.
pub mod engine;
/// Public error types.
pub mod errors;
/// Backend kinds, research types, and per-session start options.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Paced reveal of buffered text.
pub mod pacer;
/// Common imports for typical usage.
pub mod prelude;
/// Wire decoding for both backends.
pub mod protocol;
/// Session state machine.
pub mod session;
/// Normalized stream events.
pub mod stream;
/// Heartbeat, deadlines, and teardown.
pub mod supervisor;
/// Caller-facing session handle and its actor.
pub mod unifier;

pub use channel::{Channel, ChannelHandle, ChannelRequest, RawMessage};
pub use config::EngineConfig;
pub use content::{Citation, CompletionMetadata, FeedbackOption, FeedbackRequest, Progress};
pub use engine::{Engine, EngineBuilder, SessionObserver};
pub use errors::{ChannelError, ResearchError, SessionFailure};
pub use model::{BackendKind, ResearchType, StartOptions};
pub use pacer::{DisplayPacer, DisplayState, TickOutcome};
pub use session::{CompletionKind, Phase, SessionState, ThinkingPhase, ThinkingState};
pub use stream::StreamEvent;
pub use unifier::{ResearchSession, SessionSnapshot, SessionTicket};
