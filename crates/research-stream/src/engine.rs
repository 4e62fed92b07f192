use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::{self, Channel};
use crate::config::EngineConfig;
use crate::errors::{ResearchError, SessionFailure};
use crate::model::BackendKind;
use crate::session::ThinkingState;
use crate::unifier::ResearchSession;

/// UI-side collaborator notified about reasoning traces and failures.
///
/// Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    /// A session's thinking trace was created or changed.
    fn set_thinking_state(&self, _session_id: &str, _state: &ThinkingState) {}

    /// A session's thinking trace should disappear.
    fn clear_thinking_state(&self, _session_id: &str) {}

    /// A session failed with a user-visible error.
    fn notify_error(&self, _session_id: &str, _failure: &SessionFailure) {}

    /// The paced display reached the end of the buffered text, either by
    /// ticking or through a fast-forward. Fires again each time the buffer
    /// grows and the display catches up once more.
    fn display_caught_up(&self, _session_id: &str, _displayed_chars: usize) {}
}

struct NoopObserver;

impl SessionObserver for NoopObserver {}

pub(crate) struct EngineInner {
    channels: HashMap<BackendKind, Arc<dyn Channel>>,
    pub(crate) config: EngineConfig,
    pub(crate) observer: Arc<dyn SessionObserver>,
}

impl EngineInner {
    pub(crate) fn channel(&self, backend: BackendKind) -> Option<Arc<dyn Channel>> {
        self.channels.get(&backend).cloned()
    }
}

/// Entry point for creating research sessions.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Starts a builder for registering channels and creating an `Engine`.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Creates an idle session handle.
    pub fn session(&self) -> ResearchSession {
        ResearchSession::new(self.inner.clone())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns true when a channel is registered for `backend`.
    pub fn supports(&self, backend: BackendKind) -> bool {
        self.inner.channels.contains_key(&backend)
    }
}

/// Builder used to register channels before creating an `Engine`.
#[derive(Default)]
pub struct EngineBuilder {
    channels: Vec<Arc<dyn Channel>>,
    config: Option<EngineConfig>,
    observer: Option<Arc<dyn SessionObserver>>,
    default_channels: bool,
}

impl EngineBuilder {
    /// Registers a channel.
    ///
    /// Register one channel per backend kind.
    pub fn register_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Registers the built-in socket and event-stream channels for every
    /// backend that has no explicit registration.
    pub fn with_default_channels(mut self) -> Self {
        self.default_channels = true;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Builds the engine, validating the config and channel registration
    /// (including duplicates).
    pub fn build(self) -> Result<Engine, ResearchError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut channels: HashMap<BackendKind, Arc<dyn Channel>> = HashMap::new();
        for channel in self.channels {
            let kind = channel.kind();
            if channels.insert(kind, channel).is_some() {
                return Err(ResearchError::Config(format!(
                    "duplicate channel registration: {kind}"
                )));
            }
        }
        if self.default_channels {
            for kind in [BackendKind::Socket, BackendKind::EventStream] {
                if !channels.contains_key(&kind) {
                    channels.insert(kind, channel::from_config(kind, &config)?);
                }
            }
        }

        tracing::debug!(channels = channels.len(), "research engine built");
        Ok(Engine {
            inner: Arc::new(EngineInner {
                channels,
                config,
                observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelHandle, ChannelRequest};
    use crate::errors::ChannelError;

    struct DummyChannel;

    #[async_trait::async_trait]
    impl Channel for DummyChannel {
        fn kind(&self) -> BackendKind {
            BackendKind::Socket
        }

        async fn open(&self, _request: &ChannelRequest) -> Result<ChannelHandle, ChannelError> {
            unreachable!("not used in this test")
        }
    }

    #[test]
    fn build_rejects_duplicate_channels() {
        let result = Engine::builder()
            .register_channel(Arc::new(DummyChannel))
            .register_channel(Arc::new(DummyChannel))
            .build();
        assert!(
            matches!(result, Err(ResearchError::Config(message)) if message.contains("duplicate channel"))
        );
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = Engine::builder()
            .config(EngineConfig::default().reveal_rate(0))
            .build();
        assert!(matches!(result, Err(ResearchError::Config(_))));
    }

    #[test]
    fn default_channels_fill_missing_backends_only() {
        let engine = Engine::builder()
            .register_channel(Arc::new(DummyChannel))
            .with_default_channels()
            .build()
            .expect("engine");
        assert!(engine.supports(BackendKind::Socket));
        assert!(engine.supports(BackendKind::EventStream));

        let bare = Engine::builder().build().expect("engine");
        assert!(!bare.supports(BackendKind::Socket));
    }
}
