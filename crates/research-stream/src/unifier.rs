use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument as _, debug, info};

use crate::channel::{Channel, ChannelHandle, ChannelRequest, RawMessage};
use crate::engine::EngineInner;
use crate::errors::{
    ChannelError, ResearchError, SessionFailure, session_failure_from_channel_error,
};
use crate::model::{BackendKind, StartOptions};
use crate::pacer::{DisplayPacer, DisplayState, TickOutcome};
use crate::protocol::{self, Normalizer};
use crate::session::{CompletionKind, Phase, SessionState};
use crate::stream::StreamEvent;
use crate::supervisor::{Supervisor, resolve_delay, sleep_until_opt};

/// Merged view of one session: authoritative state plus the paced display.
///
/// `display.displayed_text` is always a prefix of `state.buffered_text`.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SessionSnapshot {
    pub backend: Option<BackendKind>,
    #[serde(flatten)]
    pub state: SessionState,
    #[serde(flatten)]
    pub display: DisplayState,
}

impl SessionSnapshot {
    /// The view of a session handle with nothing running.
    pub fn idle() -> Self {
        Self {
            backend: None,
            state: SessionState::new(""),
            display: DisplayState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }
}

type TicketResult = Result<String, ResearchError>;

/// Awaitable outcome of one started session.
///
/// Resolves with the final buffered text once the session completes and the
/// display had time to catch up, or with the session's failure.
pub struct SessionTicket {
    session_id: String,
    rx: oneshot::Receiver<TicketResult>,
}

impl SessionTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Waits for the session to settle.
    ///
    /// A session whose owner was dropped reports `Cancelled`.
    pub async fn wait(self) -> Result<String, ResearchError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(ResearchError::failed(SessionFailure::Cancelled)))
    }
}

enum Command {
    Stop { done: oneshot::Sender<()> },
    Reset { done: oneshot::Sender<()> },
    Feedback { text: String },
    FastForward,
}

struct ActiveSession {
    id: String,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Caller-facing handle that runs one research session at a time.
///
/// Starting a new session resets the previous one. Dropping the handle tears
/// down the running session and closes its connection.
pub struct ResearchSession {
    engine: Arc<EngineInner>,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    active: Option<ActiveSession>,
}

impl ResearchSession {
    pub(crate) fn new(engine: Arc<EngineInner>) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::idle());
        Self {
            engine,
            snapshots: Arc::new(snapshots),
            active: None,
        }
    }

    /// Validates the request, resets any running session, and starts a new one.
    pub async fn start(
        &mut self,
        query: impl Into<String>,
        backend: BackendKind,
        options: StartOptions,
    ) -> Result<SessionTicket, ResearchError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ResearchError::Validation("query must not be empty".into()));
        }
        let engine = self.engine.clone();
        let channel = engine
            .channel(backend)
            .ok_or(ResearchError::BackendNotFound { backend })?;
        let config = &engine.config;
        let reveal_rate = options.reveal_rate.unwrap_or(config.reveal_rate);
        if reveal_rate == 0 {
            return Err(ResearchError::Validation(
                "reveal_rate must be greater than 0".into(),
            ));
        }
        let timeout = options.timeout.unwrap_or(config.session_timeout);
        if timeout.is_zero() {
            return Err(ResearchError::Validation(
                "timeout must be greater than 0".into(),
            ));
        }

        self.reset().await;

        let session_id = options
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let request = ChannelRequest {
            session_id: session_id.clone(),
            query,
            options: options.backend_options_value(backend).cloned(),
            feedback: None,
        };

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_capacity);
        let (ticket_tx, ticket_rx) = oneshot::channel();
        let actor = SessionActor {
            engine: engine.clone(),
            channel,
            backend,
            request,
            state: SessionState::new(session_id.clone()),
            pacer: DisplayPacer::new(reveal_rate, config.frame_rate),
            normalizer: Normalizer::new(),
            supervisor: Supervisor::new(session_id.clone(), timeout),
            snapshots: self.snapshots.clone(),
            ticket: Some(ticket_tx),
        };
        let span = tracing::info_span!("research_session", session_id = %session_id, backend = %backend);
        let task = tokio::spawn(actor.run(command_rx).instrument(span));
        info!(session_id = %session_id, backend = %backend, "research session started");

        self.active = Some(ActiveSession {
            id: session_id.clone(),
            commands: command_tx,
            task,
        });
        Ok(SessionTicket {
            session_id,
            rx: ticket_rx,
        })
    }

    /// Cancels the running session. Its ticket rejects with `Cancelled` and
    /// the snapshot keeps the partial text. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let (done, acked) = oneshot::channel();
        if active.commands.send(Command::Stop { done }).await.is_ok() {
            let _ = acked.await;
        }
        let _ = active.task.await;
    }

    /// Abandons the running session and returns to idle. Its ticket resolves
    /// with `Superseded`. Calling it again is a no-op.
    pub async fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            let (done, acked) = oneshot::channel();
            if active.commands.send(Command::Reset { done }).await.is_ok() {
                let _ = acked.await;
            }
            let _ = active.task.await;
            debug!(session_id = %active.id, "research session reset");
        }
        self.snapshots.send_replace(SessionSnapshot::idle());
    }

    /// Answers a backend that paused for feedback. Ignored when the session
    /// is not waiting or its backend cannot take feedback.
    pub async fn send_feedback(&self, text: impl Into<String>) {
        if let Some(active) = &self.active {
            let text = text.into();
            let _ = active.commands.send(Command::Feedback { text }).await;
        }
    }

    /// Reveals everything buffered so far and releases a pending resolution.
    pub async fn fast_forward(&self) {
        if let Some(active) = &self.active {
            let _ = active.commands.send(Command::FastForward).await;
        }
    }

    /// Id of the most recently started session that is still owned.
    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.id.as_str())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }
}

impl Drop for ResearchSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

enum Flow {
    Continue,
    Reopen,
    Exit,
}

struct SessionActor {
    engine: Arc<EngineInner>,
    channel: Arc<dyn Channel>,
    backend: BackendKind,
    request: ChannelRequest,
    state: SessionState,
    pacer: DisplayPacer,
    normalizer: Normalizer,
    supervisor: Supervisor,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    ticket: Option<oneshot::Sender<TicketResult>>,
}

type PendingOpen = BoxFuture<'static, Result<ChannelHandle, ChannelError>>;

fn open_link(channel: Arc<dyn Channel>, request: ChannelRequest) -> PendingOpen {
    Box::pin(async move { channel.open(&request).await })
}

async fn await_open(opening: &mut Option<PendingOpen>) -> Result<ChannelHandle, ChannelError> {
    match opening.as_mut() {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn next_raw(link: Option<&mut ChannelHandle>) -> Option<Result<RawMessage, ChannelError>> {
    match link {
        Some(link) => link.next_message().await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let frame_period = Duration::from_secs(1) / self.pacer.frame_rate();
        let mut frames = tokio::time::interval(frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.apply(StreamEvent::Connecting);
        self.pacer.resume();
        self.publish();
        let mut opening = Some(open_link(self.channel.clone(), self.request.clone()));

        loop {
            if self.state.is_terminal() {
                opening = None;
            }
            if self.is_settled() {
                break;
            }

            let revealing =
                self.pacer.is_running() && self.pacer.has_pending(&self.state.buffered_text);
            let deadline = self.supervisor.deadline();
            let resolve_at = self.supervisor.resolve_at();
            let thinking_clear_at = self.supervisor.thinking_clear_at();

            tokio::select! {
                command = commands.recv() => {
                    match self.on_command(command) {
                        Flow::Continue => {}
                        Flow::Reopen => {
                            opening = Some(open_link(self.channel.clone(), self.request.clone()));
                        }
                        Flow::Exit => return,
                    }
                }
                opened = await_open(&mut opening) => {
                    opening = None;
                    match opened {
                        Ok(handle) => {
                            debug!(backend = %self.backend, "channel open");
                            self.supervisor.attach(handle);
                        }
                        Err(err) => self.fail(session_failure_from_channel_error(&err)),
                    }
                }
                message = next_raw(self.supervisor.link_mut()) => {
                    match message {
                        Some(Ok(raw)) => self.on_raw(raw),
                        Some(Err(err)) => self.fail(session_failure_from_channel_error(&err)),
                        None => self.on_link_end(),
                    }
                }
                _ = frames.tick(), if revealing => {
                    if self.tick_display() == TickOutcome::Idle {
                        continue;
                    }
                }
                _ = sleep_until_opt(deadline) => self.on_deadline(),
                _ = sleep_until_opt(resolve_at) => {
                    self.supervisor.clear_resolve();
                    let text = self.state.buffered_text.clone();
                    self.settle(Ok(text));
                }
                _ = sleep_until_opt(thinking_clear_at) => {
                    self.supervisor.clear_thinking_timer();
                    self.clear_thinking();
                }
            }
            self.publish();
        }

        self.supervisor.dispose();
        self.publish();
        debug!(session_id = %self.state.id, "session actor finished");
    }

    fn is_settled(&self) -> bool {
        self.state.is_terminal()
            && self.ticket.is_none()
            && self.supervisor.is_settled()
            && !self.pacer.has_pending(&self.state.buffered_text)
    }

    fn on_command(&mut self, command: Option<Command>) -> Flow {
        match command {
            Some(Command::Stop { done }) => {
                if self.state.is_terminal() {
                    let text = self.state.buffered_text.clone();
                    self.settle(Ok(text));
                } else {
                    self.fail(SessionFailure::Cancelled);
                }
                self.fast_forward_display();
                self.clear_thinking();
                self.supervisor.dispose();
                self.publish();
                let _ = done.send(());
                Flow::Exit
            }
            Some(Command::Reset { done }) => {
                self.teardown_superseded();
                let _ = done.send(());
                Flow::Exit
            }
            None => {
                self.teardown_superseded();
                Flow::Exit
            }
            Some(Command::Feedback { text }) => {
                if !self.channel.supports_feedback() || self.supervisor.has_link() {
                    debug!(backend = %self.backend, "feedback ignored");
                    return Flow::Continue;
                }
                match self.state.take_feedback_request() {
                    Some(request) => {
                        info!(feedback_id = %request.id, "resuming session with feedback");
                        self.request.feedback = Some(text);
                        Flow::Reopen
                    }
                    None => {
                        debug!("feedback ignored, session is not waiting");
                        Flow::Continue
                    }
                }
            }
            Some(Command::FastForward) => {
                self.fast_forward_display();
                if self.state.phase == Phase::Complete {
                    self.supervisor.expedite_resolve();
                }
                Flow::Continue
            }
        }
    }

    fn teardown_superseded(&mut self) {
        self.settle(Err(ResearchError::Superseded));
        self.clear_thinking();
        self.supervisor.dispose();
    }

    fn on_raw(&mut self, raw: RawMessage) {
        let decoded = protocol::decode(self.backend, &raw);
        debug!(events = decoded.len(), event = ?raw.event, "frame decoded");
        for event in self.normalizer.push_all(decoded) {
            self.apply(event);
            if self.state.is_terminal() {
                break;
            }
        }
    }

    fn apply(&mut self, event: StreamEvent) {
        let pauses = matches!(event, StreamEvent::AwaitingFeedback(_));
        let outcome = self.state.fold(event);
        if self.pacer.is_fast_forwarded() {
            self.fast_forward_display();
        }
        if outcome.thinking_changed {
            self.sync_thinking();
        }
        if pauses && outcome.applied {
            self.pause_for_feedback();
        }
        if outcome.terminal {
            self.on_terminal();
        }
    }

    fn pause_for_feedback(&mut self) {
        if !self.channel.supports_feedback() {
            return;
        }
        info!(backend = %self.backend, "waiting for caller feedback");
        self.supervisor.release_link();
    }

    fn on_link_end(&mut self) {
        self.supervisor.release_link();
        if self.state.is_terminal() {
            return;
        }
        if self.state.awaiting_feedback.is_some() {
            debug!("stream ended while waiting for feedback");
            return;
        }
        let outcome = if self.state.buffered_text.is_empty() {
            self.state.fail(SessionFailure::Connection {
                message: format!(
                    "{} stream closed before any content was received",
                    self.backend
                ),
            })
        } else {
            self.state.complete(CompletionKind::ServerClosed)
        };
        self.after_transition(outcome.thinking_changed, outcome.terminal);
    }

    fn on_deadline(&mut self) {
        self.supervisor.disarm_deadline();
        if self.state.is_terminal() {
            return;
        }
        let outcome = if self.state.buffered_text.is_empty() {
            self.state.fail(SessionFailure::Timeout {
                elapsed_secs: self.supervisor.elapsed().as_secs(),
            })
        } else {
            info!(chars = self.state.char_count(), "session timed out, keeping partial text");
            self.state.complete(CompletionKind::TimedOut)
        };
        self.after_transition(outcome.thinking_changed, outcome.terminal);
    }

    fn fail(&mut self, failure: SessionFailure) {
        let outcome = self.state.fail(failure);
        self.after_transition(outcome.thinking_changed, outcome.terminal);
    }

    fn after_transition(&mut self, thinking_changed: bool, terminal: bool) {
        if thinking_changed {
            self.sync_thinking();
        }
        if terminal {
            self.on_terminal();
        }
    }

    fn on_terminal(&mut self) {
        self.supervisor.release_link();
        self.supervisor.disarm_deadline();
        match self.state.error.clone() {
            Some(failure) => {
                self.fast_forward_display();
                if failure != SessionFailure::Cancelled {
                    self.engine
                        .observer
                        .notify_error(&self.state.id, &failure);
                }
                self.settle(Err(ResearchError::failed(failure)));
            }
            None => {
                let config = &self.engine.config;
                let delay = resolve_delay(
                    self.state.char_count(),
                    self.pacer.rate(),
                    config.min_resolve_delay,
                );
                let grace = config.thinking_grace;
                self.supervisor.schedule_resolve(delay);
                if self.pacer.is_fast_forwarded() {
                    self.supervisor.expedite_resolve();
                }
                if self.state.thinking.is_some() {
                    self.supervisor.schedule_thinking_clear(grace);
                }
            }
        }
    }

    fn tick_display(&mut self) -> TickOutcome {
        let outcome = self.pacer.tick(&self.state.buffered_text);
        if outcome == TickOutcome::CaughtUp {
            self.notify_caught_up();
        }
        outcome
    }

    fn fast_forward_display(&mut self) {
        if self.pacer.fast_forward(&self.state.buffered_text) {
            self.notify_caught_up();
        }
    }

    fn notify_caught_up(&self) {
        debug!(chars = self.state.char_count(), "display caught up");
        self.engine
            .observer
            .display_caught_up(&self.state.id, self.state.char_count());
    }

    fn settle(&mut self, result: TicketResult) {
        if let Some(ticket) = self.ticket.take() {
            let _ = ticket.send(result);
        }
    }

    fn sync_thinking(&self) {
        if let Some(thinking) = &self.state.thinking {
            self.engine
                .observer
                .set_thinking_state(&self.state.id, thinking);
        }
    }

    fn clear_thinking(&mut self) {
        if self.state.clear_thinking() {
            self.engine.observer.clear_thinking_state(&self.state.id);
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(SessionSnapshot {
            backend: Some(self.backend),
            state: self.state.clone(),
            display: self.pacer.display_state(&self.state.buffered_text),
        });
    }
}
