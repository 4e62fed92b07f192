//! Liveness supervision for a running session.
//!
//! Owns the heartbeat clock used by the socket channel, the absolute session
//! deadline, the post-completion timers, and the open channel handle. All of
//! them are released together by [`Supervisor::dispose`], which is safe to
//! call from every exit path and any number of times.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::channel::ChannelHandle;

/// Builds the ping clock. The first tick fires one full period after start.
pub fn heartbeat_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Keep-alive frame sent on the socket channel.
pub fn heartbeat_frame() -> serde_json::Value {
    serde_json::json!({
        "type": "ping",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
}

/// How long to hold a completed session's result so the display can finish:
/// `max(min_delay, chars / reveal_rate)`.
pub fn resolve_delay(char_count: usize, reveal_rate: u32, min_delay: Duration) -> Duration {
    let rate = u64::from(reveal_rate.max(1));
    let reveal = Duration::from_millis((char_count as u64).saturating_mul(1000) / rate);
    reveal.max(min_delay)
}

/// Sleeps until `at`, or forever when no deadline is armed.
pub(crate) async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Scoped owner of one session's timers and channel handle.
pub(crate) struct Supervisor {
    session_id: String,
    started: Instant,
    deadline: Option<Instant>,
    resolve_at: Option<Instant>,
    thinking_clear_at: Option<Instant>,
    link: Option<ChannelHandle>,
    disposed: bool,
}

impl Supervisor {
    pub fn new(session_id: impl Into<String>, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            session_id: session_id.into(),
            started,
            deadline: Some(started + timeout),
            resolve_at: None,
            thinking_clear_at: None,
            link: None,
            disposed: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn resolve_at(&self) -> Option<Instant> {
        self.resolve_at
    }

    pub fn thinking_clear_at(&self) -> Option<Instant> {
        self.thinking_clear_at
    }

    /// Takes ownership of an open channel. A disposed supervisor closes it on
    /// the spot.
    pub fn attach(&mut self, mut handle: ChannelHandle) {
        if self.disposed {
            handle.close();
            return;
        }
        if let Some(mut previous) = self.link.replace(handle) {
            previous.close();
        }
    }

    pub fn link_mut(&mut self) -> Option<&mut ChannelHandle> {
        self.link.as_mut()
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Closes and forgets the current channel, if any.
    pub fn release_link(&mut self) -> bool {
        match self.link.take() {
            Some(mut handle) => handle.close(),
            None => false,
        }
    }

    /// The session reached a terminal phase; the absolute ceiling no longer applies.
    pub fn disarm_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn schedule_resolve(&mut self, delay: Duration) {
        if !self.disposed {
            self.resolve_at = Some(Instant::now() + delay);
        }
    }

    /// Pulls a pending resolution forward to now.
    pub fn expedite_resolve(&mut self) {
        if self.resolve_at.is_some() {
            self.resolve_at = Some(Instant::now());
        }
    }

    pub fn clear_resolve(&mut self) {
        self.resolve_at = None;
    }

    pub fn schedule_thinking_clear(&mut self, grace: Duration) {
        if !self.disposed {
            self.thinking_clear_at = Some(Instant::now() + grace);
        }
    }

    pub fn clear_thinking_timer(&mut self) {
        self.thinking_clear_at = None;
    }

    /// True when nothing is left to wait for.
    pub fn is_settled(&self) -> bool {
        self.link.is_none()
            && self.deadline.is_none()
            && self.resolve_at.is_none()
            && self.thinking_clear_at.is_none()
    }

    /// Cancels every timer and closes the channel. Returns `false` when the
    /// supervisor was already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        let closed = self.release_link();
        self.deadline = None;
        self.resolve_at = None;
        self.thinking_clear_at = None;
        debug!(session_id = %self.session_id, closed_channel = closed, "session resources released");
        true
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackendKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_handle(closes: &Arc<AtomicUsize>) -> ChannelHandle {
        let counter = closes.clone();
        ChannelHandle::new(BackendKind::Socket, Box::pin(futures::stream::pending()))
            .with_closer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
    }

    #[test]
    fn resolve_delay_has_one_second_floor() {
        let floor = Duration::from_secs(1);
        assert_eq!(resolve_delay(10, 150, floor), floor);
        assert_eq!(resolve_delay(300, 150, floor), Duration::from_secs(2));
    }

    #[test]
    fn heartbeat_frame_is_a_typed_ping() {
        let frame = heartbeat_frame();
        assert_eq!(frame["type"], "ping");
        assert!(frame["timestamp"].as_i64().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_skips_the_immediate_tick() {
        let start = Instant::now();
        let mut ticker = heartbeat_interval(Duration::from_secs(30));
        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_is_idempotent_and_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new("s-1", Duration::from_secs(720));
        supervisor.attach(counted_handle(&closes));
        supervisor.schedule_resolve(Duration::from_secs(1));
        supervisor.schedule_thinking_clear(Duration::from_secs(2));

        assert!(supervisor.dispose());
        assert!(!supervisor.dispose());
        drop(supervisor);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_supervisor_rejects_new_work() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new("s-2", Duration::from_secs(5));
        supervisor.dispose();
        supervisor.attach(counted_handle(&closes));
        supervisor.schedule_resolve(Duration::from_secs(1));

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!supervisor.has_link());
        assert!(supervisor.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_the_link_closes_the_previous_one() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new("s-3", Duration::from_secs(5));
        supervisor.attach(counted_handle(&closes));
        supervisor.attach(counted_handle(&closes));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(supervisor.release_link());
        assert!(!supervisor.release_link());
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_after_timeout() {
        let supervisor = Supervisor::new("s-4", Duration::from_secs(720));
        sleep_until_opt(supervisor.deadline()).await;
        assert!(supervisor.elapsed() >= Duration::from_secs(720));
    }
}
