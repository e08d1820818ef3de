//! Keep-alive tracking for a WebSocket connection.
//!
//! A ping is due when nothing was read for `ping_interval`. Once a ping is
//! out, any inbound frame counts as a reply; silence for `pong_timeout`
//! means the connection is dead.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct HeartbeatState {
    last_message: Instant,
    ping_sent_at: Option<Instant>,
}

/// Heartbeat monitor for one connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    ping_interval: Duration,
    pong_timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatMonitor {
    pub fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            state: Mutex::new(HeartbeatState {
                last_message: Instant::now(),
                ping_sent_at: None,
            }),
        }
    }

    /// Reset on (re)connect.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_message = Instant::now();
        state.ping_sent_at = None;
    }

    pub fn record_ping(&self) {
        self.state.lock().ping_sent_at = Some(Instant::now());
    }

    /// Any inbound frame, including pongs.
    pub fn record_message(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        if let Some(sent) = state.ping_sent_at.take() {
            debug!(rtt_ms = now.duration_since(sent).as_millis() as u64, "Heartbeat answered");
        }
        state.last_message = now;
    }

    pub fn is_waiting_for_pong(&self) -> bool {
        self.state.lock().ping_sent_at.is_some()
    }

    pub fn is_timed_out(&self) -> bool {
        self.is_timed_out_at(Instant::now())
    }

    pub fn is_timed_out_at(&self, now: Instant) -> bool {
        self.state
            .lock()
            .ping_sent_at
            .is_some_and(|sent| now.saturating_duration_since(sent) > self.pong_timeout)
    }

    pub fn should_send_ping(&self) -> bool {
        self.should_send_ping_at(Instant::now())
    }

    pub fn should_send_ping_at(&self, now: Instant) -> bool {
        let state = self.state.lock();
        state.ping_sent_at.is_none()
            && now.saturating_duration_since(state.last_message) >= self.ping_interval
    }

    /// How often the connection loop should evaluate the heartbeat.
    pub fn check_interval(&self) -> Duration {
        (self.ping_interval.min(self.pong_timeout) / 2).max(Duration::from_millis(10))
    }
}
