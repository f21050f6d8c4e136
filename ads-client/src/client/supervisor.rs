//! Reconnection state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Disconnected -> (pause) -> Connecting ...
//!                     |
//!                     +-> BackingOff -> Connecting
//! ```
//!
//! Any state moves to `Closed` on explicit close, or when a bounded retry
//! policy is exhausted. The supervisor only tracks state and computes
//! delays; the worker performs the I/O and the sleeping.

use std::time::Duration;

use tokio::sync::watch;

use crate::client::retry::{Backoff, RetryPolicy};

/// Pause between the end of a session and the next connect attempt.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Connection state of the client, as observed through [`AdsClient::state`].
///
/// [`AdsClient::state`]: crate::AdsClient::state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; a connect attempt follows.
    Disconnected,
    /// Dialing and opening the stream.
    Connecting,
    /// A session is up and the watch set has been sent.
    Streaming,
    /// Waiting before the next connect attempt.
    BackingOff,
    /// Terminal.
    Closed,
}

#[derive(Debug)]
pub(crate) struct Supervisor {
    state: watch::Sender<ConnectionState>,
    backoff: Backoff,
}

impl Supervisor {
    pub(crate) fn new(policy: RetryPolicy, state: watch::Sender<ConnectionState>) -> Self {
        state.send_replace(ConnectionState::Disconnected);
        Self {
            state,
            backoff: Backoff::new(policy),
        }
    }

    fn transition(&self, to: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == to {
                return false;
            }
            *current = to;
            true
        });
    }

    pub(crate) fn connecting(&mut self) {
        self.transition(ConnectionState::Connecting);
    }

    /// The stream is open; the next failure starts from the initial delay.
    pub(crate) fn connected(&mut self) {
        self.backoff.reset();
        self.transition(ConnectionState::Streaming);
    }

    /// A connect attempt failed. Returns the delay before the next attempt,
    /// or `None` when retries are exhausted and the supervisor is closed.
    pub(crate) fn connect_failed(&mut self) -> Option<Duration> {
        match self.backoff.next_backoff() {
            Some(delay) => {
                self.transition(ConnectionState::BackingOff);
                Some(delay)
            }
            None => {
                self.close();
                None
            }
        }
    }

    /// The stream ended. Returns the pause before the next connect attempt.
    pub(crate) fn stream_ended(&mut self) -> Duration {
        self.transition(ConnectionState::Disconnected);
        RECONNECT_DELAY
    }

    pub(crate) fn close(&mut self) {
        self.transition(ConnectionState::Closed);
    }
}
