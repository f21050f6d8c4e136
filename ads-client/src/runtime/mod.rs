//! Task spawning and timers, abstracted so reconnect backoff can be driven
//! without real wall-clock waits in tests.

use std::future::Future;
use std::time::Duration;

pub mod tokio;

/// Async runtime operations used by the client.
pub trait Runtime: Send + Sync + Clone + 'static {
    /// Spawn a future to run in the background.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
