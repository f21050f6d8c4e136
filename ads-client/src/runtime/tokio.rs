//! `tokio` runtime.

use std::future::Future;
use std::time::Duration;

use crate::runtime::Runtime;

/// Spawns onto the ambient tokio runtime and sleeps with `tokio::time`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
