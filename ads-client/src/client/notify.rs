//! Wake-ups for consumers waiting on updates.
//!
//! The worker publishes into two bounded queues without ever blocking: one
//! carries a [`ResourceType`] tag per applied update, the other the full
//! response. A full queue drops the new item. Consumers re-read the caches
//! for current state; the queues are a wake-up signal, not a data channel.
//!
//! Every session end pushes a closed marker tagged with that session's
//! generation. A wait only honors markers from the generation it started in
//! or later, so a marker left behind by an earlier session never fails a
//! wait on the current one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};
use crate::message::DiscoveryResponse;
use crate::resource::{self, ResourceType};

/// Capacity of each notification queue.
pub(crate) const QUEUE_CAPACITY: usize = 100;

/// A queued notification.
#[derive(Debug)]
enum Event<T> {
    Item(T),
    /// The session with this generation ended.
    SessionEnded(u64),
}

impl<T> Event<T> {
    /// The item, or `Err(Closed)` for a marker at or after `generation`.
    /// Older markers yield `Ok(None)`.
    fn into_item(self, generation: u64) -> Result<Option<T>> {
        match self {
            Event::Item(item) => Ok(Some(item)),
            Event::SessionEnded(ended) if ended < generation => {
                trace!(ended, generation, "skipping closed marker of an earlier session");
                Ok(None)
            }
            Event::SessionEnded(_) => Err(Error::Closed),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Notifier {
    updates_tx: mpsc::Sender<Event<ResourceType>>,
    updates_rx: Mutex<mpsc::Receiver<Event<ResourceType>>>,
    responses_tx: mpsc::Sender<Event<Arc<DiscoveryResponse>>>,
    responses_rx: Mutex<mpsc::Receiver<Event<Arc<DiscoveryResponse>>>>,
    /// Generation of the current session, bumped when it ends.
    session: AtomicU64,
    /// Bumped after every processed response.
    processed: watch::Sender<u64>,
    closed: CancellationToken,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (responses_tx, responses_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            updates_tx,
            updates_rx: Mutex::new(updates_rx),
            responses_tx,
            responses_rx: Mutex::new(responses_rx),
            session: AtomicU64::new(0),
            processed: watch::Sender::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn publish_update(&self, tag: ResourceType) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.updates_tx.try_send(Event::Item(tag)) {
            trace!("update queue full, dropping notification");
        }
    }

    pub(crate) fn publish_response(&self, response: Arc<DiscoveryResponse>) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.responses_tx.try_send(Event::Item(response))
        {
            trace!("response queue full, dropping notification");
        }
    }

    pub(crate) fn processed(&self) {
        self.processed.send_modify(|n| *n += 1);
    }

    /// Push the closed marker into both queues and start a new generation.
    pub(crate) fn session_ended(&self) {
        let generation = self.session.fetch_add(1, Ordering::SeqCst);
        let _ = self.updates_tx.try_send(Event::SessionEnded(generation));
        let _ = self.responses_tx.try_send(Event::SessionEnded(generation));
    }

    /// Close for good: current and future waits return [`Error::Closed`].
    pub(crate) fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.session_ended();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until every wanted tag has been observed, or for the first tag
    /// when `wanted` is empty. Returns the tags observed, in order.
    pub(crate) async fn wait(
        &self,
        timeout: Duration,
        wanted: &[ResourceType],
    ) -> Result<Vec<ResourceType>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let generation = self.session.load(Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        let mut remaining = wanted.to_vec();
        let mut observed = Vec::new();

        let outcome = tokio::select! {
            _ = self.closed.cancelled() => return Err(Error::Closed),
            outcome = tokio::time::timeout_at(
                deadline,
                self.collect_updates(generation, &mut remaining, &mut observed),
            ) => outcome,
        };
        match outcome {
            Ok(result) => result.map(|()| observed),
            Err(_) => Err(Error::Timeout(
                remaining.iter().map(ToString::to_string).collect(),
            )),
        }
    }

    async fn collect_updates(
        &self,
        generation: u64,
        remaining: &mut Vec<ResourceType>,
        observed: &mut Vec<ResourceType>,
    ) -> Result<()> {
        let mut rx = self.updates_rx.lock().await;
        loop {
            let Some(event) = rx.recv().await else {
                return Err(Error::Closed);
            };
            let Some(tag) = event.into_item(generation)? else {
                continue;
            };
            remaining.retain(|w| *w != tag);
            observed.push(tag);
            if remaining.is_empty() {
                return Ok(());
            }
        }
    }

    /// Wait for a response for `type_url` whose version differs from `baseline`.
    ///
    /// `cached` is the last accepted response for the type. It is returned
    /// immediately when `baseline` is empty or differs from its version.
    pub(crate) async fn wait_for_version(
        &self,
        timeout: Duration,
        type_url: &str,
        baseline: &str,
        cached: Option<Arc<DiscoveryResponse>>,
    ) -> Result<Arc<DiscoveryResponse>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let generation = self.session.load(Ordering::SeqCst);
        if let Some(cached) = cached {
            if baseline.is_empty() || cached.version_info != baseline {
                return Ok(cached);
            }
        }

        let wait = async {
            let mut rx = self.responses_rx.lock().await;
            loop {
                let Some(event) = rx.recv().await else {
                    return Err(Error::Closed);
                };
                let response = match event.into_item(generation) {
                    Ok(Some(response)) => response,
                    Ok(None) => continue,
                    Err(e) => return Err(e),
                };
                if resource::equivalent(&response.type_url, type_url)
                    && response.version_info != baseline
                {
                    return Ok(response);
                }
            }
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            outcome = tokio::time::timeout(timeout, wait) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(vec![type_url.to_string()])),
            },
        }
    }

    /// Wait until `synced` returns true, re-checking after every processed
    /// response. Returns false on timeout or close.
    pub(crate) async fn wait_until(&self, timeout: Duration, synced: impl Fn() -> bool) -> bool {
        let mut processed = self.processed.subscribe();
        let wait = async {
            loop {
                if synced() {
                    return true;
                }
                if processed.changed().await.is_err() {
                    return synced();
                }
            }
        };
        tokio::select! {
            _ = self.closed.cancelled() => synced(),
            outcome = tokio::time::timeout(timeout, wait) => outcome.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(type_url: &str, version: &str) -> Arc<DiscoveryResponse> {
        Arc::new(DiscoveryResponse {
            version_info: version.to_string(),
            resources: vec![],
            type_url: type_url.to_string(),
            nonce: "n".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_collects_all_wanted() {
        let notifier = Notifier::new();
        notifier.publish_update(ResourceType::Cluster);
        notifier.publish_update(ResourceType::Endpoint);
        notifier.publish_update(ResourceType::Listener);

        let observed = notifier
            .wait(
                Duration::from_secs(5),
                &[ResourceType::Listener, ResourceType::Cluster],
            )
            .await
            .unwrap();
        assert_eq!(
            observed,
            vec![
                ResourceType::Cluster,
                ResourceType::Endpoint,
                ResourceType::Listener
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_empty_returns_first() {
        let notifier = Notifier::new();
        notifier.publish_update(ResourceType::Route);
        notifier.publish_update(ResourceType::Cluster);
        let observed = notifier.wait(Duration::from_secs(1), &[]).await.unwrap();
        assert_eq!(observed, vec![ResourceType::Route]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_lists_remaining() {
        let notifier = Notifier::new();
        notifier.publish_update(ResourceType::Cluster);
        let err = notifier
            .wait(
                Duration::from_secs(5),
                &[ResourceType::Cluster, ResourceType::Route],
            )
            .await
            .unwrap_err();
        match err {
            Error::Timeout(remaining) => assert_eq!(remaining, vec!["rds".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_wakes_waiter() {
        let notifier = Arc::new(Notifier::new());
        let waiter = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move {
                notifier
                    .wait(Duration::from_secs(60), &[ResourceType::Listener])
                    .await
            })
        };
        tokio::task::yield_now().await;
        notifier.session_ended();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_session_end_does_not_fail_later_wait() {
        let notifier = Notifier::new();
        notifier.session_ended();
        notifier.publish_update(ResourceType::Cluster);
        notifier.publish_response(response("t", "2"));

        let observed = notifier
            .wait(Duration::from_secs(1), &[ResourceType::Cluster])
            .await
            .unwrap();
        assert_eq!(observed, vec![ResourceType::Cluster]);
        let got = notifier
            .wait_for_version(Duration::from_secs(1), "t", "1", None)
            .await
            .unwrap();
        assert_eq!(got.version_info, "2");

        // a waiter from the current generation still sees the next end
        let notifier = Arc::new(notifier);
        let waiter = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move { notifier.wait(Duration::from_secs(60), &[]).await })
        };
        tokio::task::yield_now().await;
        notifier.session_ended();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_returns_immediately() {
        let notifier = Notifier::new();
        notifier.close();
        notifier.close();
        assert!(matches!(
            notifier.wait(Duration::from_secs(1), &[]).await,
            Err(Error::Closed)
        ));
        assert!(matches!(
            notifier
                .wait_for_version(Duration::from_secs(1), "t", "", None)
                .await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_flood_never_blocks() {
        let notifier = Notifier::new();
        for _ in 0..(QUEUE_CAPACITY * 3) {
            notifier.publish_update(ResourceType::Endpoint);
            notifier.publish_response(response("t", "1"));
        }
        notifier.session_ended();

        let observed = notifier.wait(Duration::from_secs(1), &[]).await.unwrap();
        assert_eq!(observed, vec![ResourceType::Endpoint]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_version_baseline() {
        let notifier = Notifier::new();
        let cached = response("t", "1");

        let got = notifier
            .wait_for_version(Duration::from_secs(1), "t", "", Some(Arc::clone(&cached)))
            .await
            .unwrap();
        assert_eq!(got.version_info, "1");

        let got = notifier
            .wait_for_version(Duration::from_secs(1), "t", "0", Some(Arc::clone(&cached)))
            .await
            .unwrap();
        assert_eq!(got.version_info, "1");

        // same version again, then another type, then a new version
        notifier.publish_response(response("t", "1"));
        notifier.publish_response(response("other", "2"));
        notifier.publish_response(response("t", "2"));
        let got = notifier
            .wait_for_version(Duration::from_secs(1), "t", "1", Some(cached))
            .await
            .unwrap();
        assert_eq!(got.version_info, "2");

        assert!(matches!(
            notifier
                .wait_for_version(Duration::from_secs(1), "t", "2", None)
                .await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until() {
        let notifier = Arc::new(Notifier::new());
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let waiter = {
            let notifier = Arc::clone(&notifier);
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                notifier
                    .wait_until(Duration::from_secs(10), || {
                        flag.load(std::sync::atomic::Ordering::SeqCst)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        notifier.processed();
        assert!(waiter.await.unwrap());

        assert!(!notifier.wait_until(Duration::from_secs(1), || false).await);
    }
}
