//! The request/ACK protocol state machine.
//!
//! [`Protocol`] decides what goes on the wire: the watch set on every new
//! session, an ACK (or NACK) per processed response, and narrowed follow-ups
//! for dependent types. It does no I/O; the worker sends what it returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::cache::TypedCaches;
use crate::client::config::WatchSet;
use crate::message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Node};
use crate::resource::{self, ResourceType};

/// `google.rpc.Code.INVALID_ARGUMENT`.
const INVALID_ARGUMENT: i32 = 3;

/// Last acknowledged position for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSyncState {
    /// Version of the last accepted response.
    pub version: String,
    /// Nonce of the last processed response.
    pub nonce: String,
    /// When the last response was processed.
    pub last_update: SystemTime,
}

#[derive(Debug)]
pub(crate) struct Protocol {
    node: Node,
    watch: WatchSet,
    /// True until the first request of the current session has been built.
    send_identity: bool,
    sync: HashMap<String, TypeSyncState>,
    received: HashMap<String, Arc<DiscoveryResponse>>,
    sent: HashMap<String, DiscoveryRequest>,
    narrowed: HashMap<ResourceType, Vec<String>>,
    watch_started: Option<Instant>,
    initial_load: Option<Duration>,
}

impl Protocol {
    pub(crate) fn new(node: Node, watch: WatchSet) -> Self {
        Self {
            node,
            watch,
            send_identity: true,
            sync: HashMap::new(),
            received: HashMap::new(),
            sent: HashMap::new(),
            narrowed: HashMap::new(),
            watch_started: None,
            initial_load: None,
        }
    }

    /// A new session is starting: the next request carries the node.
    pub(crate) fn begin_session(&mut self) {
        self.send_identity = true;
    }

    /// Finalize a request for the wire and record it as sent.
    pub(crate) fn outgoing(&mut self, mut request: DiscoveryRequest) -> DiscoveryRequest {
        request.node = if self.send_identity {
            self.send_identity = false;
            Some(self.node.clone())
        } else {
            None
        };
        self.watch_started.get_or_insert_with(Instant::now);
        self.sent.insert(request.type_url.clone(), request.clone());
        request
    }

    /// The watch set, in order, with empty version and nonce.
    ///
    /// Named-subset types carry their current narrowed names.
    pub(crate) fn initial_requests(&mut self) -> Vec<DiscoveryRequest> {
        let requests: Vec<_> = self
            .watch
            .iter()
            .map(|type_url| {
                DiscoveryRequest::new(type_url).with_resource_names(self.subscribed_names(type_url))
            })
            .collect();
        requests.into_iter().map(|r| self.outgoing(r)).collect()
    }

    /// Record a processed response. A rejected response keeps the previous
    /// version and is not retained as received.
    ///
    /// Returns the initial load time when this is the first route response.
    pub(crate) fn record_response(
        &mut self,
        response: &Arc<DiscoveryResponse>,
        accepted: bool,
    ) -> Option<Duration> {
        let type_url = response.type_url.clone();
        let version = if accepted {
            response.version_info.clone()
        } else {
            self.sync
                .get(&type_url)
                .map(|s| s.version.clone())
                .unwrap_or_default()
        };
        self.sync.insert(
            type_url.clone(),
            TypeSyncState {
                version,
                nonce: response.nonce.clone(),
                last_update: SystemTime::now(),
            },
        );
        if !accepted {
            return None;
        }
        self.received.insert(type_url.clone(), Arc::clone(response));

        if self.initial_load.is_none()
            && ResourceType::from_type_url(&type_url) == Some(ResourceType::Route)
        {
            self.initial_load = self.watch_started.map(|started| started.elapsed());
            return self.initial_load;
        }
        None
    }

    /// ACK the last processed response for `type_url`.
    pub(crate) fn ack(&self, type_url: &str) -> DiscoveryRequest {
        let sync = self.sync.get(type_url);
        DiscoveryRequest {
            version_info: sync.map(|s| s.version.clone()).unwrap_or_default(),
            response_nonce: sync.map(|s| s.nonce.clone()).unwrap_or_default(),
            ..DiscoveryRequest::new(type_url).with_resource_names(self.subscribed_names(type_url))
        }
    }

    /// NACK the last processed response for `type_url`, keeping the previous version.
    pub(crate) fn nack(&self, type_url: &str, message: String) -> DiscoveryRequest {
        DiscoveryRequest {
            error_detail: Some(ErrorDetail {
                code: INVALID_ARGUMENT,
                message,
            }),
            ..self.ack(type_url)
        }
    }

    /// Store a dependent type's new name set.
    ///
    /// Returns a follow-up request when the set is non-empty and differs
    /// from what was last requested for the dependent type.
    pub(crate) fn narrow(
        &mut self,
        controlling_type_url: &str,
        dependent: ResourceType,
        names: Vec<String>,
    ) -> Option<DiscoveryRequest> {
        let type_url = dependent.type_url_like(controlling_type_url);
        self.narrowed.insert(dependent, names.clone());
        if names.is_empty() {
            return None;
        }
        if self
            .sent
            .get(&type_url)
            .is_some_and(|last| last.resource_names == names)
        {
            return None;
        }
        let mut request = self.ack(&type_url);
        request.resource_names = names;
        Some(request)
    }

    /// Names a request for `type_url` should carry.
    fn subscribed_names(&self, type_url: &str) -> Vec<String> {
        match ResourceType::from_type_url(type_url) {
            Some(t) if t.is_named_subset() => self.narrowed.get(&t).cloned().unwrap_or_default(),
            _ => self
                .sent
                .get(type_url)
                .map(|r| r.resource_names.clone())
                .unwrap_or_default(),
        }
    }

    /// True once anything was sent and every watched type has a recorded response.
    pub(crate) fn has_synced(&self) -> bool {
        !self.sent.is_empty()
            && self
                .watch
                .iter()
                .all(|w| self.sync.keys().any(|k| resource::equivalent(k, w)))
    }

    pub(crate) fn sync_state(&self) -> HashMap<String, TypeSyncState> {
        self.sync.clone()
    }

    pub(crate) fn sent(&self, type_url: &str) -> Option<DiscoveryRequest> {
        self.sent.get(type_url).cloned()
    }

    /// The last accepted response for `type_url` under either spelling.
    pub(crate) fn received(&self, type_url: &str) -> Option<Arc<DiscoveryResponse>> {
        self.received.get(type_url).cloned().or_else(|| {
            self.received
                .iter()
                .find(|(k, _)| resource::equivalent(k, type_url))
                .map(|(_, v)| Arc::clone(v))
        })
    }

    pub(crate) fn initial_load(&self) -> Option<Duration> {
        self.initial_load
    }
}

/// State shared between the worker and client handles, behind one lock.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) protocol: Protocol,
    pub(crate) caches: TypedCaches,
}
