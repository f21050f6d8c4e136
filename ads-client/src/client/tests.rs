//! End-to-end tests of the client against the in-memory transport.

use std::time::Duration;

use bytes::Bytes;

use super::*;
use crate::client::config::{NodeIdentity, WatchSet};
use crate::client::retry::RetryPolicy;
use crate::client::supervisor::RECONNECT_DELAY;
use crate::codec::prost::ProstCodec;
use crate::proto::discovery;
use crate::resource::{CLUSTER, ENDPOINT, LISTENER, MESH_CONFIG, ROUTE, v2};
use crate::runtime::tokio::TokioRuntime;
use crate::testutil::{self, MockServer, MockSession, RecordingRuntime, mock_transport};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> ClientConfig {
    let node = NodeIdentity::default().with_ip("10.0.0.1".parse().unwrap());
    ClientConfig::new(node, "mock:15010")
}

fn start(config: ClientConfig) -> (AdsClient, MockServer) {
    let (transport, server) = mock_transport();
    let client = AdsClient::builder(config, transport, ProstCodec, TokioRuntime).start();
    (client, server)
}

/// Accept a session and consume the watch set.
async fn open_session(
    server: &mut MockServer,
    watched: usize,
) -> (MockSession, Vec<discovery::DiscoveryRequest>) {
    let mut session = server.accept().await;
    let initial = session.next_requests(watched).await;
    (session, initial)
}

#[tokio::test]
async fn test_watch_set_sent_with_identity_once() {
    let (client, mut server) = start(config());
    let (_session, initial) = open_session(&mut server, 4).await;

    let types: Vec<_> = initial.iter().map(|r| r.type_url.as_str()).collect();
    assert_eq!(types, [CLUSTER, ENDPOINT, LISTENER, ROUTE]);
    assert_eq!(
        initial[0].node.as_ref().unwrap().id,
        "sidecar~10.0.0.1~test-1.default~default.svc.cluster.local"
    );
    assert!(initial[1..].iter().all(|r| r.node.is_none()));
    assert!(
        initial
            .iter()
            .all(|r| r.version_info.is_empty() && r.response_nonce.is_empty())
    );
    assert_eq!(client.node_id(), initial[0].node.as_ref().unwrap().id);
}

#[tokio::test]
async fn test_ack_echoes_version_and_nonce() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(
        LISTENER,
        "v1",
        "n1",
        vec![testutil::tcp_listener("db", 3306, "outbound|3306||db")],
    );
    let ack = session.next_request().await;
    assert_eq!(ack.type_url, LISTENER);
    assert_eq!(ack.version_info, "v1");
    assert_eq!(ack.response_nonce, "n1");
    assert!(ack.node.is_none());
    assert!(ack.error_detail.is_none());

    assert!(client.tcp_listeners().contains_key("db"));
    let state = &client.sync_state()[LISTENER];
    assert_eq!((state.version.as_str(), state.nonce.as_str()), ("v1", "n1"));
}

#[tokio::test]
async fn test_eds_clusters_narrow_endpoint_request() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(
        CLUSTER,
        "1",
        "c1",
        vec![
            testutil::cluster("A", true),
            testutil::cluster("B", false),
            testutil::cluster("C", true),
        ],
    );

    let follow_up = session.next_request().await;
    assert_eq!(follow_up.type_url, ENDPOINT);
    assert_eq!(follow_up.resource_names, ["A", "C"]);

    let ack = session.next_request().await;
    assert_eq!(ack.type_url, CLUSTER);
    assert_eq!(ack.response_nonce, "c1");

    assert_eq!(client.eds_clusters().keys().collect::<Vec<_>>(), ["A", "C"]);
    assert_eq!(client.clusters().keys().collect::<Vec<_>>(), ["B"]);
    assert_eq!(client.sent(ENDPOINT).unwrap().resource_names, ["A", "C"]);
}

#[tokio::test]
async fn test_single_dynamic_cluster_is_requested_next() {
    let (_client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("svc-a", true)]);
    let next = session.next_request().await;
    assert_eq!(next.type_url, ENDPOINT);
    assert_eq!(next.resource_names, ["svc-a"]);

    // same set again: ACK only
    session.next_request().await;
    session.respond(CLUSTER, "2", "c2", vec![testutil::cluster("svc-a", true)]);
    let next = session.next_request().await;
    assert_eq!(next.type_url, CLUSTER);
    assert_eq!(next.version_info, "2");
}

#[tokio::test]
async fn test_http_listener_narrows_route_request() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(
        LISTENER,
        "1",
        "l1",
        vec![testutil::http_listener("0.0.0.0_8080", 8080)],
    );

    let follow_up = session.next_request().await;
    assert_eq!(follow_up.type_url, ROUTE);
    assert_eq!(follow_up.resource_names, ["8080"]);
    let ack = session.next_request().await;
    assert_eq!(ack.type_url, LISTENER);

    assert!(client.http_listeners().contains_key("0.0.0.0_8080"));
    assert!(client.tcp_listeners().is_empty());

    // the route ACK carries the narrowed name
    session.respond(ROUTE, "1", "r1", vec![testutil::route("8080")]);
    let ack = session.next_request().await;
    assert_eq!(ack.type_url, ROUTE);
    assert_eq!(ack.resource_names, ["8080"]);
    assert!(client.routes().contains_key("8080"));
    assert!(client.initial_load().is_some());
}

#[tokio::test]
async fn test_malformed_resource_is_skipped_and_acked() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(
        ENDPOINT,
        "1",
        "e1",
        vec![
            testutil::endpoints("a"),
            testutil::malformed(ENDPOINT),
            testutil::endpoints("b"),
        ],
    );
    let ack = session.next_request().await;
    assert_eq!(ack.type_url, ENDPOINT);
    assert_eq!(ack.version_info, "1");
    assert!(ack.error_detail.is_none());
    assert_eq!(client.endpoints().keys().collect::<Vec<_>>(), ["a", "b"]);

    // exactly one request for the batch: the next one answers the next response
    session.respond(ROUTE, "1", "r1", vec![]);
    assert_eq!(session.next_request().await.type_url, ROUTE);
}

#[tokio::test]
async fn test_nack_on_decode_error_when_enabled() {
    let (client, mut server) = start(config().with_nack_on_decode_error(true));
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(ENDPOINT, "1", "e1", vec![testutil::endpoints("a")]);
    assert!(session.next_request().await.error_detail.is_none());

    session.respond(
        ENDPOINT,
        "2",
        "e2",
        vec![testutil::endpoints("b"), testutil::malformed(ENDPOINT)],
    );
    let nack = session.next_request().await;
    assert_eq!(nack.version_info, "1");
    assert_eq!(nack.response_nonce, "e2");
    assert_eq!(nack.error_detail.unwrap().code, 3);
    assert_eq!(client.received(ENDPOINT).unwrap().version_info, "1");
}

#[tokio::test]
async fn test_sync_survives_reconnect_and_watch_set_is_replayed() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;
    assert!(!client.has_synced());

    session.respond(
        LISTENER,
        "1",
        "l1",
        vec![testutil::http_listener("0.0.0.0_8080", 8080)],
    );
    session.next_requests(2).await;
    for type_url in [CLUSTER, ENDPOINT, ROUTE] {
        assert!(!client.has_synced());
        session.respond(type_url, "1", "n", vec![]);
        session.next_request().await;
    }
    assert!(client.wait_for_sync(WAIT).await);

    session.close();
    let (_session, replay) = open_session(&mut server, 4).await;
    assert_eq!(server.attempts(), 2);

    let types: Vec<_> = replay.iter().map(|r| r.type_url.as_str()).collect();
    assert_eq!(types, [CLUSTER, ENDPOINT, LISTENER, ROUTE]);
    assert_eq!(replay.iter().filter(|r| r.node.is_some()).count(), 1);
    assert!(replay[0].node.is_some());
    assert!(replay.iter().all(|r| r.version_info.is_empty()));
    assert_eq!(replay[3].resource_names, ["8080"]);

    assert!(client.has_synced());
    assert!(client.http_listeners().contains_key("0.0.0.0_8080"));
    assert_eq!(*client.state().borrow(), ConnectionState::Streaming);
}

#[tokio::test]
async fn test_wait_for_version_baseline() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("B", false)]);
    session.next_request().await;

    let cached = client.wait_for_version(WAIT, CLUSTER, "").await.unwrap();
    assert_eq!(cached.version_info, "1");
    let cached = client.wait_for_version(WAIT, v2::CLUSTER, "").await.unwrap();
    assert_eq!(cached.version_info, "1");

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.wait_for_version(WAIT, CLUSTER, "1").await })
    };
    session.respond(CLUSTER, "2", "c2", vec![testutil::cluster("B", false)]);
    let next = waiter.await.unwrap().unwrap();
    assert_eq!(next.version_info, "2");

    assert!(matches!(
        client
            .wait_for_version(Duration::from_millis(50), ROUTE, "")
            .await,
        Err(Error::Timeout(_))
    ));
}

#[tokio::test]
async fn test_flood_never_blocks_receive_path() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    let total = notify::QUEUE_CAPACITY * 3;
    for i in 0..total {
        session.respond(
            ENDPOINT,
            &i.to_string(),
            &format!("n{i}"),
            vec![testutil::endpoints(&format!("c{i}"))],
        );
    }
    let acks = session.next_requests(total).await;
    assert_eq!(acks.last().unwrap().version_info, (total - 1).to_string());

    let last = format!("c{}", total - 1);
    assert_eq!(client.endpoints().keys().collect::<Vec<_>>(), [&last]);
    assert_eq!(
        client.wait(WAIT, &[ResourceType::Endpoint]).await.unwrap(),
        [ResourceType::Endpoint]
    );
}

#[tokio::test]
async fn test_wait_observes_applied_types() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("B", false)]);
    // empty batches publish nothing
    session.respond(ROUTE, "1", "r1", vec![]);
    session.respond(
        LISTENER,
        "1",
        "l1",
        vec![testutil::tcp_listener("db", 3306, "outbound|3306||db")],
    );

    let observed = client
        .wait(WAIT, &[ResourceType::Listener, ResourceType::Cluster])
        .await
        .unwrap();
    assert_eq!(observed, [ResourceType::Cluster, ResourceType::Listener]);
    assert!(matches!(
        client
            .wait(Duration::from_millis(50), &[ResourceType::Route])
            .await,
        Err(Error::Timeout(remaining)) if remaining == ["rds"]
    ));
}

#[tokio::test]
async fn test_session_end_wakes_waiters() {
    let (client, mut server) = start(config());
    let (session, _) = open_session(&mut server, 4).await;

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .wait(Duration::from_secs(60), &[ResourceType::Route])
                .await
        })
    };
    tokio::task::yield_now().await;
    session.close();
    assert!(matches!(waiter.await.unwrap(), Err(Error::Closed)));
}

#[tokio::test]
async fn test_waits_after_reconnect_see_new_updates() {
    let (client, mut server) = start(config());
    let (session, _) = open_session(&mut server, 4).await;
    session.close();
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("B", false)]);
    assert_eq!(
        client.wait(WAIT, &[ResourceType::Cluster]).await.unwrap(),
        [ResourceType::Cluster]
    );
    session.next_request().await;

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.wait_for_version(WAIT, CLUSTER, "1").await })
    };
    session.respond(CLUSTER, "2", "c2", vec![testutil::cluster("B", false)]);
    assert_eq!(waiter.await.unwrap().unwrap().version_info, "2");
    assert_eq!(*client.state().borrow(), ConnectionState::Streaming);
}

#[tokio::test]
async fn test_close_is_terminal_and_keeps_caches() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;
    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("B", false)]);
    session.next_request().await;

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .wait(Duration::from_secs(60), &[ResourceType::Route])
                .await
        })
    };
    tokio::task::yield_now().await;
    client.close();
    client.close();
    assert!(matches!(waiter.await.unwrap(), Err(Error::Closed)));

    let mut state = client.state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        client.send(DiscoveryRequest::new(CLUSTER)).await,
        Err(Error::Closed)
    ));
    assert!(matches!(client.wait(WAIT, &[]).await, Err(Error::Closed)));
    assert!(client.clusters().contains_key("B"));
    assert_eq!(client.sync_state()[CLUSTER].version, "1");
}

#[tokio::test]
async fn test_direct_send_uses_outgoing_path() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    client
        .send(DiscoveryRequest::new(CLUSTER).with_resource_names(["x"]))
        .await
        .unwrap();
    let request = session.next_request().await;
    assert_eq!(request.type_url, CLUSTER);
    assert_eq!(request.resource_names, ["x"]);
    assert!(request.node.is_none());
    assert_eq!(client.sent(CLUSTER).unwrap().resource_names, ["x"]);
}

#[tokio::test]
async fn test_connect_reports_first_failure() {
    let (transport, server) = mock_transport();
    server.fail_next_connects(1);
    let result = AdsClient::builder(config(), transport, ProstCodec, TokioRuntime)
        .connect()
        .await;
    assert!(matches!(result, Err(Error::Connection(_))));
    assert_eq!(server.attempts(), 1);
}

#[tokio::test]
async fn test_connect_succeeds() {
    let (transport, mut server) = mock_transport();
    let client = AdsClient::builder(config(), transport, ProstCodec, TokioRuntime)
        .connect()
        .await
        .unwrap();
    assert_eq!(*client.state().borrow(), ConnectionState::Streaming);
    let (_session, initial) = open_session(&mut server, 4).await;
    assert!(initial[0].node.is_some());
}

#[tokio::test]
async fn test_reconnect_backs_off_exponentially() {
    let (transport, mut server) = mock_transport();
    server.fail_next_connects(3);
    let runtime = RecordingRuntime::default();
    let _client = AdsClient::builder(config(), transport, ProstCodec, runtime.clone()).start();

    let (_session, _) = open_session(&mut server, 4).await;
    assert_eq!(server.attempts(), 4);
    assert_eq!(
        runtime.sleeps(),
        [
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
}

#[tokio::test]
async fn test_stream_resets_pause_before_reconnect() {
    let (transport, mut server) = mock_transport();
    let runtime = RecordingRuntime::default();
    let _client = AdsClient::builder(config(), transport, ProstCodec, runtime.clone()).start();

    for _ in 0..3 {
        let (session, _) = open_session(&mut server, 4).await;
        session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("B", false)]);
        session.close();
    }
    let (_session, _) = open_session(&mut server, 4).await;
    assert_eq!(server.attempts(), 4);
    assert_eq!(runtime.sleeps(), [RECONNECT_DELAY; 3]);
}

#[tokio::test]
async fn test_bounded_retries_close_the_client() {
    let (transport, server) = mock_transport();
    server.fail_next_connects(10);
    let config = config().with_retry_policy(RetryPolicy::default().with_max_attempts(Some(1)));
    let client =
        AdsClient::builder(config, transport, ProstCodec, RecordingRuntime::default()).start();

    let mut state = client.state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.attempts(), 2);
    assert!(matches!(client.wait(WAIT, &[]).await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_config_objects_and_mesh() {
    let gvk = Gvk::new("networking.istio.io", "v1alpha3", "ServiceEntry");
    let (client, mut server) = start(config().with_watch(WatchSet::config([&gvk])));
    let (mut session, initial) = open_session(&mut server, 2).await;
    assert_eq!(initial[0].type_url, MESH_CONFIG);
    assert_eq!(initial[1].type_url, gvk.type_url());

    session.respond(
        MESH_CONFIG,
        "m1",
        "n1",
        vec![crate::proto::Any {
            type_url: MESH_CONFIG.to_string(),
            value: vec![1, 2],
        }],
    );
    session.next_request().await;
    assert_eq!(client.mesh_config().unwrap().version, "m1");

    let url = gvk.type_url();
    session.respond(
        &url,
        "1",
        "s1",
        vec![
            testutil::config_resource(&url, "default/a", "5"),
            testutil::config_resource(&url, "not-namespaced", "5"),
            testutil::config_resource(&url, "istio-system/b", "6"),
        ],
    );
    let ack = session.next_request().await;
    assert!(ack.error_detail.is_none());

    assert_eq!(client.configs(&gvk).len(), 2);
    let object = client.config(&gvk, "istio-system", "b").unwrap();
    assert_eq!(object.resource_version, "6");
    assert!(client.config(&gvk, "default", "missing").is_none());
    assert!(client.wait_for_sync(WAIT).await);
}

#[tokio::test]
async fn test_bad_input_does_not_end_session() {
    let (client, mut server) = start(config());
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond_raw(Bytes::from_static(testutil::MALFORMED));
    session.respond("unknown", "1", "u1", vec![]);
    let ack = session.next_request().await;
    assert_eq!(ack.type_url, "unknown");
    assert_eq!(ack.response_nonce, "u1");

    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("B", false)]);
    assert_eq!(session.next_request().await.type_url, CLUSTER);
    assert_eq!(server.attempts(), 1);
    assert!(client.clusters().contains_key("B"));
}

#[tokio::test]
async fn test_snapshots_written_per_update_and_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let (client, mut server) = start(config().with_local_cache_dir(dir.path().join("proxy")));
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond(CLUSTER, "1", "c1", vec![testutil::cluster("svc-a", true)]);
    session.next_requests(2).await;
    // the worker finishes one response before reading the next
    session.respond(ROUTE, "1", "r1", vec![]);
    session.next_request().await;

    let cds = std::fs::read(dir.path().join("proxy_cds.json")).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&cds).unwrap();
    assert_eq!(value["eds"]["svc-a"]["name"], "svc-a");
    assert!(!dir.path().join("proxy_rds.json").exists());

    client.save(dir.path().join("full")).await.unwrap();
    assert!(dir.path().join("full_ecds.json").exists());
    assert!(dir.path().join("full_lds_http.json").exists());
    assert_eq!(client.endpoints_json().unwrap(), "{}");
}

#[tokio::test]
async fn test_response_handler_sees_every_response() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        move |response: &DiscoveryResponse| {
            seen.lock().push((response.type_url.clone(), response.version_info.clone()));
        }
    };
    let (_client, mut server) = start(config().with_response_handler(handler));
    let (mut session, _) = open_session(&mut server, 4).await;

    session.respond("unknown", "1", "u1", vec![]);
    session.respond(CLUSTER, "2", "c2", vec![testutil::cluster("B", false)]);
    session.next_requests(2).await;

    assert_eq!(
        *seen.lock(),
        [
            ("unknown".to_string(), "1".to_string()),
            (CLUSTER.to_string(), "2".to_string())
        ]
    );
}
