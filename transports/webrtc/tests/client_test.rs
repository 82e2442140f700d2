//! Voice client integration tests
//!
//! Runs the full client (signaling channel + orchestrator) against an
//! in-memory relay connector with fake media links.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test client_test
//! ```

mod harness;

use harness::{init_logging, wait_for_event, FailingCapture, FakeLinkFactory, LoopbackConnector};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use voicemesh_webrtc::media::MediaError;
use voicemesh_webrtc::signaling::MessageType;
use voicemesh_webrtc::{
    ChannelState, ConnectionStatus, Error, MeshEvent, SilenceCapture, VoiceClient,
    VoiceMeshConfig,
};

const WAIT: Duration = Duration::from_secs(5);

fn is_connected(event: &MeshEvent) -> bool {
    matches!(event, MeshEvent::Status(ConnectionStatus::Connected(_)))
}

/// Collect frame types sent by the client until `wanted` shows up
async fn sent_until(connector: &LoopbackConnector, wanted: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.extend(connector.sent_types());
        if seen.iter().any(|t| t == wanted) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    seen
}

#[tokio::test]
async fn test_client_connects_and_requests_presence() {
    init_logging();
    let connector = Arc::new(LoopbackConnector::new("me"));
    let (client, mut events) = VoiceClient::start(
        VoiceMeshConfig::default(),
        connector.clone(),
        Arc::new(FakeLinkFactory::default()),
        Arc::new(SilenceCapture::new()),
    )
    .unwrap();

    wait_for_event(&mut events, WAIT, is_connected).await.unwrap();
    assert_eq!(client.identity().unwrap().as_str(), "me");
    assert_eq!(client.channel_state(), ChannelState::Open);

    let sent = sent_until(&connector, "get-online-users").await;
    assert!(sent.contains(&"get-online-users".to_string()));

    connector.deliver(
        MessageType::OnlineUsersList,
        json!([{"userId": "a", "userName": "Alice"}]),
    );
    let presence = wait_for_event(&mut events, WAIT, |e| matches!(e, MeshEvent::Presence(_)))
        .await
        .unwrap();
    assert!(matches!(presence, MeshEvent::Presence(peers) if peers[0].display_name == "Alice"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_capture_failure_sends_nothing() {
    init_logging();
    let connector = Arc::new(LoopbackConnector::new("me"));
    let (client, mut events) = VoiceClient::start(
        VoiceMeshConfig::default(),
        connector.clone(),
        Arc::new(FakeLinkFactory::default()),
        Arc::new(FailingCapture(MediaError::PermissionDenied)),
    )
    .unwrap();
    wait_for_event(&mut events, WAIT, is_connected).await.unwrap();

    let err = assert_err!(client.join("alice").await);
    assert!(matches!(
        err,
        Error::MediaAcquisition(MediaError::PermissionDenied)
    ));
    assert!(err.is_media_error());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = connector.sent_types();
    assert!(!sent.contains(&"join-room".to_string()));

    client.shutdown().await;
}

#[tokio::test]
async fn test_invalid_name_is_rejected_before_capture() {
    init_logging();
    let connector = Arc::new(LoopbackConnector::new("me"));
    let (client, _events) = VoiceClient::start(
        VoiceMeshConfig::default(),
        connector,
        Arc::new(FakeLinkFactory::default()),
        Arc::new(FailingCapture(MediaError::DeviceNotFound)),
    )
    .unwrap();

    let err = client.join("not valid!").await.unwrap_err();
    assert!(matches!(err, Error::InvalidDisplayName(_)));

    client.shutdown().await;
}

#[tokio::test]
async fn test_join_then_roster_snapshot_offers() {
    init_logging();
    let connector = Arc::new(LoopbackConnector::new("me"));
    let factory = Arc::new(FakeLinkFactory::default());
    let (client, mut events) = VoiceClient::start(
        VoiceMeshConfig::default(),
        connector.clone(),
        factory.clone(),
        Arc::new(SilenceCapture::new()),
    )
    .unwrap();
    wait_for_event(&mut events, WAIT, is_connected).await.unwrap();

    assert_ok!(client.join("alice").await);
    wait_for_event(&mut events, WAIT, |e| matches!(e, MeshEvent::Joined { .. }))
        .await
        .unwrap();
    assert!(sent_until(&connector, "join-room")
        .await
        .contains(&"join-room".to_string()));

    connector.deliver(
        MessageType::CurrentUsers,
        json!([{"userId": "b", "userName": "Bob"}]),
    );
    wait_for_event(&mut events, WAIT, |e| {
        matches!(e, MeshEvent::RosterReplaced(peers) if peers.len() == 1)
    })
    .await
    .unwrap();

    assert!(sent_until(&connector, "offer")
        .await
        .contains(&"offer".to_string()));
    assert_eq!(factory.links_for("b").len(), 1);

    let channel = client.channel().clone();
    client.shutdown().await;
    assert_eq!(channel.state(), ChannelState::ClosedByUser);
    assert!(factory.latest("b").is_closed());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = VoiceMeshConfig {
        max_peers: 0,
        ..Default::default()
    };
    let result = VoiceClient::start(
        config,
        Arc::new(LoopbackConnector::new("me")),
        Arc::new(FakeLinkFactory::default()),
        Arc::new(SilenceCapture::new()),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
