mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use common::{Harness, expect_phase, fast_config, offers_to};
use connectly_rust::ConnectId;
use connectly_rust::signaling::{WireErrorKind, WireFrame};
use connectly_rust::types::call::EndReason;
use connectly_rust::types::events::ChannelState;

/// Channel loss during a connected call: the call survives, the supervisor
/// reopens the channel in the background.
#[tokio::test]
async fn test_channel_loss_keeps_connected_call() {
    let harness = Harness::new("1111", fast_config(), true);
    let mut phases = harness.client.bus().phase.subscribe();
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness
        .client
        .calls()
        .dial(ConnectId::new("2222"))
        .await
        .unwrap();
    expect_phase(&mut phases, "dialing").await;
    harness.transports.control(0).await.connect_remote().await;
    expect_phase(&mut phases, "connected").await;

    harness.sockets.connection(0).await.drop_link().await;

    // The supervisor reconnects and the scripted factory re-opens.
    harness.sockets.connection(1).await;
    harness.wait_channel_open().await;
    assert!(harness.sockets.connects() >= 2);

    let session = harness.client.calls().session().await.unwrap();
    assert!(session.phase.is_connected());
    assert_eq!(session.peer.as_str(), "2222");
    assert!(
        timeout(Duration::from_millis(100), phases.recv())
            .await
            .is_err(),
        "phase must not move during a channel blip"
    );
}

/// While the channel is down, new dial attempts are refused; after the
/// reopen they work again.
#[tokio::test]
async fn test_dial_blocked_until_reopen() {
    let mut config = fast_config();
    // Long enough that the dial below lands inside the backoff window.
    config.reconnect_initial_delay = Duration::from_millis(300);
    config.reconnect_max_delay = Duration::from_millis(300);
    let harness = Harness::new("1111", config, true);
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness.sockets.connection(0).await.drop_link().await;
    // Wait for the disconnect to land.
    for _ in 0..100 {
        if !harness.client.channel().is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = harness
        .client
        .calls()
        .dial(ConnectId::new("2222"))
        .await
        .unwrap_err();
    assert!(matches!(err, connectly_rust::CallError::NotConnected));

    harness.sockets.connection(1).await;
    harness.wait_channel_open().await;
    harness
        .client
        .calls()
        .dial(ConnectId::new("2222"))
        .await
        .unwrap();
}

/// The pending auto-dial fires exactly once: not before the channel opens,
/// once when it does, and never again after a reconnect.
#[tokio::test]
async fn test_auto_dial_fires_exactly_once() {
    let mut config = fast_config();
    config.auto_dial = Some(ConnectId::new("4444"));
    let harness = Harness::new("1111", config, false);
    let mut phases = harness.client.bus().phase.subscribe();
    harness.spawn_run();

    // Connected but not yet registered: nothing may be dialed.
    let connection = harness.sockets.connection(0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(offers_to(&connection.sent().await, "4444"), 0);

    connection.open().await;
    harness.wait_channel_open().await;
    expect_phase(&mut phases, "dialing").await;
    // The dial runs inside the client's read loop; wait for the frame.
    for _ in 0..100 {
        if offers_to(&connection.sent().await, "4444") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(offers_to(&connection.sent().await, "4444"), 1);

    // End the call, drop the link, reconnect: no re-fire.
    harness.client.calls().hangup().await.unwrap();
    expect_phase(&mut phases, "idle").await;
    connection.drop_link().await;

    let reconnection = harness.sockets.connection(1).await;
    reconnection.open().await;
    harness.wait_channel_open().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(offers_to(&reconnection.sent().await, "4444"), 0);
    assert!(harness.client.calls().session().await.is_none());
}

/// An auto-dial requested while the channel is already open applies
/// immediately, once.
#[tokio::test]
async fn test_auto_dial_applies_when_already_open() {
    let harness = Harness::new("1111", fast_config(), true);
    let mut phases = harness.client.bus().phase.subscribe();
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness
        .client
        .request_auto_dial(ConnectId::new("4444"))
        .await;
    expect_phase(&mut phases, "dialing").await;
    let connection = harness.sockets.connection(0).await;
    assert_eq!(offers_to(&connection.sent().await, "4444"), 1);
}

/// A fatal signaling error stops the supervisor for good and tears down
/// the live attempt.
#[tokio::test]
async fn test_fatal_error_stops_retrying() {
    let harness = Harness::new("1111", fast_config(), true);
    let mut phases = harness.client.bus().phase.subscribe();
    let mut ended = harness.client.bus().ended.subscribe();
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness
        .client
        .calls()
        .dial(ConnectId::new("2222"))
        .await
        .unwrap();
    expect_phase(&mut phases, "dialing").await;

    let connection = harness.sockets.connection(0).await;
    connection
        .inject(WireFrame::Error {
            kind: WireErrorKind::Fatal,
            message: "id rejected".to_string(),
        })
        .await;

    expect_phase(&mut phases, "idle").await;
    let end = timeout(Duration::from_secs(2), ended.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(end.reason, EndReason::SignalingLost);

    // Well past several backoff windows: still a single connection.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.sockets.connects(), 1);
    assert_eq!(harness.client.channel().state(), ChannelState::Closed);
}

/// A transient server error frame does not end the call or the channel.
#[tokio::test]
async fn test_server_error_is_transient() {
    let harness = Harness::new("1111", fast_config(), true);
    let mut phases = harness.client.bus().phase.subscribe();
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness
        .client
        .calls()
        .dial(ConnectId::new("2222"))
        .await
        .unwrap();
    expect_phase(&mut phases, "dialing").await;

    let connection = harness.sockets.connection(0).await;
    connection
        .inject(WireFrame::Error {
            kind: WireErrorKind::Server,
            message: "hiccup".to_string(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.client.channel().is_open());
    assert!(harness.client.calls().session().await.unwrap().phase.is_dialing());
}

/// Resume reconciliation skips the rest of a long backoff delay.
#[tokio::test]
async fn test_resume_forces_immediate_reconnect() {
    let mut config = fast_config();
    config.reconnect_initial_delay = Duration::from_secs(30);
    config.reconnect_max_delay = Duration::from_secs(30);
    let harness = Harness::new("1111", config, true);
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness.sockets.connection(0).await.drop_link().await;
    for _ in 0..100 {
        if !harness.client.channel().is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Give the supervisor a moment to enter its backoff sleep.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.sockets.connects(), 1);

    harness.client.notify_resumed();
    harness.sockets.connection(1).await;
    harness.wait_channel_open().await;
    assert_eq!(harness.sockets.connects(), 2);
}

/// Relayed frames addressed to another id are discarded by the receiver.
#[tokio::test]
async fn test_misrouted_frame_discarded() {
    let harness = Harness::new("1111", fast_config(), true);
    let mut rings = harness.client.bus().incoming.subscribe();
    harness.spawn_run();
    harness.wait_channel_open().await;

    let connection = harness.sockets.connection(0).await;
    connection
        .inject(WireFrame::offer(
            ConnectId::new("3333"),
            ConnectId::new("9999"),
            json!({"sdp": "offer"}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.client.calls().session().await.is_none());
    assert!(timeout(Duration::from_millis(100), rings.recv()).await.is_err());
}

/// Shutdown ends the live call, releases media and closes the channel.
#[tokio::test]
async fn test_shutdown_cleans_up() {
    let harness = Harness::new("1111", fast_config(), true);
    let mut phases = harness.client.bus().phase.subscribe();
    harness.spawn_run();
    harness.wait_channel_open().await;

    harness
        .client
        .calls()
        .dial(ConnectId::new("2222"))
        .await
        .unwrap();
    expect_phase(&mut phases, "dialing").await;
    let transport = harness.transports.control(0).await;

    harness.client.shutdown().await;
    assert!(harness.client.calls().session().await.is_none());
    assert!(transport.is_closed());
    assert_eq!(harness.media.released.load(Ordering::Relaxed), 1);
    assert_eq!(harness.client.channel().state(), ChannelState::Closed);
}
