//! Integration tests for the simulator bridge.
//!
//! These tests start a real WebSocket peer on an ephemeral port and drive the
//! bridge against it end to end.

use futures_util::{SinkExt, StreamExt};
use rlbridge::control::ControlField;
use rlbridge::manager::SyncManager;
use rlbridge::scene::SceneHost;
use rlbridge::transport::{InboundFrame, Transport, TransportEvent, TransportSession};
use rlbridge::vec3::Vector3;
use rlbridge_shared::config::{BridgeConfig, Endpoint};
use rlbridge_shared::protocol::{
    decode_commands, decode_snapshot, encode_snapshot, BallState, GameSnapshot, PlayerState,
    RawVec3,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
enum PeerCommand {
    Frame(Vec<u8>),
    Text(String),
    Drop,
}

/// A fake simulator: counts connections, records text it receives and sends
/// whatever the test tells it to every live connection.
struct TestPeer {
    endpoint: Endpoint,
    received: mpsc::UnboundedReceiver<String>,
    commands: broadcast::Sender<PeerCommand>,
    connections: Arc<AtomicUsize>,
}

impl TestPeer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (received_tx, received) = mpsc::unbounded_channel::<String>();
        let (commands, _) = broadcast::channel::<PeerCommand>(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let cmd_tx = commands.clone();
        let count = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let mut cmd_rx = cmd_tx.subscribe();
                count.fetch_add(1, Ordering::SeqCst);

                let received_tx = received_tx.clone();
                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = received_tx.send(text.as_str().to_owned());
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            cmd = cmd_rx.recv() => match cmd {
                                Ok(PeerCommand::Frame(data)) => {
                                    if sink.send(Message::binary(data)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(PeerCommand::Text(text)) => {
                                    if sink.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(PeerCommand::Drop) | Err(_) => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                        }
                    }
                });
            }
        });

        Self {
            endpoint: Endpoint {
                host: "127.0.0.1".to_string(),
                port,
            },
            received,
            commands,
            connections,
        }
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn send(&self, command: PeerCommand) {
        self.commands.send(command).unwrap();
    }

    async fn wait_for_connections(&self, n: usize) {
        let deadline = Instant::now() + TIMEOUT;
        while self.connection_count() < n {
            assert!(Instant::now() < deadline, "peer never saw {} connections", n);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn recv_text(&mut self) -> String {
        tokio::time::timeout(TIMEOUT, self.received.recv())
            .await
            .expect("Timeout waiting for text from bridge")
            .expect("Peer channel closed")
    }
}

/// A transport session plus the events already polled from it but not yet consumed.
struct WatchedSession {
    session: TransportSession,
    pending: VecDeque<TransportEvent>,
}

impl WatchedSession {
    fn connect(endpoint: Endpoint) -> Self {
        Self {
            session: TransportSession::connect(endpoint, RECONNECT_DELAY),
            pending: VecDeque::new(),
        }
    }

    /// Wait for the next event matching `matches`. Events before it are consumed,
    /// events after it stay queued for the next call.
    async fn wait_for(&mut self, matches: impl Fn(&TransportEvent) -> bool) -> TransportEvent {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            while let Some(event) = self.pending.pop_front() {
                if matches(&event) {
                    return event;
                }
            }
            assert!(Instant::now() < deadline, "Timeout waiting for transport event");
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.pending.extend(self.session.poll_events());
        }
    }
}

fn sample_snapshot(ball_x: f32) -> GameSnapshot {
    GameSnapshot {
        ball: Some(BallState {
            location: RawVec3::new(ball_x, 64.0, 93.0),
            velocity: RawVec3::default(),
        }),
        players: vec![PlayerState {
            location: RawVec3::new(0.0, -320.0, 17.0),
            team: 0,
            ..Default::default()
        }],
    }
}

// === Transport ===

#[tokio::test]
async fn test_connects_and_receives_frames() {
    let peer = TestPeer::start().await;
    let mut watched = WatchedSession::connect(peer.endpoint.clone());

    watched.wait_for(|e| *e == TransportEvent::Connected).await;
    assert!(watched.session.is_connected());
    peer.wait_for_connections(1).await;

    let snapshot = sample_snapshot(320.0);
    peer.send(PeerCommand::Frame(encode_snapshot(&snapshot)));

    let event = watched.wait_for(|e| matches!(e, TransportEvent::Frame(_))).await;
    let TransportEvent::Frame(InboundFrame::Binary(data)) = event else {
        panic!("Expected a binary frame, got {:?}", event);
    };
    assert_eq!(decode_snapshot(&data).unwrap(), snapshot);
}

#[tokio::test]
async fn test_text_frames_pass_through() {
    let peer = TestPeer::start().await;
    let mut watched = WatchedSession::connect(peer.endpoint.clone());
    watched.wait_for(|e| *e == TransportEvent::Connected).await;
    peer.wait_for_connections(1).await;

    peer.send(PeerCommand::Text("{\"players\": []}".to_string()));

    let event = watched.wait_for(|e| matches!(e, TransportEvent::Frame(_))).await;
    assert_eq!(
        event,
        TransportEvent::Frame(InboundFrame::Text("{\"players\": []}".to_string()))
    );
}

#[tokio::test]
async fn test_sends_reach_the_peer() {
    let mut peer = TestPeer::start().await;
    let mut watched = WatchedSession::connect(peer.endpoint.clone());
    watched.wait_for(|e| *e == TransportEvent::Connected).await;

    assert!(watched.session.send("{}".to_string()));
    assert!(watched.session.send("{\"1\":{}}".to_string()));

    assert_eq!(peer.recv_text().await, "{}");
    assert_eq!(peer.recv_text().await, "{\"1\":{}}");
}

#[tokio::test]
async fn test_reconnects_after_peer_drops() {
    let peer = TestPeer::start().await;
    let mut watched = WatchedSession::connect(peer.endpoint.clone());
    watched.wait_for(|e| *e == TransportEvent::Connected).await;
    peer.wait_for_connections(1).await;

    peer.send(PeerCommand::Drop);
    watched.wait_for(|e| *e == TransportEvent::Disconnected).await;
    let dropped_at = Instant::now();
    assert!(!watched.session.is_connected());
    assert!(!watched.session.send("{}".to_string()));

    watched.wait_for(|e| *e == TransportEvent::Connected).await;
    assert!(
        dropped_at.elapsed() >= RECONNECT_DELAY / 2,
        "Reconnected after {:?}, before the retry delay",
        dropped_at.elapsed()
    );
    peer.wait_for_connections(2).await;
}

#[tokio::test]
async fn test_set_endpoint_switches_peer() {
    let first = TestPeer::start().await;
    let second = TestPeer::start().await;
    let mut watched = WatchedSession::connect(first.endpoint.clone());
    watched.wait_for(|e| *e == TransportEvent::Connected).await;
    first.wait_for_connections(1).await;

    let switch_started = Instant::now();
    watched.session.set_endpoint(second.endpoint.clone());
    assert_eq!(watched.session.endpoint(), &second.endpoint);

    // An endpoint switch connects right away instead of waiting out the retry delay.
    second.wait_for_connections(1).await;
    assert!(switch_started.elapsed() < RECONNECT_DELAY);

    // By now the close and the reconnect usually sit in one polled batch.
    tokio::time::sleep(Duration::from_millis(50)).await;
    watched.wait_for(|e| *e == TransportEvent::Disconnected).await;
    watched.wait_for(|e| *e == TransportEvent::Connected).await;
    assert!(watched.session.is_connected());
    assert_eq!(first.connection_count(), 1);
}

// === Sync manager ===

#[derive(Default)]
struct RecordingScene {
    positions: Vec<(u32, Vector3)>,
    new_data: usize,
}

impl SceneHost for RecordingScene {
    type Handle = u32;

    fn entities(&self) -> Vec<u32> {
        vec![1, 2]
    }

    fn identity(&self, entity: u32) -> Option<String> {
        match entity {
            1 => Some("ball".to_string()),
            2 => Some("player-1".to_string()),
            _ => None,
        }
    }

    fn set_position(&mut self, entity: u32, position: Vector3) {
        self.positions.push((entity, position));
    }

    fn set_heading(&mut self, _entity: u32, _degrees: f64) {}

    fn stop_scripts(&mut self, _entity: u32) {}

    fn broadcast_new_data(&mut self) {
        self.new_data += 1;
    }
}

#[tokio::test]
async fn test_manager_round_trip() {
    let mut peer = TestPeer::start().await;
    let config = BridgeConfig::default();
    let transport = TransportSession::connect(peer.endpoint.clone(), RECONNECT_DELAY);
    let mut manager = SyncManager::new(config, transport, RecordingScene::default());
    let mut connectivity = manager.events().subscribe_connectivity();

    let deadline = Instant::now() + TIMEOUT;
    while !manager.is_connected() {
        assert!(Instant::now() < deadline, "Bridge never connected");
        manager.poll(Instant::now());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connectivity.try_recv().unwrap());
    peer.wait_for_connections(1).await;

    peer.send(PeerCommand::Frame(encode_snapshot(&sample_snapshot(320.0))));
    while manager.snapshot().is_none() {
        assert!(Instant::now() < deadline, "No snapshot arrived");
        manager.poll(Instant::now());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(manager.get_ball_location(), Vector3::new(-10.0, 2.0, 93.0 / 32.0));
    assert_eq!(manager.get_player_location(0), Vector3::new(0.0, -10.0, 17.0 / 32.0));
    assert_eq!(manager.get_player_defending_side(0), -1.0);
    assert_eq!(manager.host().new_data, 1);
    assert!(manager
        .host()
        .positions
        .contains(&(1, Vector3::new(-10.0, 2.0, 93.0 / 32.0))));

    // Discovery bound player-1, so slot 0 is driven by default.
    assert!(manager.is_subscribed(0));
    manager.update_controller_state(0, ControlField::Throttle, 1.0);
    manager.update_controller_state(0, ControlField::Jump, 1.0);
    assert!(manager.step());

    let commands = decode_commands(&peer.recv_text().await).unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[&0].throttle, 1.0);
    assert!(commands[&0].jump);
}

#[tokio::test]
async fn test_manager_set_host_reconnects() {
    let first = TestPeer::start().await;
    let second = TestPeer::start().await;
    let transport = TransportSession::connect(first.endpoint.clone(), RECONNECT_DELAY);
    let mut manager =
        SyncManager::new(BridgeConfig::default(), transport, RecordingScene::default());
    first.wait_for_connections(1).await;

    manager.set_host(&format!("127.0.0.1:{}", second.endpoint.port));
    assert_eq!(manager.endpoint(), &second.endpoint);
    second.wait_for_connections(1).await;
}
