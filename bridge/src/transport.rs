//! Self-healing WebSocket session to the simulator.
//!
//! The socket lives on a dedicated network thread with its own tokio runtime.
//! The host side talks to it through two queues: commands go in over an
//! unbounded tokio channel, events come back over a std channel that the host
//! drains with `poll_events` on its own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rlbridge_shared::config::Endpoint;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Binary(Bytes),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Frame(InboundFrame),
}

/// What the sync manager needs from a connection to the simulator.
pub trait Transport {
    fn endpoint(&self) -> &Endpoint;

    /// Point the session at a new endpoint, closing any live socket and connecting again.
    fn set_endpoint(&mut self, endpoint: Endpoint);

    fn force_reconnect(&mut self);

    /// Fire-and-forget. Returns false if the payload was dropped because the
    /// session is not connected.
    fn send(&self, payload: String) -> bool;

    fn is_connected(&self) -> bool;

    /// Drain every event received since the last call, in arrival order.
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}

/// Fixed-delay, unlimited retry schedule. At most one attempt is ever pending.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    pending: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule a retry after a close. Returns false if a retry is already pending.
    pub fn on_close(&mut self, now: Instant) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(now + self.delay);
        true
    }

    /// Make the next attempt due right away, replacing any pending retry.
    pub fn force(&mut self, now: Instant) {
        self.pending = Some(now);
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.pending
    }

    /// Consume the pending retry if it is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(at) if at <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

enum SessionCommand {
    Send(String),
    SetEndpoint(Endpoint),
    ForceReconnect,
    Shutdown,
}

type CommandSender = tokio::sync::mpsc::UnboundedSender<SessionCommand>;
type CommandReceiver = tokio::sync::mpsc::UnboundedReceiver<SessionCommand>;

pub struct TransportSession {
    endpoint: Endpoint,
    connected: Arc<AtomicBool>,
    event_rx: Receiver<TransportEvent>,
    cmd_tx: CommandSender,
}

impl TransportSession {
    /// Start connecting to `endpoint` immediately, retrying every `reconnect_delay`.
    pub fn connect(endpoint: Endpoint, reconnect_delay: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>();
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel::<SessionCommand>();
        let connected = Arc::new(AtomicBool::new(false));

        spawn_network_thread(
            endpoint.clone(),
            ReconnectPolicy::fixed(reconnect_delay),
            cmd_rx,
            event_tx,
            connected.clone(),
        );

        Self {
            endpoint,
            connected,
            event_rx,
            cmd_tx,
        }
    }
}

impl Transport for TransportSession {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn set_endpoint(&mut self, endpoint: Endpoint) {
        tracing::info!("Switching simulator endpoint to {}", endpoint);
        self.endpoint = endpoint.clone();
        let _ = self.cmd_tx.send(SessionCommand::SetEndpoint(endpoint));
    }

    fn force_reconnect(&mut self) {
        let _ = self.cmd_tx.send(SessionCommand::ForceReconnect);
    }

    fn send(&self, payload: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.cmd_tx.send(SessionCommand::Send(payload)).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(evt) = self.event_rx.try_recv() {
            out.push(evt);
        }
        out
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

fn spawn_network_thread(
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    cmd_rx: CommandReceiver,
    event_tx: Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let spawned = std::thread::Builder::new()
        .name("rlbridge-net".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to build network runtime: {}", e);
                    return;
                }
            };
            rt.block_on(run_session(endpoint, policy, cmd_rx, event_tx, connected));
        });

    if let Err(e) = spawned {
        tracing::error!("Failed to spawn network thread: {}", e);
    }
}

async fn run_session(
    mut endpoint: Endpoint,
    mut policy: ReconnectPolicy,
    mut cmd_rx: CommandReceiver,
    event_tx: Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    policy.force(Instant::now());

    'session: loop {
        // Disconnected: wait for the pending attempt. Sends are dropped here.
        let due = policy.next_attempt().unwrap_or_else(Instant::now);
        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(due)) => {}
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(SessionCommand::Shutdown) => return,
                    Some(SessionCommand::SetEndpoint(ep)) => {
                        endpoint = ep;
                        policy.force(Instant::now());
                    }
                    Some(SessionCommand::ForceReconnect) => policy.force(Instant::now()),
                    Some(SessionCommand::Send(_)) => {}
                }
                continue 'session;
            }
        }
        if !policy.take_due(Instant::now()) {
            continue;
        }

        let url = endpoint.url();
        tracing::debug!("Connecting to {}", url);

        let connect = tokio_tungstenite::connect_async(url.as_str());
        tokio::pin!(connect);
        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(SessionCommand::Shutdown) => return,
                        Some(SessionCommand::SetEndpoint(ep)) => {
                            endpoint = ep;
                            policy.force(Instant::now());
                            continue 'session;
                        }
                        Some(SessionCommand::ForceReconnect) => {
                            policy.force(Instant::now());
                            continue 'session;
                        }
                        Some(SessionCommand::Send(_)) => {}
                    }
                }
            }
        };

        let ws_stream = match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                tracing::debug!(
                    "Connect to {} failed: {}; retrying in {:?}",
                    url,
                    e,
                    policy.delay()
                );
                policy.on_close(Instant::now());
                continue;
            }
        };

        connected.store(true, Ordering::Release);
        if event_tx.send(TransportEvent::Connected).is_err() {
            return;
        }
        tracing::info!("Connected to simulator at {}", url);

        let (mut write, mut read) = ws_stream.split();
        let mut forced = false;

        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(SessionCommand::Shutdown) => {
                            connected.store(false, Ordering::Release);
                            let _ = write.close().await;
                            return;
                        }
                        Some(SessionCommand::Send(text)) => {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(SessionCommand::SetEndpoint(ep)) => {
                            endpoint = ep;
                            forced = true;
                            let _ = write.close().await;
                            break;
                        }
                        Some(SessionCommand::ForceReconnect) => {
                            forced = true;
                            let _ = write.close().await;
                            break;
                        }
                    }
                }

                msg = read.next() => {
                    let frame = match msg {
                        Some(Ok(Message::Binary(data))) => InboundFrame::Binary(data),
                        Some(Ok(Message::Text(text))) => InboundFrame::Text(text.as_str().to_owned()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!("Socket error from {}: {}", url, e);
                            break;
                        }
                    };
                    if event_tx.send(TransportEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
            }
        }

        connected.store(false, Ordering::Release);
        if event_tx.send(TransportEvent::Disconnected).is_err() {
            return;
        }
        tracing::info!("Disconnected from simulator at {}", url);

        if forced {
            policy.force(Instant::now());
        } else {
            policy.on_close(Instant::now());
        }
    }
}
