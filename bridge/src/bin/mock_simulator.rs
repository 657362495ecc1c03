//! Stand-in simulator for running the bridge without the real game.
//!
//! Streams binary snapshots of a ball and a few cars at 120 Hz to every
//! connected client and drives the cars from the command maps they send back.
//!
//! Usage: cargo run --bin mock-simulator -- [LISTEN_ADDR]   (default 127.0.0.1:42008)

use std::f32::consts::PI;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rlbridge_shared::config::DEFAULT_PORT;
use rlbridge_shared::protocol::{
    decode_commands, encode_snapshot, BallState, CommandMap, GameSnapshot, PlayerState, RawVec3,
    Rotator,
};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

const TICK_RATE_HZ: u32 = 120;
const PLAYER_COUNT: usize = 2;
const RNG_SEED: u64 = 7;

/// Half extents of the pitch in simulator units
const FIELD_X: f32 = 4096.0;
const FIELD_Y: f32 = 5120.0;
const CEILING: f32 = 2044.0;

const MAX_SPEED: f32 = 1410.0;
const BOOST_SPEED: f32 = 2300.0;
/// Yaw rate at full steer (rad/s)
const TURN_RATE: f32 = 2.5;
const KICK_RADIUS: f32 = 160.0;
const BALL_DRAG: f32 = 0.985;

struct World {
    ball: BallState,
    players: Vec<PlayerState>,
    commands: CommandMap,
    rng: ChaCha8Rng,
}

impl World {
    fn new(player_count: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let players = (0..player_count)
            .map(|i| {
                let team = (i % 2) as u8;
                let side = if team == 0 { -1.0 } else { 1.0 };
                PlayerState {
                    location: RawVec3::new(
                        rng.gen_range(-2000.0..2000.0),
                        side * rng.gen_range(2000.0..4000.0),
                        17.0,
                    ),
                    rotation: Rotator {
                        yaw: -side * PI / 2.0,
                        ..Default::default()
                    },
                    team,
                    boost: 33,
                    ..Default::default()
                }
            })
            .collect();

        Self {
            ball: BallState {
                location: RawVec3::new(0.0, 0.0, 93.0),
                velocity: RawVec3::default(),
            },
            players,
            commands: CommandMap::new(),
            rng,
        }
    }

    fn apply_commands(&mut self, commands: CommandMap) {
        self.commands = commands;
    }

    fn tick(&mut self, dt: f32) {
        for (index, player) in self.players.iter_mut().enumerate() {
            let command = self.commands.get(&index).copied().unwrap_or_default();

            player.rotation.yaw =
                wrap_angle(player.rotation.yaw + command.steer as f32 * TURN_RATE * dt);

            let boosting = command.boost && player.boost > 0;
            if boosting {
                player.boost = player.boost.saturating_sub(1);
            } else if player.boost < 100 && self.rng.gen_bool(0.05) {
                player.boost += 1;
            }

            let top = if boosting { BOOST_SPEED } else { MAX_SPEED };
            let speed = command.throttle as f32 * top;
            let (sin, cos) = player.rotation.yaw.sin_cos();
            player.velocity = RawVec3::new(cos * speed, sin * speed, 0.0);
            player.location.x =
                (player.location.x + player.velocity.x * dt).clamp(-FIELD_X, FIELD_X);
            player.location.y =
                (player.location.y + player.velocity.y * dt).clamp(-FIELD_Y, FIELD_Y);

            let dx = self.ball.location.x - player.location.x;
            let dy = self.ball.location.y - player.location.y;
            if (dx * dx + dy * dy).sqrt() < KICK_RADIUS {
                let kick = speed.abs().max(500.0) * 1.5;
                self.ball.velocity = RawVec3::new(
                    cos * kick,
                    sin * kick,
                    self.rng.gen_range(0.0..400.0),
                );
            }
        }

        let ball = &mut self.ball;
        ball.velocity.z -= 650.0 * dt;
        ball.location.x += ball.velocity.x * dt;
        ball.location.y += ball.velocity.y * dt;
        ball.location.z += ball.velocity.z * dt;
        bounce(&mut ball.location.x, &mut ball.velocity.x, -FIELD_X, FIELD_X);
        bounce(&mut ball.location.y, &mut ball.velocity.y, -FIELD_Y, FIELD_Y);
        bounce(&mut ball.location.z, &mut ball.velocity.z, 93.0, CEILING);
        ball.velocity.x *= BALL_DRAG;
        ball.velocity.y *= BALL_DRAG;
    }

    fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            ball: Some(self.ball),
            players: self.players.clone(),
        }
    }
}

fn wrap_angle(a: f32) -> f32 {
    (a + PI).rem_euclid(2.0 * PI) - PI
}

fn bounce(position: &mut f32, velocity: &mut f32, min: f32, max: f32) {
    if *position < min {
        *position = min;
        *velocity = velocity.abs() * 0.6;
    } else if *position > max {
        *position = max;
        *velocity = -velocity.abs() * 0.6;
    }
}

/// Owns the world. Ticks it and fans encoded snapshots out to every client.
async fn run_sim_loop(
    mut cmd_rx: mpsc::Receiver<CommandMap>,
    frame_tx: broadcast::Sender<Bytes>,
) {
    let mut world = World::new(PLAYER_COUNT, RNG_SEED);
    let dt = 1.0 / TICK_RATE_HZ as f32;

    let mut tick_interval = tokio::time::interval(Duration::from_secs_f32(dt));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                world.tick(dt);
                let _ = frame_tx.send(Bytes::from(encode_snapshot(&world.snapshot())));
            }

            Some(commands) = cmd_rx.recv() => world.apply_commands(commands),
        }
    }
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<CommandMap>,
    frame_tx: broadcast::Sender<Bytes>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut frame_rx = app_state.frame_tx.subscribe();
    tracing::info!("Bridge connected");

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_commands(text.as_str()) {
                        Ok(commands) => {
                            tracing::debug!("Commands: {:?}", commands);
                            let _ = app_state.cmd_tx.send(commands).await;
                        }
                        Err(e) => tracing::warn!("Ignoring malformed command map: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            result = frame_rx.recv() => {
                match result {
                    Ok(frame) => {
                        if sink.send(Message::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Client lagged by {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Bridge disconnected");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));

    let (cmd_tx, cmd_rx) = mpsc::channel::<CommandMap>(256);
    let (frame_tx, _) = broadcast::channel::<Bytes>(64);

    let loop_tx = frame_tx.clone();
    tokio::spawn(async move {
        run_sim_loop(cmd_rx, loop_tx).await;
    });

    let app = Router::new()
        .route("/", get(ws_handler))
        .with_state(AppState { cmd_tx, frame_tx });

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Mock simulator listening on {}", listen_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
