use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Binary snapshot layout version - increment when making breaking changes.
pub const WIRE_VERSION: u8 = 1;

/// Highest number of player slots a snapshot may carry.
pub const MAX_PLAYERS: usize = 64;

const FLAG_BALL: u8 = 0x01;
const VEC3_LEN: usize = 12;
const BALL_LEN: usize = 2 * VEC3_LEN;
/// location + velocity + rotation (3 x f32) + team + boost
const PLAYER_LEN: usize = 2 * VEC3_LEN + 12 + 2;

// === Simulator -> Bridge ===

/// Vector in simulator units, exactly as it came off the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl RawVec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Euler rotation in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    pub location: RawVec3,
    pub velocity: RawVec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub location: RawVec3,
    pub velocity: RawVec3,
    pub rotation: Rotator,
    /// 0 = blue, 1 = orange
    pub team: u8,
    #[serde(default)]
    pub boost: u8,
}

/// One fully decoded simulator frame. Replaced wholesale on every frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    #[serde(default)]
    pub ball: Option<BallState>,
    #[serde(default)]
    pub players: Vec<PlayerState>,
}

impl GameSnapshot {
    pub fn player(&self, index: usize) -> Option<&PlayerState> {
        self.players.get(index)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("frame declares {0} players, more than fit in a snapshot")]
    TooManyPlayers(usize),

    #[error("invalid json snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn read_vec3(buf: &mut &[u8]) -> RawVec3 {
    RawVec3 {
        x: buf.get_f32_le(),
        y: buf.get_f32_le(),
        z: buf.get_f32_le(),
    }
}

fn read_player(buf: &mut &[u8]) -> PlayerState {
    let location = read_vec3(buf);
    let velocity = read_vec3(buf);
    let rotation = Rotator {
        pitch: buf.get_f32_le(),
        yaw: buf.get_f32_le(),
        roll: buf.get_f32_le(),
    };
    PlayerState {
        location,
        velocity,
        rotation,
        team: buf.get_u8(),
        boost: buf.get_u8(),
    }
}

/// Decode a binary snapshot frame. Trailing bytes after the last player are ignored.
pub fn decode_snapshot(data: &[u8]) -> Result<GameSnapshot, DecodeError> {
    let mut buf = data;

    ensure(buf, 2)?;
    let version = buf.get_u8();
    if version != WIRE_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let flags = buf.get_u8();

    let ball = if flags & FLAG_BALL != 0 {
        ensure(buf, BALL_LEN)?;
        Some(BallState {
            location: read_vec3(&mut buf),
            velocity: read_vec3(&mut buf),
        })
    } else {
        None
    };

    ensure(buf, 1)?;
    let count = buf.get_u8() as usize;
    if count > MAX_PLAYERS {
        return Err(DecodeError::TooManyPlayers(count));
    }
    ensure(buf, count * PLAYER_LEN)?;

    let mut players = Vec::with_capacity(count);
    for _ in 0..count {
        players.push(read_player(&mut buf));
    }

    Ok(GameSnapshot { ball, players })
}

/// Decode a snapshot sent as a JSON text frame.
pub fn decode_snapshot_json(text: &str) -> Result<GameSnapshot, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

fn put_vec3(out: &mut BytesMut, v: RawVec3) {
    out.put_f32_le(v.x);
    out.put_f32_le(v.y);
    out.put_f32_le(v.z);
}

/// Encode a snapshot into the binary frame layout. Players past `MAX_PLAYERS` are dropped.
pub fn encode_snapshot(snapshot: &GameSnapshot) -> Vec<u8> {
    let count = snapshot.players.len().min(MAX_PLAYERS);
    let mut out = BytesMut::with_capacity(3 + BALL_LEN + count * PLAYER_LEN);

    out.put_u8(WIRE_VERSION);
    match &snapshot.ball {
        Some(ball) => {
            out.put_u8(FLAG_BALL);
            put_vec3(&mut out, ball.location);
            put_vec3(&mut out, ball.velocity);
        }
        None => out.put_u8(0),
    }

    out.put_u8(count as u8);
    for p in snapshot.players.iter().take(count) {
        put_vec3(&mut out, p.location);
        put_vec3(&mut out, p.velocity);
        out.put_f32_le(p.rotation.pitch);
        out.put_f32_le(p.rotation.yaw);
        out.put_f32_le(p.rotation.roll);
        out.put_u8(p.team);
        out.put_u8(p.boost);
    }

    out.to_vec()
}

// === Bridge -> Simulator ===

/// Controller inputs for one player. Analog axes are in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ControllerCommand {
    pub steer: f64,
    pub throttle: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub jump: bool,
    pub boost: bool,
    pub handbrake: bool,
}

impl ControllerCommand {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outbound payload: player index -> command. Keys serialize as strings (`{"0": {...}}`).
pub type CommandMap = BTreeMap<usize, ControllerCommand>;

pub fn encode_commands(commands: &CommandMap) -> Result<String, serde_json::Error> {
    serde_json::to_string(commands)
}

pub fn decode_commands(text: &str) -> Result<CommandMap, serde_json::Error> {
    serde_json::from_str(text)
}
