//! Simulator sync bridge library.
//!
//! Keeps a reconnecting WebSocket session to the simulator, decodes its
//! snapshots, moves bound scene entities and streams controller commands back.

pub mod binder;
pub mod control;
pub mod coord;
pub mod events;
pub mod manager;
pub mod scene;
pub mod throttle;
pub mod transport;

pub use rlbridge_shared::vec3;
