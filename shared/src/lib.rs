//! Types shared by every peer of the simulator bridge protocol.

pub mod config;
pub mod protocol;
pub mod vec3;
