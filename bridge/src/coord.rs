//! Conversions between simulator space and scene space.
//!
//! The simulator's x axis points the opposite way to the scene's, and its yaw
//! origin is its forward axis where the scene measures headings from "up".

use std::f64::consts::PI;

use rlbridge_shared::protocol::RawVec3;
use rlbridge_shared::vec3::Vector3;

/// Convert a simulator vector (position or velocity) to scene space.
pub fn map_position(raw: RawVec3, scale: f64) -> Vector3 {
    Vector3::new(
        -(raw.x as f64) / scale,
        raw.y as f64 / scale,
        raw.z as f64 / scale,
    )
}

/// Convert a simulator yaw (radians) to a scene heading (degrees, 0 = up, 90 = right).
pub fn map_heading(yaw_radians: f64) -> f64 {
    yaw_radians * 180.0 / PI - 90.0
}

/// Turn an `atan2` bearing computed in scene space back into simulator yaw space.
pub fn angle_to_target_to_simulator_radians(atan2_result: f64) -> f64 {
    PI - atan2_result
}

/// Wrap an angle difference so it takes the short way round (|result| <= PI).
pub fn shortest_turn(radians: f64) -> f64 {
    let mut correction = radians;
    if correction.abs() > PI {
        if correction < 0.0 {
            correction += 2.0 * PI;
        } else {
            correction -= 2.0 * PI;
        }
    }
    correction
}
