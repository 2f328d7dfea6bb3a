// Angle wrapping helpers shared by the homing and driving loops.
//
// Driving works in radians over [-PI, PI), homing works in degrees as
// reported by the absolute sensor over [0, 360).

use std::f64::consts::PI;

/// Wrap `value` into the half-open interval `[min, max)`.
pub fn input_modulus(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    let wrapped = (value - min).rem_euclid(span) + min;
    // rem_euclid can round up to exactly `span` for tiny negative inputs
    if wrapped >= max { wrapped - span } else { wrapped }
}

/// Wrap radians into `[-PI, PI)`.
pub fn wrap_radians(angle: f64) -> f64 {
    input_modulus(angle, -PI, PI)
}

/// Wrap degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    input_modulus(angle, 0.0, 360.0)
}

/// Signed shortest-path difference `target - current` in radians, in `[-PI, PI)`.
pub fn shortest_radians(target: f64, current: f64) -> f64 {
    wrap_radians(target - current)
}

/// Signed shortest-path difference `target - current` in degrees, in `[-180, 180)`.
pub fn shortest_degrees(target: f64, current: f64) -> f64 {
    input_modulus(target - current, -180.0, 180.0)
}

/// Rotate an angle by half a turn, keeping it wrapped.
pub fn flip_radians(angle: f64) -> f64 {
    wrap_radians(angle + PI)
}

/// True if an absolute sensor reading is usable by the homing loop.
pub fn is_valid_absolute_deg(reading: f64) -> bool {
    reading.is_finite() && (0.0..360.0).contains(&reading)
}
