// Wheel state value types used by the kinematics and odometry consumers.

use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use super::angle::{flip_radians, shortest_radians, wrap_radians};

/// Angles closer than this compare equal
const ANGLE_EPSILON: f64 = 1e-9;

/// Speed and steering angle of one wheel, either measured or desired.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModuleState {
    /// Signed wheel speed in m/s
    pub speed: f64,
    /// Steering angle in radians, wrapped to [-PI, PI)
    pub angle: f64,
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self {
            speed,
            angle: wrap_radians(angle),
        }
    }

    /// Build from a steering angle in degrees
    pub fn from_degrees(speed: f64, angle_deg: f64) -> Self {
        Self::new(speed, angle_deg.to_radians())
    }

    pub fn angle_degrees(&self) -> f64 {
        self.angle.to_degrees()
    }

    /// Pick the equivalent target that needs less than a quarter turn of steering.
    ///
    /// If the target angle is more than 90 degrees away from `current_angle`,
    /// the wheel is steered to the opposite heading and driven backwards instead.
    pub fn optimize(self, current_angle: f64) -> Self {
        let delta = shortest_radians(self.angle, current_angle);
        if delta.abs() > FRAC_PI_2 {
            Self {
                speed: -self.speed,
                angle: flip_radians(self.angle),
            }
        } else {
            Self::new(self.speed, self.angle)
        }
    }
}

impl PartialEq for ModuleState {
    fn eq(&self, other: &Self) -> bool {
        self.speed == other.speed
            && shortest_radians(self.angle, other.angle).abs() < ANGLE_EPSILON
    }
}

/// Cumulative drive distance and steering angle of one wheel, for odometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulePosition {
    /// Linear travel in meters since the module was constructed
    pub distance: f64,
    /// Steering angle in radians, wrapped to [-PI, PI)
    pub angle: f64,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: f64) -> Self {
        Self {
            distance,
            angle: wrap_radians(angle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_optimize_flips_beyond_quarter_turn() {
        let target = ModuleState::from_degrees(1.0, 170.0);
        let optimized = target.optimize(0.0);
        assert!((optimized.speed - (-1.0)).abs() < EPS);
        assert!((optimized.angle_degrees() - (-10.0)).abs() < 1e-6);
    }

    #[test]
    fn test_optimize_keeps_small_turns() {
        let target = ModuleState::from_degrees(2.0, 45.0);
        let optimized = target.optimize(0.0);
        assert!((optimized.speed - 2.0).abs() < EPS);
        assert!((optimized.angle_degrees() - 45.0).abs() < 1e-6);
    }

    #[test]
    fn test_optimize_across_wrap_boundary() {
        // current 170 deg, target -170 deg: only 20 deg apart, no flip
        let target = ModuleState::from_degrees(1.0, -170.0);
        let optimized = target.optimize(170.0f64.to_radians());
        assert!((optimized.speed - 1.0).abs() < EPS);
        assert!((optimized.angle_degrees() - (-170.0)).abs() < 1e-6);
    }

    #[test]
    fn test_optimize_just_under_quarter_turn_does_not_flip() {
        let target = ModuleState::from_degrees(1.0, 89.9);
        let optimized = target.optimize(0.0);
        assert!((optimized.speed - 1.0).abs() < EPS);
    }

    #[test]
    fn test_angle_equality_is_modulo_full_turn() {
        let a = ModuleState::new(1.0, 0.5);
        let b = ModuleState {
            speed: 1.0,
            angle: 0.5 + std::f64::consts::TAU,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_constructors_wrap_angle() {
        let state = ModuleState::from_degrees(0.0, 270.0);
        assert!((state.angle_degrees() - (-90.0)).abs() < 1e-6);
        let position = ModulePosition::new(1.5, 3.0 * std::f64::consts::PI);
        assert!((position.angle - (-std::f64::consts::PI)).abs() < 1e-6);
    }
}
