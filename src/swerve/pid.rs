// Proportional feedback controller with optional wraparound input.
//
// Both swerve loops are P-only, so there is no integrator or derivative
// history to reset between ticks.

use super::angle::input_modulus;

/// P controller. With continuous input enabled the error is taken the short
/// way around the configured input range.
#[derive(Debug, Clone, Copy)]
pub struct PController {
    kp: f64,
    continuous: Option<(f64, f64)>,
}

impl PController {
    pub fn new(kp: f64) -> Self {
        Self {
            kp,
            continuous: None,
        }
    }

    /// Treat `min` and `max` as the same point on a circle
    pub fn enable_continuous_input(&mut self, min: f64, max: f64) {
        self.continuous = Some((min, max));
    }

    /// Error `setpoint - measurement`, wrapped when continuous input is on
    pub fn error(&self, measurement: f64, setpoint: f64) -> f64 {
        let raw = setpoint - measurement;
        match self.continuous {
            Some((min, max)) => {
                let half = (max - min) / 2.0;
                input_modulus(raw, -half, half)
            }
            None => raw,
        }
    }

    pub fn calculate(&self, measurement: f64, setpoint: f64) -> f64 {
        self.kp * self.error(measurement, setpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_plain_error() {
        let pid = PController::new(2.0);
        assert!((pid.calculate(1.0, 4.0) - 6.0).abs() < 1e-12);
        assert!((pid.calculate(350.0, 10.0) - (-680.0)).abs() < 1e-9);
    }

    #[test]
    fn test_continuous_radians_takes_short_way() {
        let mut pid = PController::new(1.0);
        pid.enable_continuous_input(-PI, PI);
        let error = pid.calculate(170.0f64.to_radians(), (-170.0f64).to_radians());
        assert!(error.abs() <= 20.0f64.to_radians() + 1e-9);
        assert!(error > 0.0);
    }

    #[test]
    fn test_continuous_degrees_takes_short_way() {
        let mut pid = PController::new(0.5);
        pid.enable_continuous_input(0.0, 360.0);
        assert!((pid.error(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((pid.error(10.0, 350.0) - (-20.0)).abs() < 1e-9);
        assert!((pid.calculate(350.0, 10.0) - 10.0).abs() < 1e-9);
    }
}
