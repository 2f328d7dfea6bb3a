// Homing output clamp policy.
//
// Small outputs stall the steering gearbox, large ones overshoot the narrow
// home band. The policy is an ordered table of bands keyed on how far the
// absolute reading is from the home reading; the first band that matches
// bounds the output magnitude into its interval.

use serde::{Deserialize, Serialize};

/// Magnitude interval applied to a correction, sign preserved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampInterval {
    pub min: f64,
    pub max: f64,
}

impl ClampInterval {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Bound `|signal|` into `[min, max]`. A zero correction stays zero.
    pub fn apply(&self, signal: f64) -> f64 {
        if signal == 0.0 || !signal.is_finite() {
            return 0.0;
        }
        signal.signum() * signal.abs().clamp(self.min, self.max)
    }
}

/// One entry of the clamp table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampBand {
    /// Band matches when the distance from home is at most this many degrees.
    /// `None` matches everything.
    pub within_deg: Option<f64>,
    pub interval: ClampInterval,
}

impl ClampBand {
    pub fn matches(&self, distance_deg: f64) -> bool {
        match self.within_deg {
            Some(limit) => distance_deg <= limit,
            None => true,
        }
    }
}

/// Fine settling band: within 10 degrees of home
pub const FINE_BAND: ClampBand = ClampBand {
    within_deg: Some(10.0),
    interval: ClampInterval::new(0.01, 0.02),
};

/// Coarse band: everywhere else
pub const COARSE_BAND: ClampBand = ClampBand {
    within_deg: None,
    interval: ClampInterval::new(0.02, 0.1),
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClampPolicy {
    bands: Vec<ClampBand>,
}

impl Default for ClampPolicy {
    fn default() -> Self {
        Self::new(vec![FINE_BAND, COARSE_BAND])
    }
}

impl ClampPolicy {
    pub fn new(bands: Vec<ClampBand>) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &[ClampBand] {
        &self.bands
    }

    /// First band matching `distance_deg`, if any
    pub fn select(&self, distance_deg: f64) -> Option<&ClampBand> {
        self.bands.iter().find(|band| band.matches(distance_deg.abs()))
    }

    /// Clamp `signal` for a module `distance_deg` away from home.
    /// With no matching band the signal passes through unchanged.
    pub fn apply(&self, distance_deg: f64, signal: f64) -> f64 {
        match self.select(distance_deg) {
            Some(band) => band.interval.apply(signal),
            None => signal,
        }
    }

    /// Check the table is usable: sane intervals, increasing band limits
    pub fn validate(&self) -> Result<(), String> {
        if self.bands.is_empty() {
            return Err("clamp table has no bands".to_string());
        }
        let mut previous: Option<f64> = None;
        for (i, band) in self.bands.iter().enumerate() {
            let ClampInterval { min, max } = band.interval;
            if !(min >= 0.0 && min <= max && max <= 1.0) {
                return Err(format!("band {} has invalid interval [{}, {}]", i, min, max));
            }
            match (previous, band.within_deg) {
                (_, Some(limit)) if limit < 0.0 => {
                    return Err(format!("band {} has negative limit {}", i, limit));
                }
                (Some(prev), Some(limit)) if limit <= prev => {
                    return Err(format!("band {} limit {} is not above {}", i, limit, prev));
                }
                (None, _) if i > 0 => {
                    return Err(format!("band {} follows a catch-all band", i));
                }
                _ => {}
            }
            previous = band.within_deg;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swerve::angle::shortest_degrees;

    /// Distance from the 180 degree home reading
    fn distance(reading: f64) -> f64 {
        shortest_degrees(reading, 180.0)
    }

    #[test]
    fn test_coarse_band_caps_magnitude() {
        let policy = ClampPolicy::default();
        assert!((policy.apply(distance(169.999), 0.15) - 0.1).abs() < 1e-12);
        assert!((policy.apply(distance(169.999), -0.15) - (-0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_coarse_band_raises_floor() {
        let policy = ClampPolicy::default();
        assert!((policy.apply(distance(90.0), 0.001) - 0.02).abs() < 1e-12);
        assert!((policy.apply(distance(270.0), -0.001) - (-0.02)).abs() < 1e-12);
    }

    #[test]
    fn test_fine_band_raises_floor() {
        let policy = ClampPolicy::default();
        assert!((policy.apply(distance(180.0), 0.005) - 0.01).abs() < 1e-12);
        assert!((policy.apply(distance(180.0), -0.005) - (-0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_fine_band_caps_magnitude() {
        let policy = ClampPolicy::default();
        assert!((policy.apply(distance(175.0), 0.09) - 0.02).abs() < 1e-12);
        assert!((policy.apply(distance(190.0), -0.09) - (-0.02)).abs() < 1e-12);
        assert!((policy.apply(distance(170.0), 0.09) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_zero_signal_stays_zero() {
        let policy = ClampPolicy::default();
        assert_eq!(policy.apply(distance(180.0), 0.0), 0.0);
        assert_eq!(policy.apply(distance(10.0), 0.0), 0.0);
    }

    #[test]
    fn test_first_matching_band_wins() {
        let policy = ClampPolicy::new(vec![
            ClampBand {
                within_deg: Some(2.0),
                interval: ClampInterval::new(0.005, 0.01),
            },
            FINE_BAND,
            COARSE_BAND,
        ]);
        assert!((policy.apply(1.0, 0.5) - 0.01).abs() < 1e-12);
        assert!((policy.apply(5.0, 0.5) - 0.02).abs() < 1e-12);
        assert!((policy.apply(-45.0, 0.5) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(ClampPolicy::default().validate().is_ok());
        assert!(ClampPolicy::new(vec![]).validate().is_err());
        assert!(ClampPolicy::new(vec![COARSE_BAND, FINE_BAND]).validate().is_err());
        let inverted = ClampBand {
            within_deg: Some(5.0),
            interval: ClampInterval::new(0.2, 0.1),
        };
        assert!(ClampPolicy::new(vec![inverted]).validate().is_err());
    }
}
