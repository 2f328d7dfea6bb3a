// Timeouts, topics, module wiring and control constants
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hardware::sim::SimParams;
use crate::swerve::clamp::ClampPolicy;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Teleop target timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_MODULES: &str = "swerve/cmd/modules"; // per-module targets
pub const TOPIC_CMD_OPERATOR: &str = "swerve/cmd/operator"; // operator overrides
pub const TOPIC_STATE_MODULES: &str = "swerve/state/modules"; // odometry
pub const TOPIC_STATE_HOMING: &str = "swerve/state/homing"; // homing corrections
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for the Feetech servo bus
pub const SERVO_PORT: &str = "/dev/ttyUSB0";

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Wiring of one swerve module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub name: String,
    pub drive_motor_id: u8,
    pub turning_motor_id: u8,
    pub drive_motor_reversed: bool,
    pub turning_motor_reversed: bool,
    /// Sensor on the steering axis itself. May only be the turning servo
    /// when steering is direct drive.
    pub absolute_encoder_id: u8,
    /// Added to the raw absolute reading to correct mounting misalignment
    pub absolute_encoder_offset_deg: f64,
    pub absolute_encoder_reversed: bool,
    /// Starting steering angle of the simulated wheel
    pub sim_initial_angle_deg: f64,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::wired("module", 1, 2, 9, 0.0)
    }
}

impl ModuleConfig {
    pub fn wired(
        name: &str,
        drive_motor_id: u8,
        turning_motor_id: u8,
        absolute_encoder_id: u8,
        sim_angle: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            drive_motor_id,
            turning_motor_id,
            drive_motor_reversed: false,
            turning_motor_reversed: false,
            absolute_encoder_id,
            absolute_encoder_offset_deg: 0.0,
            absolute_encoder_reversed: false,
            sim_initial_angle_deg: sim_angle,
        }
    }
}

/// Unit conversions, limits and gains shared by every module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConstants {
    /// Drive motor rotations to meters of wheel travel
    pub drive_rot_to_meters: f64,
    /// Drive motor RPM to m/s
    pub drive_rpm_to_mps: f64,
    /// Turning motor rotations to radians of steering
    pub turning_rot_to_rad: f64,
    /// Turning motor RPM to rad/s
    pub turning_rpm_to_radps: f64,
    /// Wheel speed that maps to full drive output
    pub physical_max_speed_mps: f64,
    /// Teleop steering gain, output per radian of error
    pub turning_kp: f64,
    /// Homing gain, output per degree of error
    pub homing_kp: f64,
    /// Targets slower than this stop the module instead of steering it
    pub speed_deadband_mps: f64,
}

// 4" wheel, 6.75:1 drive and 12.8:1 steering reductions
const WHEEL_DIAMETER_M: f64 = 0.1016;
const DRIVE_GEAR_RATIO: f64 = 1.0 / 6.75;
const TURNING_GEAR_RATIO: f64 = 1.0 / 12.8;

impl ModuleConstants {
    /// One turning motor rotation is one steering rotation
    pub fn turning_is_direct(&self) -> bool {
        (self.turning_rot_to_rad - std::f64::consts::TAU).abs() < 1e-9
    }
}

impl Default for ModuleConstants {
    fn default() -> Self {
        let drive_rot_to_meters = DRIVE_GEAR_RATIO * std::f64::consts::PI * WHEEL_DIAMETER_M;
        let turning_rot_to_rad = TURNING_GEAR_RATIO * std::f64::consts::TAU;
        Self {
            drive_rot_to_meters,
            drive_rpm_to_mps: drive_rot_to_meters / 60.0,
            turning_rot_to_rad,
            turning_rpm_to_radps: turning_rot_to_rad / 60.0,
            physical_max_speed_mps: 4.5,
            turning_kp: 0.5,
            homing_kp: 0.0005,
            speed_deadband_mps: 0.001,
        }
    }
}

/// Homing targets, tolerances and the clamp table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    /// Absolute reading, in degrees, at which the wheel points straight ahead
    pub reference_deg: f64,
    /// A module is zeroed while strictly closer than this to the reference
    pub zeroed_tolerance_deg: f64,
    /// Consecutive in-band readings needed before a module reports zeroed
    pub zeroed_debounce_ticks: u32,
    /// Ordered clamp bands keyed on distance from the reference
    pub bands: ClampPolicy,
    /// Homing gives up and faults after this long
    pub timeout_ms: u64,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            reference_deg: 180.0,
            zeroed_tolerance_deg: 1.0,
            zeroed_debounce_ticks: 1,
            bands: ClampPolicy::default(),
            timeout_ms: 10_000,
        }
    }
}

impl HomingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Everything the runtime needs to bring up the drivetrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub modules: Vec<ModuleConfig>,
    pub constants: ModuleConstants,
    pub homing: HomingConfig,
    pub sim: SimParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            modules: vec![
                ModuleConfig::wired("front_left", 1, 2, 9, 30.0),
                ModuleConfig::wired("front_right", 3, 4, 10, 120.0),
                ModuleConfig::wired("back_left", 5, 6, 11, 250.0),
                ModuleConfig::wired("back_right", 7, 8, 12, 340.0),
            ],
            constants: ModuleConstants::default(),
            homing: HomingConfig::default(),
            sim: SimParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        info!(
            "Loaded config from {} ({} modules)",
            path.display(),
            config.modules.len()
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::Invalid("no modules configured".to_string()));
        }
        let mut motor_ids: Vec<u8> = self
            .modules
            .iter()
            .flat_map(|m| [m.drive_motor_id, m.turning_motor_id])
            .collect();
        motor_ids.sort_unstable();
        if motor_ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(
                "a motor ID is used more than once".to_string(),
            ));
        }

        let c = &self.constants;
        let mut sensor_ids: Vec<u8> = self
            .modules
            .iter()
            .map(|m| m.absolute_encoder_id)
            .collect();
        sensor_ids.sort_unstable();
        if sensor_ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(
                "an absolute encoder ID is used more than once".to_string(),
            ));
        }
        for module in &self.modules {
            let shared_with_turning = module.absolute_encoder_id == module.turning_motor_id;
            if shared_with_turning && !c.turning_is_direct() {
                // the servo's single-turn register wraps several times per steering turn
                return Err(ConfigError::Invalid(format!(
                    "{}: absolute encoder {} is the geared turning servo",
                    module.name, module.absolute_encoder_id
                )));
            }
            let is_motor = motor_ids.binary_search(&module.absolute_encoder_id).is_ok();
            if !shared_with_turning && is_motor {
                return Err(ConfigError::Invalid(format!(
                    "{}: absolute encoder {} is also a drive or turning motor",
                    module.name, module.absolute_encoder_id
                )));
            }
        }

        let factors = [
            c.drive_rot_to_meters,
            c.drive_rpm_to_mps,
            c.turning_rot_to_rad,
            c.turning_rpm_to_radps,
            c.physical_max_speed_mps,
        ];
        if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(ConfigError::Invalid(
                "conversion factors and max speed must be positive".to_string(),
            ));
        }

        let h = &self.homing;
        if !(0.0..360.0).contains(&h.reference_deg) {
            return Err(ConfigError::Invalid(format!(
                "reference angle {} outside [0, 360)",
                h.reference_deg
            )));
        }
        if h.zeroed_tolerance_deg <= 0.0 || h.zeroed_debounce_ticks == 0 {
            return Err(ConfigError::Invalid(
                "zeroed tolerance and debounce must be positive".to_string(),
            ));
        }
        h.bands.validate().map_err(ConfigError::Invalid)
    }
}
