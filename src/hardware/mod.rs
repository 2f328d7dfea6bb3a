// Hardware abstraction for one swerve module
//
// Provides:
// - Actuator and encoder traits the module controller talks to
// - Simulated wheel backend for bench runs and tests
// - Feetech STS serial bus backend for the real drivetrain

pub mod feetech;
pub mod sim;

use serde::{Deserialize, Serialize};

use crate::config::ModuleConfig;
use feetech::FeetechError;

/// What a motor does when its output is zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleMode {
    /// Free-spin when unpowered
    #[default]
    Coast,
    /// Actively resist rotation when unpowered
    Brake,
}

impl IdleMode {
    pub fn toggled(self) -> Self {
        match self {
            IdleMode::Coast => IdleMode::Brake,
            IdleMode::Brake => IdleMode::Coast,
        }
    }
}

/// Error types for module hardware access
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Device {id} ({kind}) is not available")]
    DeviceUnavailable { id: u8, kind: &'static str },

    #[error("Bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Invalid output {value} for device {id}")]
    InvalidOutput { id: u8, value: f64 },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Duty-cycle motor controller. Outputs are normalized to [-1, 1].
pub trait MotorController: Send {
    fn id(&self) -> u8;

    /// Apply a normalized output
    fn set(&mut self, output: f64) -> Result<()>;

    /// Last applied output
    fn get(&self) -> f64;

    fn set_inverted(&mut self, inverted: bool) -> Result<()>;

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()>;

    fn idle_mode(&self) -> IdleMode;
}

/// Encoder that counts from an arbitrary zero.
///
/// Natively reports rotations and RPM; the conversion factors scale those to
/// the caller's units (meters, radians, ...).
pub trait RelativeEncoder: Send {
    fn position(&mut self) -> Result<f64>;

    fn velocity(&mut self) -> Result<f64>;

    /// Redefine the current position, in converted units
    fn set_position(&mut self, position: f64) -> Result<()>;

    fn set_position_conversion_factor(&mut self, factor: f64);

    fn set_velocity_conversion_factor(&mut self, factor: f64);
}

/// Encoder with a fixed physical datum, reported in degrees over [0, 360)
pub trait AbsoluteEncoder: Send {
    fn id(&self) -> u8;

    fn absolute_position(&mut self) -> Result<f64>;

    /// Offset added to the raw reading so the mounting datum lines up
    fn set_magnet_offset(&mut self, offset_deg: f64) -> Result<()>;

    fn magnet_offset(&self) -> f64;

    /// Count the opposite way round
    fn set_reversed(&mut self, reversed: bool);
}

/// Device handles for one module, exclusively owned by its controller
pub struct ModuleDevices {
    pub drive_motor: Box<dyn MotorController>,
    pub turning_motor: Box<dyn MotorController>,
    pub drive_encoder: Box<dyn RelativeEncoder>,
    pub turning_encoder: Box<dyn RelativeEncoder>,
    pub absolute_encoder: Box<dyn AbsoluteEncoder>,
}

/// Source of module device handles
pub trait HardwareBackend {
    /// Acquire every device a module needs, failing if any is unreachable
    fn open_module(&mut self, config: &ModuleConfig) -> Result<ModuleDevices>;

    /// Advance simulated physics by `dt` seconds. Real hardware ignores this.
    fn step(&mut self, _dt: f64) {}
}

/// Reject non-finite outputs and saturate the rest to full scale
pub(crate) fn check_output(id: u8, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(HardwareError::InvalidOutput { id, value });
    }
    Ok(value.clamp(-1.0, 1.0))
}
