// Module device adapters over the Feetech bus

use tracing::debug;

use super::protocol::{PWM_FULL_SCALE, STEPS_PER_REVOLUTION, step_delta};
use super::{SharedBus, lock_bus};
use crate::hardware::{
    AbsoluteEncoder, IdleMode, MotorController, RelativeEncoder, Result, check_output,
};
use crate::swerve::angle::wrap_degrees;

/// Servo driven as a duty-cycle motor.
///
/// Coast is implemented by dropping torque whenever the output is zero;
/// brake keeps torque on with a zero duty.
pub struct FeetechMotor {
    bus: SharedBus,
    id: u8,
    inverted: bool,
    idle_mode: IdleMode,
    output: f64,
    torque_on: bool,
}

impl FeetechMotor {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self {
            bus,
            id,
            inverted: false,
            idle_mode: IdleMode::Coast,
            output: 0.0,
            torque_on: false,
        }
    }

    fn set_torque(&mut self, enabled: bool) -> Result<()> {
        if self.torque_on != enabled {
            lock_bus(&self.bus).set_torque(self.id, enabled)?;
            self.torque_on = enabled;
        }
        Ok(())
    }

    fn apply(&mut self) -> Result<()> {
        let command = drive_command(self.output, self.inverted, self.idle_mode);
        if !command.torque {
            lock_bus(&self.bus).set_pwm(self.id, 0)?;
            return self.set_torque(false);
        }
        self.set_torque(true)?;
        lock_bus(&self.bus).set_pwm(self.id, command.duty)?;
        Ok(())
    }
}

/// Torque state and PWM duty for a motor output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DriveCommand {
    torque: bool,
    duty: i16,
}

fn drive_command(output: f64, inverted: bool, idle_mode: IdleMode) -> DriveCommand {
    let sign = if inverted { -1.0 } else { 1.0 };
    let duty = (output * sign * PWM_FULL_SCALE as f64).round() as i16;
    DriveCommand {
        torque: duty != 0 || idle_mode == IdleMode::Brake,
        duty,
    }
}

impl MotorController for FeetechMotor {
    fn id(&self) -> u8 {
        self.id
    }

    fn set(&mut self, output: f64) -> Result<()> {
        self.output = check_output(self.id, output)?;
        self.apply()
    }

    fn get(&self) -> f64 {
        self.output
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        self.inverted = inverted;
        Ok(())
    }

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()> {
        debug!("servo {} idle mode {:?}", self.id, mode);
        self.idle_mode = mode;
        self.apply()
    }

    fn idle_mode(&self) -> IdleMode {
        self.idle_mode
    }
}

/// Unwrapped step count over a single-turn position register
#[derive(Debug, Clone, Copy)]
struct TurnCounter {
    last_raw: u16,
    steps: i64,
    zero_steps: i64,
}

impl TurnCounter {
    fn new(raw: u16) -> Self {
        Self {
            last_raw: raw,
            steps: 0,
            zero_steps: 0,
        }
    }

    /// Fold in a new reading, returning steps since the zero.
    /// Readings must be less than half a turn apart.
    fn update(&mut self, raw: u16) -> i64 {
        self.steps += step_delta(self.last_raw, raw) as i64;
        self.last_raw = raw;
        self.steps - self.zero_steps
    }

    /// Make the current count read `steps`
    fn rezero(&mut self, steps: i64) {
        self.zero_steps = self.steps - steps;
    }
}

/// Multi-turn encoder built from the servo's single-turn position register
pub struct FeetechEncoder {
    bus: SharedBus,
    id: u8,
    sign: f64,
    turns: TurnCounter,
    position_factor: f64,
    velocity_factor: f64,
}

impl FeetechEncoder {
    pub fn new(bus: SharedBus, id: u8, inverted: bool) -> Result<Self> {
        let raw = lock_bus(&bus).present_position(id)?;
        Ok(Self {
            bus,
            id,
            sign: if inverted { -1.0 } else { 1.0 },
            turns: TurnCounter::new(raw),
            position_factor: 1.0,
            velocity_factor: 1.0,
        })
    }

    fn rotations(&mut self) -> Result<f64> {
        let raw = lock_bus(&self.bus).present_position(self.id)?;
        Ok(self.sign * self.turns.update(raw) as f64 / STEPS_PER_REVOLUTION as f64)
    }
}

impl RelativeEncoder for FeetechEncoder {
    fn position(&mut self) -> Result<f64> {
        Ok(self.rotations()? * self.position_factor)
    }

    fn velocity(&mut self) -> Result<f64> {
        let steps_per_sec = lock_bus(&self.bus).present_speed(self.id)? as f64;
        let rpm = steps_per_sec * 60.0 / STEPS_PER_REVOLUTION as f64;
        Ok(self.sign * rpm * self.velocity_factor)
    }

    fn set_position(&mut self, position: f64) -> Result<()> {
        // Bring the count up to date before moving the zero
        self.rotations()?;
        let rotations = position / self.position_factor;
        let steps = (rotations * STEPS_PER_REVOLUTION as f64 * self.sign).round();
        self.turns.rezero(steps as i64);
        Ok(())
    }

    fn set_position_conversion_factor(&mut self, factor: f64) {
        self.position_factor = factor;
    }

    fn set_velocity_conversion_factor(&mut self, factor: f64) {
        self.velocity_factor = factor;
    }
}

/// Absolute steering angle from a servo's single-turn position register.
///
/// The servo must turn once per steering turn: either a passive sensor
/// servo on the steering axis, or a direct-drive turning servo.
pub struct FeetechAbsoluteEncoder {
    bus: SharedBus,
    id: u8,
    offset_deg: f64,
    reversed: bool,
}

impl FeetechAbsoluteEncoder {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self {
            bus,
            id,
            offset_deg: 0.0,
            reversed: false,
        }
    }
}

impl AbsoluteEncoder for FeetechAbsoluteEncoder {
    fn id(&self) -> u8 {
        self.id
    }

    fn absolute_position(&mut self) -> Result<f64> {
        let raw = lock_bus(&self.bus).present_position(self.id)?;
        Ok(raw_to_degrees(raw, self.reversed, self.offset_deg))
    }

    fn set_magnet_offset(&mut self, offset_deg: f64) -> Result<()> {
        self.offset_deg = offset_deg;
        Ok(())
    }

    fn magnet_offset(&self) -> f64 {
        self.offset_deg
    }

    fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }
}

fn raw_to_degrees(raw: u16, reversed: bool, offset_deg: f64) -> f64 {
    let degrees = raw as f64 * 360.0 / STEPS_PER_REVOLUTION as f64;
    let degrees = if reversed { 360.0 - degrees } else { degrees };
    wrap_degrees(degrees + offset_deg)
}
