// Simulated swerve wheel
//
// A first-order model of one module: motor speed is proportional to duty
// once the duty clears a static friction threshold. Device handles share the
// wheel state with a `SimHandle` so tests and the bench runtime can inspect
// outputs and nudge the physics.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::{
    AbsoluteEncoder, HardwareBackend, HardwareError, IdleMode, ModuleDevices, MotorController,
    RelativeEncoder, Result, check_output,
};
use crate::config::ModuleConfig;
use crate::swerve::angle::wrap_degrees;

/// Physical parameters of the simulated module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Motor free speed at full duty
    pub free_speed_rpm: f64,
    /// Duties below this magnitude do not move the wheel
    pub static_friction: f64,
    /// Module rotations per turning motor rotation
    pub turning_gear_ratio: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            free_speed_rpm: 5676.0,
            static_friction: 0.008,
            turning_gear_ratio: 1.0 / 12.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Drive,
    Turning,
}

#[derive(Debug, Default)]
struct Motor {
    output: f64,
    inverted: bool,
    idle_mode: IdleMode,
    rotations: f64,
    rpm: f64,
}

impl Motor {
    fn direction(&self) -> f64 {
        if self.inverted { -1.0 } else { 1.0 }
    }
}

#[derive(Debug, Default)]
struct Wheel {
    drive: Motor,
    turning: Motor,
    /// Steering angle seen by the absolute sensor before its offset
    steer_deg: f64,
    /// Reading the absolute sensor reports instead of the real angle
    forced_reading: Option<f64>,
}

impl Wheel {
    fn motor(&self, channel: Channel) -> &Motor {
        match channel {
            Channel::Drive => &self.drive,
            Channel::Turning => &self.turning,
        }
    }

    fn motor_mut(&mut self, channel: Channel) -> &mut Motor {
        match channel {
            Channel::Drive => &mut self.drive,
            Channel::Turning => &mut self.turning,
        }
    }
}

fn lock(wheel: &Mutex<Wheel>) -> MutexGuard<'_, Wheel> {
    wheel.lock().unwrap_or_else(PoisonError::into_inner)
}

fn advance(motor: &mut Motor, params: &SimParams, dt: f64) -> f64 {
    // physical shaft speed, before the motor's own inversion is undone
    let shaft_rpm = if motor.output.abs() < params.static_friction {
        0.0
    } else {
        motor.output * motor.direction() * params.free_speed_rpm
    };
    let shaft_rotations = shaft_rpm / 60.0 * dt;
    motor.rpm = shaft_rpm * motor.direction();
    motor.rotations += shaft_rotations * motor.direction();
    shaft_rotations
}

/// Inspection handle onto one simulated wheel
#[derive(Debug, Clone)]
pub struct SimHandle {
    wheel: Arc<Mutex<Wheel>>,
    params: SimParams,
}

impl SimHandle {
    fn new(params: SimParams, steer_deg: f64) -> Self {
        let wheel = Wheel {
            steer_deg: wrap_degrees(steer_deg),
            ..Wheel::default()
        };
        Self {
            wheel: Arc::new(Mutex::new(wheel)),
            params,
        }
    }

    pub fn drive_output(&self) -> f64 {
        lock(&self.wheel).drive.output
    }

    pub fn turning_output(&self) -> f64 {
        lock(&self.wheel).turning.output
    }

    pub fn turning_idle_mode(&self) -> IdleMode {
        lock(&self.wheel).turning.idle_mode
    }

    pub fn drive_idle_mode(&self) -> IdleMode {
        lock(&self.wheel).drive.idle_mode
    }

    /// Steering angle before the sensor offset, degrees in [0, 360)
    pub fn steer_deg(&self) -> f64 {
        lock(&self.wheel).steer_deg
    }

    /// Make the absolute sensor report `reading` until cleared with `None`
    pub fn force_absolute_reading(&self, reading: Option<f64>) {
        lock(&self.wheel).forced_reading = reading;
    }

    /// Move the wheel by hand
    pub fn set_steer_deg(&self, degrees: f64) {
        lock(&self.wheel).steer_deg = wrap_degrees(degrees);
    }

    /// Spin a motor shaft by hand, in motor rotations
    pub fn add_drive_rotations(&self, rotations: f64) {
        lock(&self.wheel).drive.rotations += rotations;
    }

    pub fn add_turning_rotations(&self, rotations: f64) {
        let mut wheel = lock(&self.wheel);
        wheel.turning.rotations += rotations;
        let physical = rotations * wheel.turning.direction();
        wheel.steer_deg =
            wrap_degrees(wheel.steer_deg + physical * self.params.turning_gear_ratio * 360.0);
    }

    /// Integrate motor outputs over `dt` seconds
    pub fn step(&self, dt: f64) {
        let mut wheel = lock(&self.wheel);
        advance(&mut wheel.drive, &self.params, dt);
        let turned = advance(&mut wheel.turning, &self.params, dt);
        wheel.steer_deg =
            wrap_degrees(wheel.steer_deg + turned * self.params.turning_gear_ratio * 360.0);
    }

    fn motor(&self, id: u8, channel: Channel) -> SimMotor {
        SimMotor {
            wheel: self.wheel.clone(),
            id,
            channel,
        }
    }

    fn encoder(&self, channel: Channel) -> SimEncoder {
        SimEncoder {
            wheel: self.wheel.clone(),
            channel,
            zero_rotations: 0.0,
            position_factor: 1.0,
            velocity_factor: 1.0,
        }
    }

    fn absolute_encoder(&self, id: u8) -> SimAbsoluteEncoder {
        SimAbsoluteEncoder {
            wheel: self.wheel.clone(),
            id,
            offset_deg: 0.0,
            reversed: false,
        }
    }
}

pub struct SimMotor {
    wheel: Arc<Mutex<Wheel>>,
    id: u8,
    channel: Channel,
}

impl MotorController for SimMotor {
    fn id(&self) -> u8 {
        self.id
    }

    fn set(&mut self, output: f64) -> Result<()> {
        let output = check_output(self.id, output)?;
        lock(&self.wheel).motor_mut(self.channel).output = output;
        Ok(())
    }

    fn get(&self) -> f64 {
        lock(&self.wheel).motor(self.channel).output
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        lock(&self.wheel).motor_mut(self.channel).inverted = inverted;
        Ok(())
    }

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()> {
        lock(&self.wheel).motor_mut(self.channel).idle_mode = mode;
        Ok(())
    }

    fn idle_mode(&self) -> IdleMode {
        lock(&self.wheel).motor(self.channel).idle_mode
    }
}

pub struct SimEncoder {
    wheel: Arc<Mutex<Wheel>>,
    channel: Channel,
    zero_rotations: f64,
    position_factor: f64,
    velocity_factor: f64,
}

impl RelativeEncoder for SimEncoder {
    fn position(&mut self) -> Result<f64> {
        let rotations = lock(&self.wheel).motor(self.channel).rotations;
        Ok((rotations - self.zero_rotations) * self.position_factor)
    }

    fn velocity(&mut self) -> Result<f64> {
        Ok(lock(&self.wheel).motor(self.channel).rpm * self.velocity_factor)
    }

    fn set_position(&mut self, position: f64) -> Result<()> {
        let rotations = lock(&self.wheel).motor(self.channel).rotations;
        self.zero_rotations = rotations - position / self.position_factor;
        Ok(())
    }

    fn set_position_conversion_factor(&mut self, factor: f64) {
        self.position_factor = factor;
    }

    fn set_velocity_conversion_factor(&mut self, factor: f64) {
        self.velocity_factor = factor;
    }
}

pub struct SimAbsoluteEncoder {
    wheel: Arc<Mutex<Wheel>>,
    id: u8,
    offset_deg: f64,
    reversed: bool,
}

impl AbsoluteEncoder for SimAbsoluteEncoder {
    fn id(&self) -> u8 {
        self.id
    }

    fn absolute_position(&mut self) -> Result<f64> {
        let (steer, forced) = {
            let wheel = lock(&self.wheel);
            (wheel.steer_deg, wheel.forced_reading)
        };
        if let Some(reading) = forced {
            return Ok(reading);
        }
        let degrees = if self.reversed { 360.0 - steer } else { steer };
        Ok(wrap_degrees(degrees + self.offset_deg))
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

/// Backend handing out simulated wheels
#[derive(Debug, Default)]
pub struct SimBackend {
    params: SimParams,
    wheels: Vec<SimHandle>,
    offline: HashSet<u8>,
}

impl SimBackend {
    pub fn new(params: SimParams) -> Self {
        Self {
            params,
            wheels: Vec::new(),
            offline: HashSet::new(),
        }
    }

    /// Make a device ID fail to open
    pub fn set_offline(&mut self, id: u8) {
        self.offline.insert(id);
    }

    /// Handles in the order modules were opened
    pub fn wheels(&self) -> &[SimHandle] {
        &self.wheels
    }

    fn require(&self, id: u8, kind: &'static str) -> Result<()> {
        if self.offline.contains(&id) {
            Err(HardwareError::DeviceUnavailable { id, kind })
        } else {
            Ok(())
        }
    }
}

impl HardwareBackend for SimBackend {
    fn open_module(&mut self, config: &ModuleConfig) -> Result<ModuleDevices> {
        self.require(config.drive_motor_id, "drive motor")?;
        self.require(config.turning_motor_id, "turning motor")?;
        self.require(config.absolute_encoder_id, "absolute encoder")?;

        let handle = SimHandle::new(self.params, config.sim_initial_angle_deg);
        let devices = ModuleDevices {
            drive_motor: Box::new(handle.motor(config.drive_motor_id, Channel::Drive)),
            turning_motor: Box::new(handle.motor(config.turning_motor_id, Channel::Turning)),
            drive_encoder: Box::new(handle.encoder(Channel::Drive)),
            turning_encoder: Box::new(handle.encoder(Channel::Turning)),
            absolute_encoder: Box::new(handle.absolute_encoder(config.absolute_encoder_id)),
        };
        self.wheels.push(handle);
        Ok(devices)
    }

    fn step(&mut self, dt: f64) {
        for wheel in &self.wheels {
            wheel.step(dt);
        }
    }
}
