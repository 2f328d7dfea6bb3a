// Closed-loop control of one swerve module
//
// Two regimes share the same hardware:
// - homing: P control on the absolute sensor, in degrees, with clamped output
// - driving: P control on the relative turning encoder, in radians

use tracing::{debug, info, warn};

use super::angle::{is_valid_absolute_deg, shortest_degrees};
use super::clamp::ClampPolicy;
use super::homing::Homeable;
use super::pid::PController;
use super::state::{ModulePosition, ModuleState};
use crate::config::{HomingConfig, ModuleConfig, ModuleConstants};
use crate::hardware::{
    AbsoluteEncoder, HardwareError, IdleMode, ModuleDevices, MotorController, RelativeEncoder,
    Result,
};

/// Outcome of one homing evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomingReport {
    /// Module has settled on its reference
    pub zeroed: bool,
    /// Controller output before the clamp policy
    pub unclamped: f64,
    /// Output actually applied to the turning motor
    pub output: f64,
    /// Absolute sensor returned an unusable reading this tick
    pub sensor_anomaly: bool,
}

/// One steerable, drivable wheel
pub struct SwerveModule {
    name: String,
    id: u8,
    drive_motor: Box<dyn MotorController>,
    turning_motor: Box<dyn MotorController>,
    drive_encoder: Box<dyn RelativeEncoder>,
    turning_encoder: Box<dyn RelativeEncoder>,
    absolute_encoder: Box<dyn AbsoluteEncoder>,
    turning_controller: PController,
    homing_controller: PController,
    clamp: ClampPolicy,
    reference_deg: f64,
    zeroed_tolerance_deg: f64,
    debounce_ticks: u32,
    in_band_ticks: u32,
    /// Turning encoder reading when the module was last confirmed at its reference
    home_turning_rad: f64,
    max_speed: f64,
    speed_deadband: f64,
}

impl SwerveModule {
    /// Configure the module's devices and zero its relative encoders.
    ///
    /// Any failed configuration write is returned; a module that cannot be
    /// configured must not be driven.
    pub fn new(
        config: &ModuleConfig,
        constants: &ModuleConstants,
        homing: &HomingConfig,
        devices: ModuleDevices,
    ) -> Result<Self> {
        let ModuleDevices {
            mut drive_motor,
            mut turning_motor,
            mut drive_encoder,
            mut turning_encoder,
            mut absolute_encoder,
        } = devices;

        absolute_encoder.set_reversed(config.absolute_encoder_reversed);
        absolute_encoder.set_magnet_offset(config.absolute_encoder_offset_deg)?;

        drive_motor.set_idle_mode(IdleMode::Coast)?;
        turning_motor.set_idle_mode(IdleMode::Coast)?;
        drive_motor.set_inverted(config.drive_motor_reversed)?;
        turning_motor.set_inverted(config.turning_motor_reversed)?;

        drive_encoder.set_position_conversion_factor(constants.drive_rot_to_meters);
        drive_encoder.set_velocity_conversion_factor(constants.drive_rpm_to_mps);
        turning_encoder.set_position_conversion_factor(constants.turning_rot_to_rad);
        turning_encoder.set_velocity_conversion_factor(constants.turning_rpm_to_radps);

        let mut turning_controller = PController::new(constants.turning_kp);
        turning_controller.enable_continuous_input(-std::f64::consts::PI, std::f64::consts::PI);
        let mut homing_controller = PController::new(constants.homing_kp);
        homing_controller.enable_continuous_input(0.0, 360.0);

        let mut module = Self {
            name: config.name.clone(),
            id: absolute_encoder.id(),
            drive_motor,
            turning_motor,
            drive_encoder,
            turning_encoder,
            absolute_encoder,
            turning_controller,
            homing_controller,
            clamp: homing.bands.clone(),
            reference_deg: homing.reference_deg,
            zeroed_tolerance_deg: homing.zeroed_tolerance_deg,
            debounce_ticks: homing.zeroed_debounce_ticks.max(1),
            in_band_ticks: 0,
            home_turning_rad: 0.0,
            max_speed: constants.physical_max_speed_mps,
            speed_deadband: constants.speed_deadband_mps,
        };
        module.reset_encoders()?;
        module.stop()?;

        info!(
            "Module {} ready: drive={}, turning={}, absolute={} (offset {:.1} deg)",
            module.name,
            module.drive_motor.id(),
            module.turning_motor.id(),
            module.id,
            module.absolute_encoder.magnet_offset()
        );
        Ok(module)
    }

    fn reset_encoders(&mut self) -> Result<()> {
        self.drive_encoder.set_position(0.0)?;
        self.turning_encoder.set_position(0.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module identity, the absolute encoder's device ID
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn magnet_offset(&self) -> f64 {
        self.absolute_encoder.magnet_offset()
    }

    /// Absolute steering angle in degrees, [0, 360)
    pub fn absolute_position(&mut self) -> Result<f64> {
        self.absolute_encoder.absolute_position()
    }

    /// Turning encoder position in radians since construction, not re-wrapped
    pub fn turning_position(&mut self) -> Result<f64> {
        self.turning_encoder.position()
    }

    /// Drive distance in meters since construction
    pub fn drive_position(&mut self) -> Result<f64> {
        self.drive_encoder.position()
    }

    pub fn drive_velocity(&mut self) -> Result<f64> {
        self.drive_encoder.velocity()
    }

    pub fn turning_velocity(&mut self) -> Result<f64> {
        self.turning_encoder.velocity()
    }

    /// Steering angle relative to the homed reference, radians
    fn steering_angle(&mut self) -> Result<f64> {
        Ok(self.turning_position()? - self.home_turning_rad)
    }

    pub fn position(&mut self) -> Result<ModulePosition> {
        let distance = self.drive_position()?;
        Ok(ModulePosition::new(distance, self.steering_angle()?))
    }

    pub fn state(&mut self) -> Result<ModuleState> {
        let speed = self.drive_velocity()?;
        Ok(ModuleState::new(speed, self.steering_angle()?))
    }

    /// Signed distance of an absolute reading from the reference, degrees in [-180, 180)
    fn distance_from_reference(&self, reading_deg: f64) -> f64 {
        shortest_degrees(reading_deg, self.reference_deg)
    }

    fn in_zeroed_band(&self, reading_deg: f64) -> bool {
        is_valid_absolute_deg(reading_deg)
            && self.distance_from_reference(reading_deg).abs() < self.zeroed_tolerance_deg
    }

    /// True while the absolute reading is strictly inside the zeroed band
    pub fn check_zeroed(&mut self) -> Result<bool> {
        let reading = self.absolute_position()?;
        Ok(self.in_zeroed_band(reading))
    }

    /// Drive the module toward `target` for one control period
    pub fn set_desired_state(&mut self, target: ModuleState) -> Result<()> {
        if target.speed.abs() < self.speed_deadband {
            return self.stop();
        }

        let current = self.steering_angle()?;
        let target = target.optimize(current);
        let drive = (target.speed / self.max_speed).clamp(-1.0, 1.0);
        let turning = self.turning_controller.calculate(current, target.angle);
        debug!(
            "{}: target speed={:.3} angle={:.3} -> drive={:.3} turning={:.3}",
            self.name, target.speed, target.angle, drive, turning
        );

        self.drive_motor.set(drive)?;
        self.turning_motor.set(turning)
    }

    /// One homing evaluation: steer toward the reference on the absolute sensor
    pub fn run_homing_step(&mut self) -> Result<HomingReport> {
        let reading = self.absolute_position()?;

        if !is_valid_absolute_deg(reading) {
            let held = self.turning_motor.get();
            warn!(
                "{}: absolute sensor returned {} deg, holding output {:.3}",
                self.name, reading, held
            );
            self.in_band_ticks = 0;
            return Ok(HomingReport {
                zeroed: false,
                unclamped: 0.0,
                output: held,
                sensor_anomaly: true,
            });
        }

        let distance = self.distance_from_reference(reading);
        let unclamped = self.homing_controller.calculate(distance, 0.0);
        let output = self.clamp.apply(distance, unclamped);

        if self.in_zeroed_band(reading) {
            self.in_band_ticks = self.in_band_ticks.saturating_add(1);
            self.stop()?;
            let zeroed = self.in_band_ticks >= self.debounce_ticks;
            if zeroed && self.in_band_ticks == self.debounce_ticks {
                self.home_turning_rad = self.turning_position()?;
                info!("{}: zeroed at {:.2} deg", self.name, reading);
            }
            return Ok(HomingReport {
                zeroed,
                unclamped,
                output: 0.0,
                sensor_anomaly: false,
            });
        }

        self.in_band_ticks = 0;
        debug!(
            "{}: homing at {:.2} deg, unclamped={:.4} clamped={:.4}",
            self.name, reading, unclamped, output
        );
        self.drive_motor.set(0.0)?;
        self.turning_motor.set(output)?;
        Ok(HomingReport {
            zeroed: false,
            unclamped,
            output,
            sensor_anomaly: false,
        })
    }

    /// Zero both motor outputs
    pub fn stop(&mut self) -> Result<()> {
        self.drive_motor.set(0.0)?;
        self.turning_motor.set(0.0)
    }

    /// Switch the turning motor between coast and brake, returning the new mode
    pub fn toggle_idle_mode(&mut self) -> Result<IdleMode> {
        let mode = self.turning_motor.idle_mode().toggled();
        self.turning_motor.set_idle_mode(mode)?;
        info!("{}: turning idle mode {:?}", self.name, mode);
        Ok(mode)
    }
}

impl Homeable for SwerveModule {
    type Error = HardwareError;

    fn name(&self) -> &str {
        &self.name
    }

    fn run_homing_step(&mut self) -> Result<HomingReport> {
        SwerveModule::run_homing_step(self)
    }

    fn stop(&mut self) -> Result<()> {
        SwerveModule::stop(self)
    }
}
