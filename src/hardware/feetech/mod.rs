// Feetech STS serial bus backend
//
// One serial port carries every servo of the drivetrain. Drive and turn
// motors run in open-loop PWM mode so the module controller's duty outputs
// map straight onto the goal PWM register.

mod devices;
pub mod protocol;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use self::protocol::{Instruction, OperatingMode, Register, Status};
use super::{HardwareBackend, HardwareError, ModuleDevices};
use crate::config::ModuleConfig;

pub use devices::{FeetechAbsoluteEncoder, FeetechEncoder, FeetechMotor};

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Error types for Feetech bus communication
#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} reported fault status 0x{status:02X}")]
    ServoFault { id: u8, status: u8 },

    #[error("Timeout waiting for servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Serial connection to the servo bus
pub struct ServoBus {
    port: Box<dyn SerialPort>,
}

/// Bus handle shared by every device on the same port
pub type SharedBus = Arc<Mutex<ServoBus>>;

pub(crate) fn lock_bus(bus: &SharedBus) -> MutexGuard<'_, ServoBus> {
    bus.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServoBus {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening servo bus on {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }

    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Status> {
        let frame = protocol::encode_request(id, instruction, params);
        self.port.write_all(&frame)?;
        self.port.flush()?;
        self.read_status(id)
    }

    fn read_status(&mut self, expected_id: u8) -> Result<Status> {
        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => FeetechError::Timeout { id: expected_id },
            _ => FeetechError::Io(e),
        })?;
        if head[..2] != protocol::HEADER {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("bad header {:02X?}", &head[..2]),
            });
        }
        let mut body = vec![0u8; head[3] as usize];
        self.port.read_exact(&mut body)?;
        protocol::decode_status(expected_id, head[2], &body)
    }

    /// True if the servo answers a ping
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_byte(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("servo {} {:?} <- {}", id, register, value);
        self.transact(id, Instruction::Write, &[register as u8, value])?;
        Ok(())
    }

    pub fn write_word(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, lo, hi])?;
        Ok(())
    }

    pub fn read_word(&mut self, id: u8, register: Register) -> Result<u16> {
        let status = self.transact(id, Instruction::Read, &[register as u8, 2])?;
        match status.params.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            other => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("expected 2 bytes, got {}", other.len()),
            }),
        }
    }

    /// Write one 16-bit register on several servos; the bus sends no reply
    pub fn sync_write_word(&mut self, register: Register, data: &[(u8, u16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let frame = protocol::encode_sync_write_word(register, data);
        self.port.write_all(&frame)?;
        self.port.flush()?;
        Ok(())
    }

    pub fn set_torque(&mut self, id: u8, enabled: bool) -> Result<()> {
        self.write_byte(id, Register::TorqueEnable, enabled as u8)?;
        self.write_byte(id, Register::Lock, enabled as u8)
    }

    /// Must be called with torque disabled
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_byte(id, Register::OperatingMode, mode as u8)
    }

    /// Open-loop duty in [-1000, 1000]
    pub fn set_pwm(&mut self, id: u8, duty: i16) -> Result<()> {
        self.write_word(id, Register::GoalPwm, protocol::encode_pwm(duty))
    }

    /// Single-turn position in steps, 0..4095
    pub fn present_position(&mut self, id: u8) -> Result<u16> {
        Ok(self.read_word(id, Register::PresentPosition)? % protocol::STEPS_PER_REVOLUTION)
    }

    /// Signed speed in steps/s
    pub fn present_speed(&mut self, id: u8) -> Result<i16> {
        Ok(protocol::decode_speed(self.read_word(id, Register::PresentSpeed)?))
    }
}

/// Opens module devices on a shared Feetech bus
pub struct FeetechBackend {
    bus: SharedBus,
    motor_ids: Vec<u8>,
}

impl FeetechBackend {
    pub fn open(port_name: &str) -> std::result::Result<Self, HardwareError> {
        let bus = ServoBus::open(port_name, DEFAULT_BAUDRATE)?;
        Ok(Self {
            bus: Arc::new(Mutex::new(bus)),
            motor_ids: Vec::new(),
        })
    }

    fn require(&self, id: u8, kind: &'static str) -> std::result::Result<(), HardwareError> {
        if lock_bus(&self.bus).ping(id)? {
            debug!("{} {} responding", kind, id);
            Ok(())
        } else {
            warn!("{} {} not responding to ping", kind, id);
            Err(HardwareError::DeviceUnavailable { id, kind })
        }
    }

    /// Put a motor into open-loop mode with torque off (coasting)
    fn prepare_motor(&self, id: u8) -> std::result::Result<(), HardwareError> {
        let mut bus = lock_bus(&self.bus);
        bus.set_torque(id, false)?;
        bus.set_operating_mode(id, OperatingMode::Pwm)?;
        bus.set_pwm(id, 0)?;
        Ok(())
    }

    /// Zero every motor opened so far in one frame
    pub fn halt_all(&self) -> Result<()> {
        let data: Vec<(u8, u16)> = self.motor_ids.iter().map(|&id| (id, 0)).collect();
        lock_bus(&self.bus).sync_write_word(Register::GoalPwm, &data)
    }
}

impl HardwareBackend for FeetechBackend {
    fn open_module(
        &mut self,
        config: &ModuleConfig,
    ) -> std::result::Result<ModuleDevices, HardwareError> {
        info!(
            "Opening module {}: drive={}, turning={}, absolute={}",
            config.name, config.drive_motor_id, config.turning_motor_id, config.absolute_encoder_id
        );
        self.require(config.drive_motor_id, "drive motor")?;
        self.require(config.turning_motor_id, "turning motor")?;
        self.require(config.absolute_encoder_id, "absolute encoder")?;

        self.prepare_motor(config.drive_motor_id)?;
        self.prepare_motor(config.turning_motor_id)?;
        if config.absolute_encoder_id != config.turning_motor_id {
            // sensor servo is back-driven by the steering axis
            lock_bus(&self.bus).set_torque(config.absolute_encoder_id, false)?;
        }
        self.motor_ids.push(config.drive_motor_id);
        self.motor_ids.push(config.turning_motor_id);

        let drive_encoder = FeetechEncoder::new(
            self.bus.clone(),
            config.drive_motor_id,
            config.drive_motor_reversed,
        )?;
        let turning_encoder = FeetechEncoder::new(
            self.bus.clone(),
            config.turning_motor_id,
            config.turning_motor_reversed,
        )?;

        Ok(ModuleDevices {
            drive_motor: Box::new(FeetechMotor::new(self.bus.clone(), config.drive_motor_id)),
            turning_motor: Box::new(FeetechMotor::new(self.bus.clone(), config.turning_motor_id)),
            drive_encoder: Box::new(drive_encoder),
            turning_encoder: Box::new(turning_encoder),
            absolute_encoder: Box::new(FeetechAbsoluteEncoder::new(
                self.bus.clone(),
                config.absolute_encoder_id,
            )),
        })
    }
}

impl Drop for FeetechBackend {
    fn drop(&mut self) {
        // Leave no servo driving if the runtime exits without stopping modules
        if let Err(e) = self.halt_all() {
            warn!("Failed to halt servos on drop: {}", e);
        }
    }
}
