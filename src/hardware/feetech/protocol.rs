// Feetech STS packet codec
//
// Frames look like Dynamixel 1.0:
//   request: [0xFF, 0xFF, id, len, instruction, params..., checksum]
//   status:  [0xFF, 0xFF, id, len, error, params..., checksum]
// where len counts everything after itself and checksum is the inverted
// low byte of the sum of id..params.

use super::FeetechError;

pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Broadcast ID, used by sync writes
pub const BROADCAST_ID: u8 = 0xFE;

/// Encoder steps per output shaft revolution
pub const STEPS_PER_REVOLUTION: u16 = 4096;

/// Full-scale value of the open-loop PWM register
pub const PWM_FULL_SCALE: i16 = 1000;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Control table entries used by the swerve backend
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=open-loop PWM
    TorqueEnable = 40,    // 1 byte
    GoalPwm = 44,         // 2 bytes, shares the goal-time slot; sign in bit 10
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, 0..4095 within one turn
    PresentSpeed = 58,    // 2 bytes, steps/s, sign in bit 15
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
}

/// Inverted low byte of the byte sum
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

/// Serialize a request frame
pub fn encode_request(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(params.len() + 6);
    frame.extend_from_slice(&HEADER);
    frame.push(id);
    frame.push((params.len() + 2) as u8);
    frame.push(instruction as u8);
    frame.extend_from_slice(params);
    let sum = checksum(&frame[HEADER.len()..]);
    frame.push(sum);
    frame
}

/// Build a sync write of one 16-bit register across several servos
pub fn encode_sync_write_word(register: Register, data: &[(u8, u16)]) -> Vec<u8> {
    let mut params = Vec::with_capacity(2 + data.len() * 3);
    params.push(register as u8);
    params.push(2);
    for &(id, value) in data {
        params.push(id);
        params.extend_from_slice(&value.to_le_bytes());
    }
    encode_request(BROADCAST_ID, Instruction::SyncWrite, &params)
}

/// Decoded status frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: u8,
    pub params: Vec<u8>,
}

/// Validate the body of a status frame (everything after the header and
/// length byte) and extract its parameters.
pub fn decode_status(expected_id: u8, id: u8, body: &[u8]) -> Result<Status, FeetechError> {
    if id != expected_id {
        return Err(FeetechError::InvalidResponse {
            id: expected_id,
            reason: format!("reply came from servo {}", id),
        });
    }
    let Some((&received, payload)) = body.split_last() else {
        return Err(FeetechError::InvalidResponse {
            id,
            reason: "empty status body".to_string(),
        });
    };
    let Some((&error, params)) = payload.split_first() else {
        return Err(FeetechError::InvalidResponse {
            id,
            reason: "status body without error byte".to_string(),
        });
    };

    let mut summed = vec![id, body.len() as u8];
    summed.extend_from_slice(payload);
    if checksum(&summed) != received {
        return Err(FeetechError::ChecksumMismatch { id });
    }
    if error != 0 {
        return Err(FeetechError::ServoFault { id, status: error });
    }
    Ok(Status {
        id,
        params: params.to_vec(),
    })
}

/// Encode an open-loop duty in [-1000, 1000]: magnitude in bits 0-9, sign in bit 10
pub fn encode_pwm(duty: i16) -> u16 {
    let magnitude = duty.unsigned_abs().min(PWM_FULL_SCALE as u16);
    if duty < 0 { magnitude | (1 << 10) } else { magnitude }
}

/// Decode a speed word: magnitude in bits 0-14, sign in bit 15
pub fn decode_speed(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

/// Signed step difference between two single-turn readings, taking the short way
pub fn step_delta(previous: u16, current: u16) -> i32 {
    let span = STEPS_PER_REVOLUTION as i32;
    let half = span / 2;
    (current as i32 - previous as i32 + half).rem_euclid(span) - half
}
