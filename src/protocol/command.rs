// Outbound command sub-payloads
//
// Each command is one sub-payload: [ID, SIZE, DATA...]. Several commands
// may share a packet; `encode_packet` frames them together.

use super::base_control::{
    BaseControl, base_control_to_velocity, velocity_to_base_control,
};
use super::build_packet;
use crate::error::FrameError;

/// Command sub-payload identifiers
pub const CMD_BASE_CONTROL: u8 = 0x01;
pub const CMD_MOTOR_POWER: u8 = 0x03;
pub const CMD_REQUEST_EXTRA: u8 = 0x09;

/// Flags for the request-extra command
pub const REQUEST_HARDWARE_VERSION: u16 = 0x0001;
pub const REQUEST_FIRMWARE_VERSION: u16 = 0x0002;

/// Command sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    BaseControl(BaseControl),
    MotorPower(bool),
    RequestExtra { flags: u16 },
}

impl Command {
    /// Base-control command for body velocities (m/s, rad/s)
    pub fn velocity(linear: f32, angular: f32) -> Self {
        Command::BaseControl(velocity_to_base_control(linear, angular))
    }

    pub fn stop() -> Self {
        Command::BaseControl(BaseControl::zero())
    }

    pub fn request_versions() -> Self {
        Command::RequestExtra {
            flags: REQUEST_HARDWARE_VERSION | REQUEST_FIRMWARE_VERSION,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Command::BaseControl(_) => CMD_BASE_CONTROL,
            Command::MotorPower(_) => CMD_MOTOR_POWER,
            Command::RequestExtra { .. } => CMD_REQUEST_EXTRA,
        }
    }

    /// Append this command's sub-payload to `out`
    pub fn write_sub_payload(&self, out: &mut Vec<u8>) {
        out.push(self.id());
        match *self {
            Command::BaseControl(cmd) => {
                out.push(4);
                out.extend_from_slice(&cmd.speed.to_le_bytes());
                out.extend_from_slice(&cmd.radius.to_le_bytes());
            }
            Command::MotorPower(on) => {
                out.push(1);
                out.push(on as u8);
            }
            Command::RequestExtra { flags } => {
                out.push(2);
                out.extend_from_slice(&flags.to_le_bytes());
            }
        }
    }

    /// Framed packet carrying this single command
    pub fn encode(&self) -> Vec<u8> {
        encode_packet(std::slice::from_ref(self))
    }

    /// Body velocities carried by a base-control command
    pub fn as_velocity(&self) -> Option<(f32, f32)> {
        match *self {
            Command::BaseControl(cmd) => Some(base_control_to_velocity(cmd)),
            _ => None,
        }
    }

    /// Parse an outbound packet payload back into commands
    pub fn decode(payload: &[u8]) -> Result<Vec<Command>, FrameError> {
        let mut commands = Vec::new();
        let mut rest = payload;

        while !rest.is_empty() {
            let [id, size, tail @ ..] = rest else {
                return Err(FrameError::MalformedSubPayload {
                    id: rest[0],
                    reason: "truncated sub-payload header".to_string(),
                });
            };
            let (id, size) = (*id, *size as usize);
            if tail.len() < size {
                return Err(FrameError::MalformedSubPayload {
                    id,
                    reason: format!("size {} exceeds remaining {} bytes", size, tail.len()),
                });
            }
            let (data, next) = tail.split_at(size);

            let command = match (id, data) {
                (CMD_BASE_CONTROL, [s0, s1, r0, r1]) => Command::BaseControl(BaseControl::new(
                    i16::from_le_bytes([*s0, *s1]),
                    i16::from_le_bytes([*r0, *r1]),
                )),
                (CMD_MOTOR_POWER, [on]) => Command::MotorPower(*on != 0),
                (CMD_REQUEST_EXTRA, [f0, f1]) => Command::RequestExtra {
                    flags: u16::from_le_bytes([*f0, *f1]),
                },
                _ => {
                    return Err(FrameError::MalformedSubPayload {
                        id,
                        reason: format!("unknown command or bad size {}", size),
                    });
                }
            };
            commands.push(command);
            rest = next;
        }

        Ok(commands)
    }
}

/// Frame one or more commands into a single packet
pub fn encode_packet(commands: &[Command]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(commands.len() * 6);
    for command in commands {
        command.write_sub_payload(&mut payload);
    }
    build_packet(&payload)
}
