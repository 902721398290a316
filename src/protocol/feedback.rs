// Inbound feedback sub-payloads
//
// A telemetry packet carries several sub-payloads; only the ones the driver
// consumes are decoded, the rest are skipped by size.

use super::Packet;
use crate::error::FrameError;
use crate::sensors::RawTelemetryFrame;
use std::fmt;

/// Feedback sub-payload identifiers
pub const FB_CORE_SENSORS: u8 = 0x01;
pub const FB_HARDWARE_VERSION: u8 = 0x0A;
pub const FB_FIRMWARE_VERSION: u8 = 0x0B;

/// Data bytes in the core sensor block
pub const CORE_SENSORS_SIZE: usize = 15;

/// Semantic version reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identification gathered during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct DeviceInfo {
    pub hardware: Option<Version>,
    pub firmware: Option<Version>,
}

/// One decoded feedback item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Sensors(RawTelemetryFrame),
    HardwareVersion(Version),
    FirmwareVersion(Version),
}

/// Split a validated packet into feedback items. Sub-payloads the driver
/// does not use are skipped; a malformed one ends the walk.
pub fn parse_packet(packet: &Packet) -> (Vec<Feedback>, Option<FrameError>) {
    let mut items = Vec::new();
    let mut rest = packet.payload();

    while !rest.is_empty() {
        let [id, size, tail @ ..] = rest else {
            return (
                items,
                Some(FrameError::MalformedSubPayload {
                    id: rest[0],
                    reason: "truncated sub-payload header".to_string(),
                }),
            );
        };
        let (id, size) = (*id, *size as usize);
        if tail.len() < size {
            return (
                items,
                Some(FrameError::MalformedSubPayload {
                    id,
                    reason: format!("size {} exceeds remaining {} bytes", size, tail.len()),
                }),
            );
        }
        let (data, next) = tail.split_at(size);

        let item = match id {
            FB_CORE_SENSORS => match parse_core_sensors(data) {
                Some(frame) => Some(Feedback::Sensors(frame)),
                None => {
                    return (
                        items,
                        Some(FrameError::MalformedSubPayload {
                            id,
                            reason: format!("core sensors need {} bytes, got {}", CORE_SENSORS_SIZE, size),
                        }),
                    );
                }
            },
            FB_HARDWARE_VERSION => parse_version(data).map(Feedback::HardwareVersion),
            FB_FIRMWARE_VERSION => parse_version(data).map(Feedback::FirmwareVersion),
            _ => None,
        };
        items.extend(item);
        rest = next;
    }

    (items, None)
}

/// Decode the 15-byte little-endian core sensor block
pub fn parse_core_sensors(data: &[u8]) -> Option<RawTelemetryFrame> {
    if data.len() < CORE_SENSORS_SIZE {
        return None;
    }
    let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);

    Some(RawTelemetryFrame {
        time_stamp: u16_at(0),
        bumper: data[2],
        wheel_drop: data[3],
        cliff: data[4],
        left_encoder: u16_at(5),
        right_encoder: u16_at(7),
        left_pwm: data[9] as i8,
        right_pwm: data[10] as i8,
        buttons: data[11],
        charger: data[12],
        battery: data[13],
        over_current: data[14],
    })
}

/// Inverse of `parse_core_sensors`, used by simulators and tests
pub fn encode_core_sensors(frame: &RawTelemetryFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(CORE_SENSORS_SIZE + 2);
    out.push(FB_CORE_SENSORS);
    out.push(CORE_SENSORS_SIZE as u8);
    out.extend_from_slice(&frame.time_stamp.to_le_bytes());
    out.push(frame.bumper);
    out.push(frame.wheel_drop);
    out.push(frame.cliff);
    out.extend_from_slice(&frame.left_encoder.to_le_bytes());
    out.extend_from_slice(&frame.right_encoder.to_le_bytes());
    out.push(frame.left_pwm as u8);
    out.push(frame.right_pwm as u8);
    out.push(frame.buttons);
    out.push(frame.charger);
    out.push(frame.battery);
    out.push(frame.over_current);
    out
}

// Version block: [patch, minor, major, reserved]
fn parse_version(data: &[u8]) -> Option<Version> {
    match data {
        [patch, minor, major, ..] => Some(Version {
            major: *major,
            minor: *minor,
            patch: *patch,
        }),
        _ => None,
    }
}
