// Kobuki serial protocol
//
// Packet format: [0xAA, 0x55, Length, Payload..., Checksum]
// Payload is a run of sub-payloads: [ID, Size, Data...]
// Checksum is the XOR of the length byte and every payload byte.

pub mod base_control;
pub mod command;
pub mod feedback;
mod parser;

use std::collections::VecDeque;

pub use base_control::{BaseControl, base_control_to_velocity, velocity_to_base_control};
pub use command::{Command, encode_packet};
pub use feedback::{DeviceInfo, Feedback, Version};
pub use parser::{FrameParser, MAX_PENDING_BYTES, Packets, ParserStats};

/// Packet header bytes
pub const HEADER: [u8; 2] = [0xAA, 0x55];

/// XOR checksum over length byte + payload
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Frame a payload with header, length and checksum
pub fn build_packet(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= u8::MAX as usize);
    let mut packet = Vec::with_capacity(payload.len() + 4);
    packet.extend_from_slice(&HEADER);
    packet.push(payload.len() as u8);
    packet.extend_from_slice(payload);
    packet.push(checksum(&packet[2..]));
    packet
}

/// A checksum-validated packet payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Command encoder plus streaming feedback decoder for one connection
#[derive(Debug, Default)]
pub struct Codec {
    parser: FrameParser,
}

impl Codec {
    pub fn new() -> Self {
        Self {
            parser: FrameParser::new(),
        }
    }

    /// Framed base-control packet for body velocities (m/s, rad/s)
    pub fn encode_command(&self, linear: f32, angular: f32) -> Vec<u8> {
        Command::velocity(linear, angular).encode()
    }

    pub fn encode(&self, command: &Command) -> Vec<u8> {
        command.encode()
    }

    /// Buffer inbound bytes and lazily yield the feedback they complete
    pub fn feed<'a>(&'a mut self, bytes: &[u8]) -> Feedbacks<'a> {
        Feedbacks {
            packets: self.parser.feed(bytes),
            queued: VecDeque::new(),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.parser.stats()
    }

    /// Drop partially received bytes
    pub fn reset(&mut self) {
        self.parser.reset();
    }
}

/// Lazy sequence of feedback items from one `Codec::feed` call
pub struct Feedbacks<'a> {
    packets: Packets<'a>,
    queued: VecDeque<Feedback>,
}

impl Feedbacks<'_> {
    /// Consume the sequence, keeping only the newest core-sensor frame
    pub fn latest_sensors(self) -> Option<crate::sensors::RawTelemetryFrame> {
        self.filter_map(|item| match item {
            Feedback::Sensors(frame) => Some(frame),
            _ => None,
        })
        .last()
    }
}

impl Iterator for Feedbacks<'_> {
    type Item = Feedback;

    fn next(&mut self) -> Option<Feedback> {
        loop {
            if let Some(item) = self.queued.pop_front() {
                return Some(item);
            }
            let packet = self.packets.next()?;
            let (items, error) = feedback::parse_packet(&packet);
            if let Some(error) = error {
                self.packets.parser().note(error);
            }
            self.queued.extend(items);
        }
    }
}
