// Device session: owns the transport and codec and sequences the
// connect -> operate -> disable lifecycle.
//
// Safety ordering on shutdown: zero velocity, flush, motor power off,
// flush, close. Every step runs even when an earlier one fails.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ConnectionParams, HandshakePolicy};
use crate::error::{ConnectError, DriverError, IoError, Result};
use crate::protocol::{Codec, Command, DeviceInfo, Feedback, ParserStats};
use crate::sensors::{RawTelemetryFrame, SensorSnapshot, decode};
use crate::transport::{SerialTransport, Transport};

/// Bytes requested per transport read
const READ_CHUNK: usize = 256;

/// Reads per drain; bounds `read_sensor_data` when the link is saturated
const MAX_DRAIN_READS: usize = 16;

/// Back-off between empty reads while waiting on the controller
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Operating,
    Disabled,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disabled | SessionState::Error)
    }
}

/// Open a session on a serial device with default parameters
pub fn connect(device_path: &str) -> std::result::Result<Session, ConnectError> {
    Session::connect(ConnectionParams::new(device_path))
}

/// Stateful driver for one base controller
pub struct Session<T: Transport = SerialTransport> {
    transport: T,
    codec: Codec,
    params: ConnectionParams,
    state: SessionState,
    last_snapshot: Option<SensorSnapshot>,
    device_info: DeviceInfo,
}

impl Session<SerialTransport> {
    /// Open the serial device and run the handshake
    pub fn connect(params: ConnectionParams) -> std::result::Result<Self, ConnectError> {
        info!("Connecting to base on {}", params.device);
        let transport = SerialTransport::open(&params).map_err(|e| {
            error!("Session Connecting -> Error: {}", e);
            e
        })?;
        Self::with_transport(transport, params)
    }
}

impl<T: Transport> Session<T> {
    /// Run the handshake over an already open transport
    pub fn with_transport(
        transport: T,
        params: ConnectionParams,
    ) -> std::result::Result<Self, ConnectError> {
        let mut session = Self {
            transport,
            codec: Codec::new(),
            params,
            state: SessionState::Uninitialized,
            last_snapshot: None,
            device_info: DeviceInfo::default(),
        };
        session.set_state(SessionState::Connecting);

        match session.handshake() {
            Ok(()) => {
                session.set_state(SessionState::Operating);
                Ok(session)
            }
            Err(e) => {
                error!("Handshake failed: {}", e);
                session.set_state(SessionState::Error);
                session.transport.close();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Versions reported by the controller so far
    pub fn device_info(&self) -> DeviceInfo {
        self.device_info
    }

    /// Framing errors recovered by the codec
    pub fn parser_stats(&self) -> ParserStats {
        self.codec.stats()
    }

    /// Command body velocities (m/s, rad/s); written immediately, not queued
    pub fn move_base(&mut self, linear: f32, angular: f32) -> Result<()> {
        self.ensure_operating()?;
        let packet = self.codec.encode_command(linear, angular);
        debug!("Base control: linear={:.3} angular={:.3}", linear, angular);
        let result = self.transport.write_all(&packet);
        self.surface(result)
    }

    /// Drain pending telemetry and return the newest snapshot
    ///
    /// Falls back to the last decoded snapshot when nothing new arrived,
    /// or `NoDataYet` when telemetry has never been seen.
    pub fn read_sensor_data(&mut self) -> Result<SensorSnapshot> {
        self.ensure_operating()?;
        let drained = self.drain();
        match self.surface(drained)? {
            Some(raw) => {
                let snapshot = decode(&raw);
                self.last_snapshot = Some(snapshot);
                Ok(snapshot)
            }
            None => self.last_snapshot.ok_or(DriverError::NoDataYet),
        }
    }

    /// Stop the base, cut motor power and release the transport.
    /// Never fails; soft errors along the way are logged.
    pub fn shutdown(&mut self) {
        match self.state {
            SessionState::Operating => {}
            SessionState::Disabled => return,
            SessionState::Error => {
                self.transport.close();
                return;
            }
            SessionState::Uninitialized | SessionState::Connecting => {
                self.transport.close();
                self.set_state(SessionState::Disabled);
                return;
            }
        }

        info!("Shutting down base");

        if let Err(e) = self.send_and_flush(&Command::stop()) {
            warn!("Failed to send zero velocity during shutdown: {}", e);
        }
        if let Err(e) = self.send_and_flush(&Command::MotorPower(false)) {
            warn!("Failed to disable motor power during shutdown: {}", e);
        }
        if let Err(e) = self.wait_for_motors_idle() {
            warn!("Motor disable not acknowledged: {}", e);
        }

        self.transport.close();
        self.set_state(SessionState::Disabled);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!("Session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn ensure_operating(&self) -> Result<()> {
        match self.state {
            SessionState::Operating => Ok(()),
            state => Err(DriverError::InvalidState(state)),
        }
    }

    /// Surface a device-level failure once and park the session in `Error`
    fn surface<R>(&mut self, result: std::result::Result<R, IoError>) -> Result<R> {
        result.map_err(|e| {
            error!("Transport failure: {}", e);
            self.set_state(SessionState::Error);
            DriverError::Io(e)
        })
    }

    fn send_and_flush(&mut self, command: &Command) -> std::result::Result<(), IoError> {
        self.transport.write_all(&self.codec.encode(command))?;
        self.transport.flush()
    }

    /// Read what is available (bounded) and keep the newest core-sensor frame
    fn drain(&mut self) -> std::result::Result<Option<RawTelemetryFrame>, IoError> {
        let mut buf = [0u8; READ_CHUNK];
        let mut latest = None;

        for _ in 0..MAX_DRAIN_READS {
            let n = self.transport.read_available(&mut buf)?;
            if n == 0 {
                break;
            }
            for item in self.codec.feed(&buf[..n]) {
                match item {
                    Feedback::Sensors(frame) => latest = Some(frame),
                    Feedback::HardwareVersion(v) => {
                        info!("Controller hardware version {}", v);
                        self.device_info.hardware = Some(v);
                    }
                    Feedback::FirmwareVersion(v) => {
                        info!("Controller firmware version {}", v);
                        self.device_info.firmware = Some(v);
                    }
                }
            }
        }

        Ok(latest)
    }

    fn handshake(&mut self) -> std::result::Result<(), ConnectError> {
        self.send_and_flush(&Command::request_versions())?;

        let timeout = self.params.handshake_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(raw) = self.drain()? {
                debug!("First telemetry frame at device time {}", raw.time_stamp);
                self.last_snapshot = Some(decode(&raw));
                break;
            }
            if Instant::now() >= deadline {
                match self.params.handshake {
                    HandshakePolicy::AwaitTelemetry => {
                        return Err(ConnectError::HandshakeTimeout {
                            timeout_ms: self.params.handshake_timeout_ms,
                        });
                    }
                    HandshakePolicy::GracePeriod => {
                        warn!(
                            "No telemetry after {}ms grace period, continuing",
                            timeout.as_millis()
                        );
                        break;
                    }
                }
            }
            thread::sleep(POLL_INTERVAL);
        }

        self.send_and_flush(&Command::MotorPower(true))?;
        Ok(())
    }

    /// Wait (bounded) for a frame showing both wheels at zero duty
    fn wait_for_motors_idle(&mut self) -> std::result::Result<(), String> {
        let deadline = Instant::now() + self.params.disable_ack_timeout();
        loop {
            match self.drain() {
                Ok(Some(raw)) => {
                    let snapshot = decode(&raw);
                    self.last_snapshot = Some(snapshot);
                    if !snapshot.motors_active() {
                        debug!("Motors idle at device time {}", raw.time_stamp);
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => return Err(e.to_string()),
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "no idle telemetry within {}ms",
                    self.params.disable_ack_timeout_ms
                ));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        // Never leave a powered base behind
        if self.state == SessionState::Operating {
            self.shutdown();
        } else if self.transport.is_open() {
            self.transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::feedback::{FB_FIRMWARE_VERSION, encode_core_sensors};
    use crate::protocol::{FrameParser, Version, build_packet};
    use crate::transport::{MockEvent, MockTransport};

    fn test_params() -> ConnectionParams {
        ConnectionParams {
            handshake_timeout_ms: 50,
            disable_ack_timeout_ms: 10,
            ..ConnectionParams::new("mock")
        }
    }

    fn telemetry(time_stamp: u16, bumper: u8, pwm: i8) -> Vec<u8> {
        let frame = RawTelemetryFrame {
            time_stamp,
            bumper,
            left_pwm: pwm,
            right_pwm: pwm,
            battery: 155,
            ..Default::default()
        };
        build_packet(&encode_core_sensors(&frame))
    }

    fn connected() -> (Session<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        mock.inject_read(&telemetry(1, 0, 0));
        let session = Session::with_transport(mock.clone(), test_params()).unwrap();
        mock.clear_events();
        (session, mock)
    }

    /// Decode every command packet in a byte stream
    fn sent_commands(bytes: &[u8]) -> Vec<Command> {
        let mut parser = FrameParser::new();
        parser
            .feed(bytes)
            .flat_map(|packet| Command::decode(packet.payload()).unwrap())
            .collect()
    }

    #[test]
    fn test_handshake_requests_versions_then_powers_motors() {
        let mock = MockTransport::new();
        mock.inject_read(&telemetry(1, 0, 0));
        let session = Session::with_transport(mock.clone(), test_params()).unwrap();

        assert_eq!(session.state(), SessionState::Operating);
        assert_eq!(
            sent_commands(&mock.written()),
            vec![Command::request_versions(), Command::MotorPower(true)]
        );
    }

    #[test]
    fn test_handshake_timeout_without_telemetry() {
        let mock = MockTransport::new();
        let result = Session::with_transport(mock.clone(), test_params());

        assert!(matches!(
            result,
            Err(ConnectError::HandshakeTimeout { timeout_ms: 50 })
        ));
        assert!(!mock.is_open());
        // Motors were never powered
        assert!(!sent_commands(&mock.written()).contains(&Command::MotorPower(true)));
    }

    #[test]
    fn test_grace_period_proceeds_without_telemetry() {
        let mock = MockTransport::new();
        let params = ConnectionParams {
            handshake: HandshakePolicy::GracePeriod,
            handshake_timeout_ms: 10,
            ..test_params()
        };
        let mut session = Session::with_transport(mock.clone(), params).unwrap();

        assert_eq!(session.state(), SessionState::Operating);
        assert!(matches!(
            session.read_sensor_data(),
            Err(DriverError::NoDataYet)
        ));
    }

    #[test]
    fn test_handshake_io_failure() {
        let mock = MockTransport::new();
        mock.disconnect();
        let result = Session::with_transport(mock.clone(), test_params());
        assert!(matches!(
            result,
            Err(ConnectError::Io(IoError::Disconnected))
        ));
    }

    #[test]
    fn test_move_writes_base_control() {
        let (mut session, mock) = connected();
        session.move_base(0.2, 0.0).unwrap();

        let commands = sent_commands(&mock.written());
        assert_eq!(commands.len(), 1);
        let (linear, angular) = commands[0].as_velocity().unwrap();
        assert!((linear - 0.2).abs() < 0.001);
        assert_eq!(angular, 0.0);
    }

    #[test]
    fn test_read_returns_newest_then_cached() {
        let (mut session, mock) = connected();

        let first = session.read_sensor_data().unwrap();
        assert_eq!(first.time_stamp, 1);

        let mut stream = telemetry(2, 0b001, 0);
        stream.extend(telemetry(3, 0b100, 0));
        mock.inject_read(&stream);

        let newest = session.read_sensor_data().unwrap();
        assert_eq!(newest.time_stamp, 3);
        assert!(newest.bumper_left);
        assert_eq!(newest.battery_voltage, 15.5);

        // Nothing new on the wire: the last snapshot comes back
        assert_eq!(session.read_sensor_data().unwrap(), newest);
    }

    #[test]
    fn test_garbage_does_not_fail_reads() {
        let (mut session, mock) = connected();
        let mut bad = telemetry(9, 0, 0);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        mock.inject_read(&bad);
        mock.inject_read(&[0x00, 0x13, 0x37]);
        mock.inject_read(&telemetry(10, 0, 0));

        assert_eq!(session.read_sensor_data().unwrap().time_stamp, 10);
        assert_eq!(session.parser_stats().checksum_errors, 1);
    }

    #[test]
    fn test_device_info_from_version_feedback() {
        let (mut session, mock) = connected();
        let mut payload = encode_core_sensors(&RawTelemetryFrame::default());
        payload.extend_from_slice(&[FB_FIRMWARE_VERSION, 4, 0, 4, 1, 0]);
        mock.inject_read(&build_packet(&payload));

        session.read_sensor_data().unwrap();
        assert_eq!(
            session.device_info().firmware,
            Some(Version {
                major: 1,
                minor: 4,
                patch: 0
            })
        );
    }

    #[test]
    fn test_shutdown_order() {
        let (mut session, mock) = connected();
        session.move_base(0.3, 0.5).unwrap();
        mock.clear_events();

        session.shutdown();
        assert_eq!(session.state(), SessionState::Disabled);

        let events = mock.events();
        assert_eq!(
            events,
            vec![
                MockEvent::Write(Command::stop().encode()),
                MockEvent::Flush,
                MockEvent::Write(Command::MotorPower(false).encode()),
                MockEvent::Flush,
                MockEvent::Close,
            ]
        );
    }

    fn connected_with_ack_timeout(ack_timeout_ms: u64) -> (Session<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        mock.inject_read(&telemetry(1, 0, 0));
        let params = ConnectionParams {
            disable_ack_timeout_ms: ack_timeout_ms,
            ..test_params()
        };
        let session = Session::with_transport(mock.clone(), params).unwrap();
        mock.clear_events();
        (session, mock)
    }

    #[test]
    fn test_shutdown_returns_on_idle_frame() {
        let (mut session, mock) = connected_with_ack_timeout(1000);
        mock.inject_read(&telemetry(5, 0, 0));

        let started = Instant::now();
        session.shutdown();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(mock.events().last(), Some(&MockEvent::Close));
        assert_eq!(session.state(), SessionState::Disabled);
    }

    #[test]
    fn test_shutdown_waits_out_active_frames() {
        let (mut session, mock) = connected_with_ack_timeout(1000);
        mock.inject_read(&telemetry(5, 0, 40));

        let started = Instant::now();
        session.shutdown();
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(mock.events().last(), Some(&MockEvent::Close));
        assert_eq!(mock.close_count(), 1);
        assert_eq!(session.state(), SessionState::Disabled);
    }

    #[test]
    fn test_shutdown_completes_when_writes_fail() {
        let (mut session, mock) = connected();
        mock.disconnect();

        session.shutdown();
        assert_eq!(mock.events(), vec![MockEvent::Close]);
        assert_eq!(session.state(), SessionState::Disabled);
    }

    #[test]
    fn test_move_failure_moves_to_error() {
        let (mut session, mock) = connected();
        mock.disconnect();

        assert!(matches!(
            session.move_base(0.2, 0.0),
            Err(DriverError::Io(IoError::Disconnected))
        ));
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.move_base(0.2, 0.0),
            Err(DriverError::InvalidState(SessionState::Error))
        ));
    }

    #[test]
    fn test_move_after_shutdown_is_invalid_and_silent() {
        let (mut session, mock) = connected();
        session.shutdown();
        mock.clear_events();

        assert!(matches!(
            session.move_base(0.1, 0.0),
            Err(DriverError::InvalidState(SessionState::Disabled))
        ));
        assert!(matches!(
            session.read_sensor_data(),
            Err(DriverError::InvalidState(SessionState::Disabled))
        ));
        assert!(mock.events().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut session, mock) = connected();
        session.shutdown();
        session.shutdown();
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_disconnect_moves_to_error() {
        let (mut session, mock) = connected();
        mock.disconnect();

        assert!(matches!(
            session.read_sensor_data(),
            Err(DriverError::Io(IoError::Disconnected))
        ));
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.move_base(0.1, 0.0),
            Err(DriverError::InvalidState(SessionState::Error))
        ));

        // Shutdown from Error still releases the handle
        session.shutdown();
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_drop_stops_base() {
        let (mut session, mock) = connected();
        session.move_base(0.2, 0.0).unwrap();
        mock.clear_events();
        drop(session);

        let events = mock.events();
        assert_eq!(events.first(), Some(&MockEvent::Write(Command::stop().encode())));
        assert_eq!(events.last(), Some(&MockEvent::Close));
    }
}
