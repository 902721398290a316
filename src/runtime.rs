// 50 Hz teleop loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. without it if the teleop client crashes and stops sending commands, the base keeps
// driving at the last commanded velocity

use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::block_in_place;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{CMD_TIMEOUT, LOOP_HZ};
use crate::error::DriverError;
use crate::messages::{BaseActuation, BaseCommand, RuntimeHealth};
use crate::sensors::SensorSnapshot;
use crate::session::Session;
use crate::transport::Transport;

pub struct Runtime {
    latest_cmd: Option<BaseCommand>,
    cmd_received_at: Instant,
    last_snapshot: Option<SensorSnapshot>,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            last_snapshot: None,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: BaseCommand) {
        info!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    pub fn on_snapshot(&mut self, snapshot: SensorSnapshot) {
        self.last_snapshot = Some(snapshot);
    }

    /// Compute actuation based on watchdog state and safety sensors
    pub fn compute_actuation(&mut self) -> BaseActuation {
        let cmd_age = self.cmd_received_at.elapsed();

        let mut actuation = if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping robot", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            return BaseActuation::default();
        } else if let Some(ref cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            BaseActuation::from(cmd)
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            return BaseActuation::default();
        };

        if let Some(ref s) = self.last_snapshot {
            if s.any_cliff() || s.any_wheel_drop() {
                if self.health != RuntimeHealth::SafetyStop {
                    warn!("Cliff or wheel drop detected, stopping robot");
                }
                self.health = RuntimeHealth::SafetyStop;
                return BaseActuation::default();
            }
            // Bumper blocks forward motion only so the base can back away
            if s.any_bumper() && actuation.linear > 0.0 {
                self.health = RuntimeHealth::SafetyStop;
                actuation.linear = 0.0;
            }
        }

        actuation
    }
}

/// Drive `session` from `commands` until the channel closes or Ctrl-C.
/// The session is always shut down before returning.
///
/// Session calls block on serial I/O, so they run under `block_in_place`;
/// this needs the multi-threaded runtime.
pub async fn run<T: Transport>(
    mut session: Session<T>,
    mut commands: mpsc::Receiver<BaseCommand>,
    telemetry: watch::Sender<Option<SensorSnapshot>>,
) -> Result<(), DriverError> {
    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );

    let result = loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping runtime");
                break Ok(());
            }
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        let mut closed = false;
        loop {
            match commands.try_recv() {
                Ok(cmd) => runtime.on_command(cmd),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        // 2. Refresh telemetry
        match block_in_place(|| session.read_sensor_data()) {
            Ok(snapshot) => {
                runtime.on_snapshot(snapshot);
                telemetry.send_replace(Some(snapshot));
            }
            Err(DriverError::NoDataYet) => {}
            Err(e) => {
                error!("Telemetry read failed: {}", e);
                runtime.health = RuntimeHealth::DeviceError;
                break Err(e);
            }
        }

        // 3. Compute actuation (includes watchdog logic) and send it
        let previous = runtime.health;
        let actuation = runtime.compute_actuation();
        if runtime.health != previous {
            info!("Runtime health: {:?}", runtime.health);
        }
        if let Err(e) = block_in_place(|| session.move_base(actuation.linear, actuation.angular)) {
            error!("Base command failed: {}", e);
            runtime.health = RuntimeHealth::DeviceError;
            break Err(e);
        }

        if closed {
            info!("Command channel closed, stopping runtime");
            break Ok(());
        }
    };

    block_in_place(|| session.shutdown());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionParams;
    use crate::protocol::feedback::encode_core_sensors;
    use crate::protocol::{Command, FrameParser, build_packet};
    use crate::sensors::RawTelemetryFrame;
    use crate::transport::MockTransport;

    fn stale(runtime: &mut Runtime) {
        if let Some(past) = Instant::now().checked_sub(CMD_TIMEOUT * 2) {
            runtime.cmd_received_at = past;
        }
    }

    fn snapshot_with(f: impl FnOnce(&mut RawTelemetryFrame)) -> SensorSnapshot {
        let mut raw = RawTelemetryFrame::default();
        f(&mut raw);
        raw.decode()
    }

    #[test]
    fn test_no_command_is_stale_zero() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.compute_actuation(), BaseActuation::default());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fresh_command_passes_through() {
        let mut runtime = Runtime::new();
        runtime.on_command(BaseCommand::new(0.2, 0.5));
        let actuation = runtime.compute_actuation();
        assert_eq!(actuation.linear, 0.2);
        assert_eq!(actuation.angular, 0.5);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_stale_command_stops() {
        let mut runtime = Runtime::new();
        runtime.on_command(BaseCommand::new(0.2, 0.0));
        stale(&mut runtime);
        assert_eq!(runtime.compute_actuation(), BaseActuation::default());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_bumper_blocks_forward_only() {
        let mut runtime = Runtime::new();
        runtime.on_snapshot(snapshot_with(|r| r.bumper = 0b010));

        runtime.on_command(BaseCommand::new(0.2, 0.3));
        let actuation = runtime.compute_actuation();
        assert_eq!(actuation.linear, 0.0);
        assert_eq!(actuation.angular, 0.3);
        assert_eq!(runtime.health(), RuntimeHealth::SafetyStop);

        runtime.on_command(BaseCommand::new(-0.2, 0.0));
        assert_eq!(runtime.compute_actuation().linear, -0.2);
    }

    #[test]
    fn test_cliff_stops_everything() {
        let mut runtime = Runtime::new();
        runtime.on_snapshot(snapshot_with(|r| r.cliff = 0b001));
        runtime.on_command(BaseCommand::new(-0.2, 1.0));
        assert_eq!(runtime.compute_actuation(), BaseActuation::default());
        assert_eq!(runtime.health(), RuntimeHealth::SafetyStop);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_forwards_commands_then_shuts_down() {
        let mock = MockTransport::new();
        mock.inject_read(&build_packet(&encode_core_sensors(
            &RawTelemetryFrame::default(),
        )));
        let params = ConnectionParams {
            disable_ack_timeout_ms: 5,
            ..ConnectionParams::new("mock")
        };
        let session = Session::with_transport(mock.clone(), params).unwrap();
        mock.clear_events();

        let (tx, rx) = mpsc::channel(8);
        let (telemetry_tx, telemetry_rx) = watch::channel(None);
        tx.send(BaseCommand::new(0.25, 0.0)).await.unwrap();
        drop(tx);

        run(session, rx, telemetry_tx).await.unwrap();

        let mut parser = FrameParser::new();
        let commands: Vec<Command> = parser
            .feed(&mock.written())
            .flat_map(|p| Command::decode(p.payload()).unwrap())
            .collect();

        assert_eq!(commands.first(), Some(&Command::velocity(0.25, 0.0)));
        assert_eq!(
            &commands[commands.len() - 2..],
            &[Command::stop(), Command::MotorPower(false)]
        );
        assert_eq!(mock.close_count(), 1);
        // Handshake frame is cached, so the loop published it
        assert!(telemetry_rx.borrow().is_some());
    }
}
