use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::{mpsc, watch};
use tokio::task::block_in_place;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kobuki_base::config::{ConnectionParams, DEFAULT_BAUDRATE, DEFAULT_DEVICE};
use kobuki_base::messages::BaseCommand;
use kobuki_base::{DriverError, SensorSnapshot, Session, runtime};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "kobuki-base", about = "Kobuki base driver: telemetry monitor and teleop")]
struct Cli {
    /// Serial device of the base
    #[arg(long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// JSON file with connection parameters (flags override device/baud)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print telemetry snapshots as JSON lines
    Monitor {
        /// Snapshots per second
        #[arg(long, default_value_t = 10)]
        hz: u64,
        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<u64>,
    },
    /// Keyboard teleop: W/S forward/back, A/D turn, space stop, Q or Ctrl-C quit
    Drive {
        /// Linear speed in m/s
        #[arg(long, default_value_t = 0.2)]
        speed: f32,
        /// Angular speed in rad/s
        #[arg(long, default_value_t = 1.0)]
        turn: f32,
    },
    /// Print controller versions and one snapshot
    Info,
}

impl Cli {
    fn params(&self) -> Result<ConnectionParams, BoxError> {
        let mut params = match &self.config {
            Some(path) => ConnectionParams::from_json_file(path)?,
            None => ConnectionParams::default(),
        };
        params.device = self.device.clone();
        params.baud_rate = self.baud;
        Ok(params)
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let params = cli.params()?;
    match cli.command {
        Cmd::Monitor { hz, count } => monitor(params, hz, count).await,
        Cmd::Drive { speed, turn } => drive(params, speed, turn).await,
        Cmd::Info => block_in_place(|| show_info(params)),
    }
}

async fn monitor(params: ConnectionParams, hz: u64, count: Option<u64>) -> Result<(), BoxError> {
    let mut session = block_in_place(|| Session::connect(params))?;
    let mut tick = tokio::time::interval(Duration::from_millis(1000 / hz.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0u64;
    let result = loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => break Ok(()),
        }

        match block_in_place(|| session.read_sensor_data()) {
            Ok(snapshot) => {
                println!("{}", serde_json::to_string(&snapshot)?);
                printed += 1;
            }
            Err(DriverError::NoDataYet) => continue,
            Err(e) => break Err(e.into()),
        }

        if count.is_some_and(|n| printed >= n) {
            break Ok(());
        }
    };

    block_in_place(|| session.shutdown());
    result
}

async fn drive(params: ConnectionParams, speed: f32, turn: f32) -> Result<(), BoxError> {
    let session = block_in_place(|| Session::connect(params))?;
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (telemetry_tx, mut telemetry_rx) = watch::channel::<Option<SensorSnapshot>>(None);

    info!("Controls: W/S=forward/back, A/D=turn, space=stop, Q/Ctrl-C=quit");

    enable_raw_mode()?;
    let keyboard = tokio::task::spawn_blocking(move || read_keys(cmd_tx, speed, turn));

    // Surface safety events while driving
    let watcher = tokio::spawn(async move {
        let mut was_blocked = false;
        while telemetry_rx.changed().await.is_ok() {
            let Some(snapshot) = *telemetry_rx.borrow_and_update() else {
                continue;
            };
            let blocked = snapshot.any_bumper() || snapshot.any_cliff() || snapshot.any_wheel_drop();
            if blocked && !was_blocked {
                warn!("Safety sensor triggered: {:?}", snapshot);
            }
            was_blocked = blocked;
        }
    });

    let result = runtime::run(session, cmd_rx, telemetry_tx).await;
    disable_raw_mode()?;

    keyboard.abort();
    watcher.abort();
    result.map_err(Into::into)
}

/// Translate key presses into base commands until quit or the runtime stops
fn read_keys(tx: mpsc::Sender<BaseCommand>, speed: f32, turn: f32) -> std::io::Result<()> {
    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if !event::poll(Duration::from_millis(20))? {
            if tx.is_closed() {
                return Ok(());
            }
            continue;
        }
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        let cmd = match key_command(code, modifiers, speed, turn) {
            KeyAction::Send(cmd) => cmd,
            KeyAction::Quit => return Ok(()),
            KeyAction::Ignore => continue,
        };
        if tx.blocking_send(cmd).is_err() {
            return Ok(());
        }
    }
}

#[derive(Debug, PartialEq)]
enum KeyAction {
    Send(BaseCommand),
    Quit,
    Ignore,
}

fn key_command(code: KeyCode, modifiers: KeyModifiers, speed: f32, turn: f32) -> KeyAction {
    // Raw mode turns Ctrl-C into a key press instead of SIGINT
    if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
        return KeyAction::Quit;
    }
    match code {
        KeyCode::Char('w') => KeyAction::Send(BaseCommand::new(speed, 0.0)),
        KeyCode::Char('s') => KeyAction::Send(BaseCommand::new(-speed, 0.0)),
        KeyCode::Char('a') => KeyAction::Send(BaseCommand::new(0.0, turn)),
        KeyCode::Char('d') => KeyAction::Send(BaseCommand::new(0.0, -turn)),
        KeyCode::Char(' ') => KeyAction::Send(BaseCommand::new(0.0, 0.0)),
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        _ => KeyAction::Ignore,
    }
}

fn show_info(params: ConnectionParams) -> Result<(), BoxError> {
    let mut session = Session::connect(params)?;
    let snapshot = session.read_sensor_data();
    let info = session.device_info();
    session.shutdown();

    println!("{}", serde_json::to_string_pretty(&info)?);
    match snapshot {
        Ok(s) => {
            println!("{}", serde_json::to_string_pretty(&s)?);
            println!(
                "battery: {} V ({:.0}%, {:?}), charger: {:?}",
                s.battery_text(),
                s.battery_percent(),
                s.battery_level(),
                s.charger_state
            );
        }
        Err(DriverError::NoDataYet) => println!("no telemetry received"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_c_quits_in_raw_mode() {
        assert_eq!(
            key_command(KeyCode::Char('c'), KeyModifiers::CONTROL, 0.2, 1.0),
            KeyAction::Quit
        );
        assert_eq!(
            key_command(KeyCode::Char('c'), KeyModifiers::NONE, 0.2, 1.0),
            KeyAction::Ignore
        );
    }

    #[test]
    fn test_drive_keys() {
        assert_eq!(
            key_command(KeyCode::Char('w'), KeyModifiers::NONE, 0.2, 1.0),
            KeyAction::Send(BaseCommand::new(0.2, 0.0))
        );
        assert_eq!(
            key_command(KeyCode::Char('d'), KeyModifiers::NONE, 0.2, 1.0),
            KeyAction::Send(BaseCommand::new(0.0, -1.0))
        );
        assert_eq!(
            key_command(KeyCode::Esc, KeyModifiers::NONE, 0.2, 1.0),
            KeyAction::Quit
        );
    }
}
