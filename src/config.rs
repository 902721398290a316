// Timeouts, rates, serial defaults and connection parameters
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Serial port the Kobuki udev rule creates
pub const DEFAULT_DEVICE: &str = "/dev/kobuki";
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Per-call serial timeout; keeps every read/write bounded
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 20;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_DISABLE_ACK_TIMEOUT_MS: u64 = 200;

/// How the session decides the controller is alive during connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePolicy {
    /// Wait for one valid telemetry frame within the handshake timeout
    #[default]
    AwaitTelemetry,
    /// Wait for the handshake timeout and proceed regardless
    GracePeriod,
}

/// Parameters consumed once when a session connects
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub device: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub handshake: HandshakePolicy,
    pub handshake_timeout_ms: u64,
    pub disable_ack_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            handshake: HandshakePolicy::default(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            disable_ack_timeout_ms: DEFAULT_DISABLE_ACK_TIMEOUT_MS,
        }
    }
}

impl ConnectionParams {
    /// Defaults with a custom device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Load parameters from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn disable_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.disable_ack_timeout_ms)
    }
}
