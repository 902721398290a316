// Control and telemetry core for a Kobuki-style differential-drive base
//
// Provides:
// - Serial transport with bounded timeouts (and a recording mock)
// - Kobuki packet codec (command framing, streaming telemetry parser)
// - Typed sensor snapshot decoding
// - Device session with a safe init -> operate -> disable lifecycle

pub mod config;
pub mod error;
pub mod messages;
pub mod poller;
pub mod protocol;
pub mod runtime;
pub mod sensors;
pub mod session;
pub mod transport;

pub use config::{ConnectionParams, HandshakePolicy};
pub use error::{ConnectError, DriverError, FrameError, IoError};
pub use sensors::{ChargerState, RawTelemetryFrame, SensorSnapshot};
pub use session::{Session, SessionState, connect};
