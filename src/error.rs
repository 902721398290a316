// Error types for the driver core
//
// Device-level failures (ConnectError, IoError) are surfaced to the caller.
// FrameError is protocol noise: the codec counts and logs it, never returns it.

use crate::session::SessionState;

/// Failure to bring a session up
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Serial device not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied opening {path}")]
    PermissionDenied { path: String },

    #[error("Serial device {path} is already open")]
    AlreadyOpen { path: String },

    #[error("Serial device {path} unavailable: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("No telemetry from controller within {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("I/O error during handshake: {0}")]
    Io(#[from] IoError),
}

/// Transport read/write failure
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("Transport is closed")]
    Closed,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Write stalled after {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IoError {
    /// Classify a std I/O error, folding link-loss kinds into `Disconnected`
    pub fn from_io(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => IoError::Disconnected,
            _ => IoError::Io(e),
        }
    }
}

/// Recoverable framing problems seen by the streaming parser
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Resync: skipped {skipped} bytes looking for header")]
    Resync { skipped: usize },

    #[error("Malformed sub-payload 0x{id:02X}: {reason}")]
    MalformedSubPayload { id: u8, reason: String },
}

/// Failure of a session operation
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Transport error: {0}")]
    Io(#[from] IoError),

    #[error("No telemetry received yet")]
    NoDataYet,

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(SessionState),
}

pub type Result<T> = std::result::Result<T, DriverError>;
