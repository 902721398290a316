// Serial transport backed by the serialport crate

use super::Transport;
use crate::config::ConnectionParams;
use crate::error::{ConnectError, IoError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use tracing::{debug, info};

/// Serial transport for the controller's UART/USB link
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    path: String,
}

impl SerialTransport {
    /// Open the serial device described by `params`
    pub fn open(params: &ConnectionParams) -> Result<Self, ConnectError> {
        let port = serialport::new(&params.device, params.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(params.read_timeout())
            .open()
            .map_err(|e| map_open_error(&params.device, e))?;

        info!(
            "Opened serial port {} at {} baud",
            params.device, params.baud_rate
        );

        Ok(Self {
            port: Some(port),
            path: params.device.clone(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, IoError> {
        self.port.as_mut().ok_or(IoError::Closed)
    }
}

/// Translate serialport open failures into the connect taxonomy
fn map_open_error(path: &str, e: serialport::Error) -> ConnectError {
    use serialport::ErrorKind;
    use std::io::ErrorKind as Io;

    let path = path.to_string();
    match e.kind() {
        ErrorKind::NoDevice | ErrorKind::Io(Io::NotFound) => ConnectError::NotFound { path },
        ErrorKind::Io(Io::PermissionDenied) => ConnectError::PermissionDenied { path },
        ErrorKind::Io(Io::AddrInUse) | ErrorKind::Io(Io::ResourceBusy) => {
            ConnectError::AlreadyOpen { path }
        }
        // TIOCEXCL contention surfaces as an untyped EBUSY
        _ if e.description.to_lowercase().contains("busy") => ConnectError::AlreadyOpen { path },
        _ => ConnectError::Unavailable {
            path,
            reason: e.description,
        },
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, IoError> {
        match self.port()?.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(IoError::from_io(e)),
        }
    }

    fn flush(&mut self) -> Result<(), IoError> {
        self.port()?.flush().map_err(IoError::from_io)
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, IoError> {
        match self.port()?.read(buffer) {
            // A tty that returns EOF has gone away (USB unplugged)
            Ok(0) => Err(IoError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(IoError::from_io(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
