// Byte-level transport to the base controller
//
// Every implementation must keep reads and writes bounded in time so a
// disconnected device fails fast instead of hanging the caller.

use crate::error::IoError;

pub mod mock;
mod serial;

pub use mock::{MockEvent, MockTransport};
pub use serial::SerialTransport;

/// Maximum consecutive zero-length writes tolerated by `write_all`
const MAX_STALLED_WRITES: usize = 8;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Write bytes, returns how many were accepted (may be fewer than requested)
    fn write(&mut self, data: &[u8]) -> Result<usize, IoError>;

    /// Block (bounded) until written bytes have left the host
    fn flush(&mut self) -> Result<(), IoError>;

    /// Read whatever is available into `buffer`; returns 0 on timeout
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, IoError>;

    /// Release the OS handle. Safe to call more than once.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write a whole packet, looping over partial writes
    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        let mut written = 0;
        let mut stalled = 0;
        while written < data.len() {
            let n = self.write(&data[written..])?;
            if n == 0 {
                stalled += 1;
                if stalled >= MAX_STALLED_WRITES {
                    return Err(IoError::ShortWrite {
                        written,
                        expected: data.len(),
                    });
                }
            } else {
                stalled = 0;
                written += n;
            }
        }
        Ok(())
    }
}
