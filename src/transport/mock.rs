// Recording mock transport for tests and offline tooling

use super::Transport;
use crate::error::IoError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// One observable interaction with the transport, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Write(Vec<u8>),
    Flush,
    Close,
}

/// Mock transport; clones share state so a test can keep a handle
/// while the session owns another
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    events: Vec<MockEvent>,
    write_chunk: Option<usize>,
    disconnected: bool,
    open: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                events: Vec::new(),
                write_chunk: None,
                disconnected: false,
                open: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        // A panicking test thread must not hide the recorded events
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inject bytes to be returned by subsequent reads
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
    }

    /// All bytes written so far, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Ordered log of writes, flushes and closes
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Accept at most `n` bytes per write call (0 stalls every write)
    pub fn set_write_chunk(&self, n: usize) {
        self.lock().write_chunk = Some(n);
    }

    /// Make every further read/write fail as if the cable was pulled
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    pub fn close_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|event| **event == MockEvent::Close)
            .count()
    }

    fn check(inner: &MockTransportInner) -> Result<(), IoError> {
        if !inner.open {
            Err(IoError::Closed)
        } else if inner.disconnected {
            Err(IoError::Disconnected)
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, IoError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        let n = inner.write_chunk.map_or(data.len(), |c| c.min(data.len()));
        if n > 0 {
            inner.events.push(MockEvent::Write(data[..n].to_vec()));
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), IoError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.events.push(MockEvent::Flush);
        Ok(())
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, IoError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        let n = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        let mut inner = self.lock();
        if inner.open {
            inner.open = false;
            inner.events.push(MockEvent::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
