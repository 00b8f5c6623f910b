//! Mock transport for testing
//!
//! Clones share state, so a test keeps one handle to feed bytes or pull the
//! plug while the reading stream owns the other.

use super::{Connector, Transport};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// How long an empty mock read blocks, standing in for the serial read timeout
const EMPTY_READ_DELAY: Duration = Duration::from_millis(5);

/// Mock transport for unit testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    disconnected: bool,
    cleared: u32,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                disconnected: false,
                cleared: 0,
            })),
        }
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Simulate the device being unplugged: every later read fails
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.disconnected = true;
        inner.read_buffer.clear();
    }

    /// Bytes not yet consumed by the reader
    pub fn unread(&self) -> usize {
        self.inner.lock().read_buffer.len()
    }

    /// Number of `clear_input` calls seen
    pub fn clear_count(&self) -> u32 {
        self.inner.lock().cleared
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let available = {
            let mut inner = self.inner.lock();
            if inner.disconnected {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock device unplugged",
                )));
            }
            let available = inner.read_buffer.len().min(buffer.len());
            for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
                *slot = byte;
            }
            available
        };

        if available == 0 {
            std::thread::sleep(EMPTY_READ_DELAY);
        }
        Ok(available)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inner.lock().cleared += 1;
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out queued mock transports, one per connect
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Default)]
struct MockConnectorInner {
    transports: VecDeque<MockTransport>,
    connects: u32,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose first connect yields `transport`
    pub fn with(transport: &MockTransport) -> Self {
        let connector = Self::new();
        connector.queue(transport);
        connector
    }

    /// Make `transport` available to a later connect
    pub fn queue(&self, transport: &MockTransport) {
        self.inner.lock().transports.push_back(transport.clone());
    }

    /// Successful connects so far
    pub fn connects(&self) -> u32 {
        self.inner.lock().connects
    }
}

impl Connector for MockConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let mut inner = self.inner.lock();
        match inner.transports.pop_front() {
            Some(transport) => {
                inner.connects += 1;
                Ok(Box::new(transport))
            }
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock device not present",
            ))),
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
