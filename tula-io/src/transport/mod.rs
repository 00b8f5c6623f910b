//! Transport layer for scale I/O abstraction
//!
//! A [`Transport`] is an exclusive byte source (the serial device owns the
//! port while open). A [`Connector`] knows how to (re)open one, which is what
//! lets the reading stream recover from an unplugged device.

use crate::error::Result;

pub mod mock;
mod serial;
mod simulated;

pub use mock::{MockConnector, MockTransport};
pub use serial::{SerialConnector, SerialTransport};
pub use simulated::{SimulatedConnector, SimulatedScale};

/// Transport trait for scale communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read.
    ///
    /// Blocks for at most the transport's read timeout; `Ok(0)` means the
    /// timeout elapsed without data. An `Err` means the device is gone.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Discard anything already buffered (half frames from before we attached)
    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens transports, initially and after a disconnect
pub trait Connector: Send + 'static {
    fn connect(&mut self) -> Result<Box<dyn Transport>>;

    /// Human-readable device name for logs
    fn describe(&self) -> String;
}

impl Connector for Box<dyn Connector> {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        (**self).connect()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
