//! Serial transport implementation

use super::{Connector, Transport};
use crate::error::Result;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::Read;
use std::time::Duration;

/// Serial transport for the scale's UART
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port (8N1, no flow control)
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0" or "COM4")
    /// * `baud_rate` - Baud rate (e.g., 9600)
    /// * `read_timeout` - Longest a single read blocks waiting for bytes
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Opens the configured serial device
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialConnector {
    pub fn new(path: &str, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
            read_timeout,
        }
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let transport = SerialTransport::open(&self.path, self.baud_rate, self.read_timeout)?;
        Ok(Box::new(transport))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}
