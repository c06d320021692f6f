//! Serial transport
//!
//! Port parameters, the byte-level port abstraction and the opener seam the
//! device link uses to obtain ports. Real hardware goes through
//! [`serial::SerialPortOpener`]; [`virtual_port::VirtualDevice`] simulates a
//! plotter in memory.

pub mod serial;
pub mod virtual_port;

use plotterkit_core::DeviceError;
use serde::{Deserialize, Serialize};
use std::io;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Serial connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
}

impl ConnectionParams {
    /// 8N1 parameters for a port
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
        }
    }
}

/// Low-level serial port interface
pub trait SerialPort: Send + Sync {
    /// Write data to the port
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read data from the port; `TimedOut`/`WouldBlock` mean no data yet
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the port name
    fn name(&self) -> String;

    /// Close the port
    fn close(&mut self) -> io::Result<()>;

    /// Check that the device is still attached
    fn check_attached(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write a whole line, newline-terminated
pub fn write_line(port: &mut dyn SerialPort, line: &str) -> io::Result<()> {
    let data = format!("{}\n", line);
    let mut bytes = data.as_bytes();
    while !bytes.is_empty() {
        match port.write(bytes)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "port accepted no bytes",
                ))
            }
            n => bytes = &bytes[n..],
        }
    }
    Ok(())
}

/// Produces open ports for a device link
pub trait PortOpener: Send + Sync {
    /// Open a port
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialPort>, DeviceError>;
}
