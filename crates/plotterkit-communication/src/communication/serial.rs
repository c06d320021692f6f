//! Hardware serial ports: discovery, opening with 8N1-style framing, and the
//! attachment check the link's health check relies on.

use super::{ConnectionParams, PortOpener, SerialParity, SerialPort};
use parking_lot::Mutex;
use plotterkit_core::DeviceError;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::Duration;

/// USB identity of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbDetails {
    /// Vendor id
    pub vid: u16,
    /// Product id
    pub pid: u16,
    /// Manufacturer string, if the device reports one
    pub manufacturer: Option<String>,
    /// Serial number, if the device reports one
    pub serial_number: Option<String>,
}

/// A port the plotter may be attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Port name ("/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Human-readable description
    pub description: String,
    /// Present for USB adapters
    pub usb: Option<UsbDetails>,
}

impl From<&serialport::SerialPortInfo> for SerialPortInfo {
    fn from(port: &serialport::SerialPortInfo) -> Self {
        let (description, usb) = match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                format!(
                    "USB {} {}",
                    usb.manufacturer.as_deref().unwrap_or("Device"),
                    usb.product.as_deref().unwrap_or("Serial Port")
                ),
                Some(UsbDetails {
                    vid: usb.vid,
                    pid: usb.pid,
                    manufacturer: usb.manufacturer.clone(),
                    serial_number: usb.serial_number.clone(),
                }),
            ),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth Serial".to_string(), None),
            serialport::SerialPortType::PciPort => ("PCI Serial".to_string(), None),
            _ => ("Serial Port".to_string(), None),
        };
        Self {
            port_name: port.port_name.clone(),
            description,
            usb,
        }
    }
}

/// Ports whose names look like a plotter controller, USB adapters first.
///
/// Matches `COM<n>` on Windows, `/dev/ttyUSB*` and `/dev/ttyACM*` on Linux,
/// `/dev/cu.usbserial-*` and `/dev/cu.usbmodem*` on macOS.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, DeviceError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        DeviceError::EnumerationFailed {
            reason: e.to_string(),
        }
    })?;

    let mut found: Vec<SerialPortInfo> = ports
        .iter()
        .filter(|port| is_plotter_port(&port.port_name))
        .map(SerialPortInfo::from)
        .collect();
    found.sort_by(|a, b| {
        b.usb
            .is_some()
            .cmp(&a.usb.is_some())
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
    tracing::debug!("Found {} candidate ports", found.len());
    Ok(found)
}

/// Whether a port name looks like a plotter controller
pub fn is_plotter_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit());
    }
    const PREFIXES: [&str; 4] = [
        "/dev/ttyUSB",
        "/dev/ttyACM",
        "/dev/cu.usbserial-",
        "/dev/cu.usbmodem",
    ];
    PREFIXES.iter().any(|prefix| port_name.starts_with(prefix))
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

/// Hardware serial port backed by the `serialport` crate
pub struct RealSerialPort {
    name: String,
    port: Mutex<Box<dyn serialport::SerialPort>>,
}

impl RealSerialPort {
    /// Open a serial port with the given parameters
    pub fn open(params: &ConnectionParams) -> Result<Self, DeviceError> {
        let failed = |reason: String| DeviceError::FailedToOpen {
            port: params.port.clone(),
            reason,
        };

        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => return Err(failed(format!("invalid data bits: {}", other))),
        };
        let stop_bits = match params.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => return Err(failed(format!("invalid stop bits: {}", other))),
        };

        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(10))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            })
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                failed(e.to_string())
            })?;

        Ok(Self {
            name: params.port.clone(),
            port: Mutex::new(port),
        })
    }
}

impl SerialPort for RealSerialPort {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let port = self.port.get_mut();
        let n = port.write(data)?;
        port.flush()?;
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.get_mut().read(buf)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        self.port.get_mut().flush()
    }

    fn check_attached(&mut self) -> io::Result<()> {
        let ports = serialport::available_ports().map_err(io::Error::other)?;
        if ports.iter().any(|p| p.port_name == self.name) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is no longer attached", self.name),
            ))
        }
    }
}

/// Opens hardware serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialPort>, DeviceError> {
        Ok(Box::new(RealSerialPort::open(params)?))
    }
}
