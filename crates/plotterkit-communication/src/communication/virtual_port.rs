//! In-memory plotter simulation
//!
//! A [`VirtualDevice`] records every line it receives and answers according
//! to a [`VirtualBehavior`]. It opens like a real port through the
//! [`PortOpener`] seam, which makes it usable for dry runs and for
//! exercising the streaming protocol without hardware.

use super::{ConnectionParams, PortOpener, SerialPort};
use parking_lot::Mutex;
use plotterkit_core::DeviceError;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// How the simulated device answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualBehavior {
    /// Acknowledge every line with "ok"
    AlwaysAck,
    /// Never acknowledge anything
    NeverAck,
    /// Acknowledge this many lines, then detach on the next one
    UnplugAfter(usize),
    /// Fail the write of the line with this 0-based index
    FailWriteAt(usize),
}

#[derive(Debug)]
struct VirtualState {
    behavior: VirtualBehavior,
    received: Vec<String>,
    outbound: VecDeque<u8>,
    partial: String,
    attached: bool,
    open_count: usize,
    writes_attempted: usize,
}

/// Simulated plotter shared between the opener and the ports it opens
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualDevice {
    /// Create an attached device
    pub fn new(behavior: VirtualBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                behavior,
                received: Vec::new(),
                outbound: VecDeque::new(),
                partial: String::new(),
                attached: true,
                open_count: 0,
                writes_attempted: 0,
            })),
        }
    }

    /// Lines received so far, without terminators
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// Number of times a port was opened
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Whether the device is attached
    pub fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    /// Detach the device
    pub fn unplug(&self) {
        self.state.lock().attached = false;
    }

    /// Reattach the device
    pub fn plug_in(&self) {
        self.state.lock().attached = true;
    }

    /// Change how the device answers
    pub fn set_behavior(&self, behavior: VirtualBehavior) {
        self.state.lock().behavior = behavior;
    }

    /// Queue an unsolicited line, e.g. telemetry or a late ack
    pub fn emit(&self, line: &str) {
        let mut state = self.state.lock();
        state.outbound.extend(line.bytes());
        state.outbound.extend(b"\r\n");
    }
}

impl PortOpener for VirtualDevice {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialPort>, DeviceError> {
        let mut state = self.state.lock();
        if !state.attached {
            return Err(DeviceError::FailedToOpen {
                port: params.port.clone(),
                reason: "no such device".to_string(),
            });
        }
        state.open_count += 1;
        state.partial.clear();
        state.outbound.clear();
        Ok(Box::new(VirtualPort {
            name: params.port.clone(),
            state: self.state.clone(),
        }))
    }
}

struct VirtualPort {
    name: String,
    state: Arc<Mutex<VirtualState>>,
}

impl SerialPort for VirtualPort {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.attached {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device detached"));
        }

        if let VirtualBehavior::FailWriteAt(index) = state.behavior {
            if state.writes_attempted == index {
                state.writes_attempted += 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
        }

        state.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(end) = state.partial.find('\n') {
            let line: String = state.partial.drain(..=end).collect();
            let line = line.trim().to_string();
            state.writes_attempted += 1;
            state.received.push(line);

            let acked = state.received.len();
            match state.behavior {
                VirtualBehavior::AlwaysAck | VirtualBehavior::FailWriteAt(_) => {
                    state.outbound.extend(b"ok\r\n")
                }
                VirtualBehavior::NeverAck => {}
                VirtualBehavior::UnplugAfter(n) => {
                    if acked <= n {
                        state.outbound.extend(b"ok\r\n");
                    } else {
                        state.attached = false;
                    }
                }
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.outbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn check_attached(&mut self) -> io::Result<()> {
        if self.state.lock().attached {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} detached", self.name),
            ))
        }
    }
}
