//! Auxiliary controller status
//!
//! Jobs are only dispatched while the auxiliary controller (a second
//! board driving e.g. lighting or a pen carousel) reports connected.

use std::sync::atomic::{AtomicBool, Ordering};

/// Connection status of an auxiliary controller
pub trait AuxiliaryController: Send + Sync {
    /// Whether the controller is connected
    fn is_connected(&self) -> bool;

    /// Display name
    fn name(&self) -> String;
}

/// Used when no auxiliary controller is configured; always satisfied
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuxiliary;

impl AuxiliaryController for NoAuxiliary {
    fn is_connected(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        "none".to_string()
    }
}

/// Connection flag set by an external supervisor
#[derive(Debug, Default)]
pub struct AuxiliaryFlag {
    name: String,
    connected: AtomicBool,
}

impl AuxiliaryFlag {
    /// Create a flag in the given state
    pub fn new(name: impl Into<String>, connected: bool) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(connected),
        }
    }

    /// Update the state
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl AuxiliaryController for AuxiliaryFlag {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
