//! Operator control of a running program stream
//!
//! Pause is only honoured between lines: the line being executed always
//! finishes, so the pen never stops mid-stroke. Cancel also interrupts a
//! pending acknowledgment wait.

use std::sync::Arc;
use tokio::sync::watch;

/// Requested state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Keep sending
    Running,
    /// Stop before the next line
    Paused,
    /// Abort and close the link
    Cancelled,
}

/// Shared handle for pausing, resuming and cancelling a stream
#[derive(Debug, Clone)]
pub struct SendControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl SendControl {
    /// A running control
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    /// Pause before the next line
    pub fn pause(&self) {
        self.transition(ControlState::Paused);
    }

    /// Resume a paused stream
    pub fn resume(&self) {
        self.transition(ControlState::Running);
    }

    /// Abort the stream; cannot be undone
    pub fn cancel(&self) {
        self.tx.send_replace(ControlState::Cancelled);
    }

    /// Whether the stream was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state() == ControlState::Cancelled
    }

    /// Whether the stream is paused
    pub fn is_paused(&self) -> bool {
        self.state() == ControlState::Paused
    }

    /// Whether both handles control the same stream
    pub fn same_as(&self, other: &SendControl) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    fn transition(&self, next: ControlState) {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Cancelled || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Wait while paused. Returns `false` when cancelled.
    pub async fn wait_runnable(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let runnable = match rx.wait_for(|s| *s != ControlState::Paused).await {
            Ok(state) => *state == ControlState::Running,
            Err(_) => false,
        };
        runnable
    }

    /// Resolve once cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| *s == ControlState::Cancelled).await;
    }
}

impl Default for SendControl {
    fn default() -> Self {
        Self::new()
    }
}
