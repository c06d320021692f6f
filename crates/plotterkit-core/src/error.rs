//! Error handling for PlotterKit
//!
//! Provides the error taxonomy shared by every layer of the drawing pipeline:
//! - Input errors (nothing drawable, invalid source or parameters)
//! - Device errors (serial link, streaming protocol)
//! - Queue errors (job lifecycle, dispatch preconditions)
//!
//! All error types use `thiserror`. Every variant maps to a stable
//! machine-readable code via `code()` so callers can report rejections
//! without parsing display text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Input error type
///
/// Raised before anything reaches the device. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// Simplification or layering left nothing to draw
    #[error("Nothing to draw: no drawable paths")]
    NoDrawablePaths,

    /// Source data could not be interpreted
    #[error("Invalid source: {reason}")]
    InvalidSource {
        /// Why the source was rejected.
        reason: String,
    },

    /// A generation parameter is out of range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl InputError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoDrawablePaths => "input.no_drawable_paths",
            Self::InvalidSource { .. } => "input.invalid_source",
            Self::InvalidParameter { .. } => "input.invalid_parameter",
        }
    }
}

/// Device error type
///
/// Represents failures of the serial link and of the ack-paced streaming
/// protocol running on top of it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// No open connection
    #[error("Device not connected")]
    NotConnected,

    /// The port could not be opened
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// Port name.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// Writing a line to the port failed
    #[error("Write failed at line {line_index}: {reason}")]
    WriteFailed {
        /// Index of the line being written.
        line_index: usize,
        /// Underlying failure.
        reason: String,
    },

    /// The link dropped while a program was streaming
    #[error("Device disconnected (last acknowledged line: {}): {reason}", fmt_line(.last_successful_line))]
    Disconnected {
        /// Last acknowledged line index, if any line was acknowledged.
        last_successful_line: Option<usize>,
        /// What detected the disconnect.
        reason: String,
    },

    /// The device stopped acknowledging
    #[error("No acknowledgment for line {line_index} within {timeout_ms}ms")]
    AckTimeout {
        /// Index of the unacknowledged line.
        line_index: usize,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Another operation holds the wire
    #[error("Device busy: another operation holds the connection")]
    Busy,

    /// The operator cancelled the stream
    #[error("Stream cancelled before line {line_index}")]
    Cancelled {
        /// Index of the first line that was not sent.
        line_index: usize,
    },

    /// Port enumeration failed
    #[error("Failed to enumerate ports: {reason}")]
    EnumerationFailed {
        /// Underlying failure.
        reason: String,
    },
}

fn fmt_line(line: &Option<usize>) -> String {
    line.map_or_else(|| "none".to_string(), |l| l.to_string())
}

impl DeviceError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "device.not_connected",
            Self::FailedToOpen { .. } => "device.failed_to_open",
            Self::WriteFailed { .. } => "device.write_failed",
            Self::Disconnected { .. } => "device.disconnected",
            Self::AckTimeout { .. } => "device.ack_timeout",
            Self::Busy => "device.busy",
            Self::Cancelled { .. } => "device.cancelled",
            Self::EnumerationFailed { .. } => "device.enumeration_failed",
        }
    }

    /// Whether this failure aborts the job it interrupted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::WriteFailed { .. } | Self::Disconnected { .. } | Self::AckTimeout { .. }
        )
    }
}

/// A dispatch precondition that was not met
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// The plotter link is not open
    DeviceNotConnected,
    /// The auxiliary controller is not connected
    AuxiliaryNotConnected,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotConnected => write!(f, "device not connected"),
            Self::AuxiliaryNotConnected => write!(f, "auxiliary controller not connected"),
        }
    }
}

/// Queue error type
///
/// Rejections of queue operations. A rejected operation never mutates the
/// queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// One or more dispatch preconditions failed; all of them are listed
    #[error("Cannot process job: {}", join_preconditions(.unmet))]
    PreconditionsUnmet {
        /// Every unmet precondition.
        unmet: Vec<Precondition>,
    },

    /// A job is already being processed
    #[error("A job is already processing")]
    AlreadyProcessing,

    /// No job with this id
    #[error("Job not found: {id}")]
    JobNotFound {
        /// Requested job id.
        id: String,
    },

    /// The job is currently processing
    #[error("Job {id} is processing")]
    JobProcessing {
        /// Job id.
        id: String,
    },

    /// Reorder touched an item that is not pending
    #[error("Item at index {index} is not pending")]
    NotPending {
        /// Offending index.
        index: usize,
    },

    /// Index outside the queue
    #[error("Index {index} out of range (queue length {len})")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Queue length.
        len: usize,
    },

    /// Operation not allowed while a job is processing
    #[error("Queue busy: a job is processing")]
    QueueBusy,

    /// Nothing to dispatch
    #[error("No pending jobs")]
    NoPendingJobs,

    /// Job store could not be read or written
    #[error("Job store error: {reason}")]
    Storage {
        /// Underlying failure.
        reason: String,
    },
}

fn join_preconditions(unmet: &[Precondition]) -> String {
    unmet
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl QueueError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::PreconditionsUnmet { .. } => "queue.preconditions_unmet",
            Self::AlreadyProcessing => "queue.already_processing",
            Self::JobNotFound { .. } => "queue.job_not_found",
            Self::JobProcessing { .. } => "queue.job_processing",
            Self::NotPending { .. } => "queue.not_pending",
            Self::IndexOutOfRange { .. } => "queue.index_out_of_range",
            Self::QueueBusy => "queue.busy",
            Self::NoPendingJobs => "queue.no_pending_jobs",
            Self::Storage { .. } => "queue.storage",
        }
    }
}

/// Main error type for PlotterKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Input error
    #[error(transparent)]
    Input(#[from] InputError),

    /// Device error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Input(e) => e.code(),
            Error::Device(e) => e.code(),
            Error::Queue(e) => e.code(),
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// Check if this is an ack timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Device(DeviceError::AckTimeout { .. }))
    }

    /// Check if this is a device error
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Device(_))
    }

    /// Check if this is an input error
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::Input(_))
    }

    /// Check if this is a queue error
    pub fn is_queue_error(&self) -> bool {
        matches!(self, Error::Queue(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_lists_everything() {
        let err = QueueError::PreconditionsUnmet {
            unmet: vec![
                Precondition::DeviceNotConnected,
                Precondition::AuxiliaryNotConnected,
            ],
        };
        assert_eq!(
            err.to_string(),
            "Cannot process job: device not connected, auxiliary controller not connected"
        );
        assert_eq!(err.code(), "queue.preconditions_unmet");
    }

    #[test]
    fn test_disconnected_display() {
        let err = DeviceError::Disconnected {
            last_successful_line: Some(41),
            reason: "port vanished".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Device disconnected (last acknowledged line: 41): port vanished"
        );

        let err = DeviceError::Disconnected {
            last_successful_line: None,
            reason: "read failed".to_string(),
        };
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_codes_are_distinct_for_fatal_device_errors() {
        let write = DeviceError::WriteFailed {
            line_index: 3,
            reason: "broken pipe".to_string(),
        };
        let timeout = DeviceError::AckTimeout {
            line_index: 3,
            timeout_ms: 5000,
        };
        assert_ne!(write.code(), timeout.code());
        assert!(write.is_fatal());
        assert!(timeout.is_fatal());
        assert!(!DeviceError::Busy.is_fatal());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = InputError::NoDrawablePaths.into();
        assert!(err.is_input_error());
        assert_eq!(err.code(), "input.no_drawable_paths");

        let err: Error = DeviceError::AckTimeout {
            line_index: 0,
            timeout_ms: 10,
        }
        .into();
        assert!(err.is_timeout());
        assert!(err.is_device_error());
    }
}
