//! Event type definitions for the event bus.
//!
//! Events are grouped by category. The stream events mirror what a program
//! stream reports to observers (status, progress, device log lines,
//! completion, error); job events wrap a stream event with the job it belongs
//! to and a completion percentage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Root event enum for all application events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Serial link lifecycle
    Connection(ConnectionEvent),
    /// Program stream events not tied to a queued job
    Stream(StreamEvent),
    /// Program stream events of a queued job
    Job(JobEvent),
    /// Queue membership and job lifecycle
    Queue(QueueEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Stream(_) => EventCategory::Stream,
            AppEvent::Job(_) => EventCategory::Job,
            AppEvent::Queue(_) => EventCategory::Queue,
        }
    }

    /// The queued job this event concerns, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            AppEvent::Job(e) => Some(e.job_id),
            AppEvent::Queue(QueueEvent::JobStarted { job_id })
            | AppEvent::Queue(QueueEvent::JobCompleted { job_id })
            | AppEvent::Queue(QueueEvent::JobFailed { job_id, .. }) => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Stream(e) => e.description(),
            AppEvent::Job(e) => format!("[job {}] {}", e.job_id, e.event.description()),
            AppEvent::Queue(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Serial link events.
    Connection,
    /// Unscoped stream events.
    Stream,
    /// Job-scoped stream events.
    Job,
    /// Queue events.
    Queue,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Stream => write!(f, "Stream"),
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Queue => write!(f, "Queue"),
        }
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Explicit close
    UserRequested,
    /// Program finished and the link is not persistent
    ProgramComplete,
    /// Health polling or a read failure detected the loss
    ConnectionLost,
    /// Error occurred
    Error(String),
}

/// Connection-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Port opened.
    Opened {
        /// Port name.
        port: String,
        /// Baud rate.
        baud_rate: u32,
    },
    /// Port closed.
    Closed {
        /// Port name.
        port: String,
        /// Why it closed.
        reason: DisconnectReason,
    },
    /// Opening failed.
    OpenFailed {
        /// Port name.
        port: String,
        /// Failure description.
        error: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Opened { port, baud_rate } => {
                format!("Opened {} at {} baud", port, baud_rate)
            }
            ConnectionEvent::Closed { port, reason } => format!("Closed {} ({:?})", port, reason),
            ConnectionEvent::OpenFailed { port, error } => {
                format!("Failed to open {}: {}", port, error)
            }
        }
    }
}

/// Events emitted while a program streams to the device.
///
/// `elapsed_ms` counts from the start of the stream (or from the link
/// opening for device lines received while idle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Human-readable status change
    Status {
        /// Status text.
        message: String,
        /// Milliseconds since start.
        elapsed_ms: u64,
    },
    /// Emitted immediately before a line is written
    Progress {
        /// 1-based index of the line about to be sent.
        current: usize,
        /// Number of transmittable lines.
        total: usize,
        /// The line about to be sent.
        line: String,
        /// Milliseconds since start.
        elapsed_ms: u64,
    },
    /// A line received from the device
    Log {
        /// The received line.
        message: String,
        /// Milliseconds since start.
        elapsed_ms: u64,
        /// Send index at the time the line arrived, if streaming.
        line_index: Option<usize>,
    },
    /// Every line was acknowledged
    Complete {
        /// Number of lines sent.
        total_lines: usize,
        /// Wall-clock duration of the stream in seconds.
        total_time_secs: f64,
        /// Milliseconds since start.
        elapsed_ms: u64,
    },
    /// The stream failed
    Error {
        /// Failure description.
        message: String,
        /// Milliseconds since start.
        elapsed_ms: u64,
    },
}

impl StreamEvent {
    /// Get a short description for logging
    pub fn description(&self) -> String {
        match self {
            StreamEvent::Status { message, .. } => message.clone(),
            StreamEvent::Progress {
                current,
                total,
                line,
                ..
            } => format!("[{}/{}] {}", current, total, line),
            StreamEvent::Log { message, .. } => format!("< {}", message),
            StreamEvent::Complete {
                total_lines,
                total_time_secs,
                ..
            } => format!("Sent {} lines in {:.1}s", total_lines, total_time_secs),
            StreamEvent::Error { message, .. } => format!("Error: {}", message),
        }
    }

    /// Milliseconds since the stream started
    pub fn elapsed_ms(&self) -> u64 {
        match self {
            StreamEvent::Status { elapsed_ms, .. }
            | StreamEvent::Progress { elapsed_ms, .. }
            | StreamEvent::Log { elapsed_ms, .. }
            | StreamEvent::Complete { elapsed_ms, .. }
            | StreamEvent::Error { elapsed_ms, .. } => *elapsed_ms,
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// A stream event annotated with its job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Job the stream belongs to
    pub job_id: Uuid,
    /// Percentage of lines sent, 0-100
    pub percent: f64,
    /// The underlying stream event
    pub event: StreamEvent,
}

/// Counts of jobs by status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSummary {
    /// All jobs in the queue
    pub total: usize,
    /// Waiting jobs
    pub pending: usize,
    /// Jobs on the device (0 or 1)
    pub processing: usize,
    /// Finished jobs still listed
    pub completed: usize,
    /// Failed jobs retained for inspection
    pub failed: usize,
}

/// Queue-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Membership, order or status changed
    Changed {
        /// Summary after the change
        summary: QueueSummary,
    },
    /// A job was handed to the device
    JobStarted {
        /// Job id
        job_id: Uuid,
    },
    /// A job finished and was removed
    JobCompleted {
        /// Job id
        job_id: Uuid,
    },
    /// A job failed and was retained
    JobFailed {
        /// Job id
        job_id: Uuid,
        /// Captured error
        error: String,
    },
}

impl QueueEvent {
    fn description(&self) -> String {
        match self {
            QueueEvent::Changed { summary } => format!(
                "Queue: {} total, {} pending, {} processing, {} failed",
                summary.total, summary.pending, summary.processing, summary.failed
            ),
            QueueEvent::JobStarted { job_id } => format!("Job {} started", job_id),
            QueueEvent::JobCompleted { job_id } => format!("Job {} completed", job_id),
            QueueEvent::JobFailed { job_id, error } => {
                format!("Job {} failed: {}", job_id, error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_of_events() {
        let id = Uuid::new_v4();
        let progress = AppEvent::Job(JobEvent {
            job_id: id,
            percent: 50.0,
            event: StreamEvent::Status {
                message: "Streaming".to_string(),
                elapsed_ms: 10,
            },
        });
        assert_eq!(progress.job_id(), Some(id));
        assert_eq!(
            AppEvent::Queue(QueueEvent::JobFailed {
                job_id: id,
                error: "Ack timeout".to_string(),
            })
            .job_id(),
            Some(id)
        );
        assert_eq!(
            AppEvent::Queue(QueueEvent::Changed {
                summary: QueueSummary::default(),
            })
            .job_id(),
            None
        );
    }

    #[test]
    fn test_job_event_json_shape() {
        let id = Uuid::new_v4();
        let event = AppEvent::Job(JobEvent {
            job_id: id,
            percent: 100.0,
            event: StreamEvent::Complete {
                total_lines: 2,
                total_time_secs: 1.5,
                elapsed_ms: 1500,
            },
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Job"]["job_id"], id.to_string());
        assert_eq!(json["Job"]["percent"], 100.0);
        assert_eq!(json["Job"]["event"]["Complete"]["total_lines"], 2);
    }
}
