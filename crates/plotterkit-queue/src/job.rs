//! Job model
//!
//! A job wraps one motion program and its execution status. Status is only
//! changed by the queue.

use chrono::{DateTime, Utc};
use plotterkit_communication::RecoveryPoint;
use plotterkit_designer::MotionProgram;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What produced the job's program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Traced from a raster image
    Image,
    /// Laid out text
    Text,
    /// Freehand canvas strokes or an imported program
    Drawing,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Image => write!(f, "image"),
            JobKind::Text => write!(f, "text"),
            JobKind::Drawing => write!(f, "drawing"),
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(JobKind::Image),
            "text" => Ok(JobKind::Text),
            "drawing" => Ok(JobKind::Drawing),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be dispatched
    #[default]
    Pending,
    /// Streaming to the device
    Processing,
    /// Every line was acknowledged
    Completed,
    /// The stream failed; the job is kept for inspection
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id
    pub id: Uuid,
    /// Source kind
    pub kind: JobKind,
    /// Display name
    pub name: String,
    /// Program to stream
    pub program: MotionProgram,
    /// Current status
    pub status: JobStatus,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// 1-based index of the last line handed to the device
    pub current_line: usize,
    /// Number of transmittable lines
    pub total_lines: usize,
    /// Captured failure
    pub error: Option<String>,
    /// Device position and last acknowledged line when the job failed
    #[serde(default)]
    pub recovery: Option<RecoveryPoint>,
    /// When the job last failed
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job with a fresh id
    pub fn new(kind: JobKind, name: impl Into<String>, program: MotionProgram) -> Self {
        let total_lines = program.transmittable_count();
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            program,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            current_line: 0,
            total_lines,
            error: None,
            recovery: None,
            failed_at: None,
        }
    }

    /// Whether the job waits for dispatch
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// Whether the job is on the device
    pub fn is_processing(&self) -> bool {
        self.status == JobStatus::Processing
    }

    /// Share of lines handed to the device, 0-100
    pub fn percent(&self) -> f64 {
        match (self.status, self.total_lines) {
            (JobStatus::Completed, _) => 100.0,
            (_, 0) => 0.0,
            (_, total) => (self.current_line.min(total) as f64 / total as f64) * 100.0,
        }
    }

    pub(crate) fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.current_line = 0;
        self.error = None;
        self.recovery = None;
        self.failed_at = None;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.current_line = self.total_lines;
    }

    pub(crate) fn mark_failed(
        &mut self,
        error: impl Into<String>,
        recovery: Option<RecoveryPoint>,
    ) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.recovery = recovery;
        self.failed_at = Some(Utc::now());
    }

    pub(crate) fn mark_pending(&mut self) {
        self.status = JobStatus::Pending;
        self.current_line = 0;
        self.error = None;
        self.recovery = None;
        self.failed_at = None;
    }
}
