//! # PlotterKit Queue
//!
//! Ordered plotting jobs, single-job dispatch to the device link and JSON
//! persistence of the queue between runs.

pub mod job;
pub mod queue;
pub mod store;

pub use job::{Job, JobKind, JobStatus};
pub use queue::JobQueue;
pub use store::{JobStore, INTERRUPTED};
