//! JSON persistence of the job queue

use crate::job::{Job, JobStatus};
use plotterkit_core::QueueError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const STORE_VERSION: u32 = 1;

/// Error recorded on jobs that were processing when the process stopped
pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Serialize, Deserialize)]
struct StoredQueue {
    version: u32,
    jobs: Vec<Job>,
}

/// File-backed job list
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Store at `path`; nothing is read until [`JobStore::load`]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored jobs.
    ///
    /// A missing file is an empty queue. Jobs that were processing when the
    /// file was written never finished, so they come back failed.
    pub fn load(&self) -> Result<Vec<Job>, QueueError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| storage(&self.path, e))?;
        let stored: StoredQueue =
            serde_json::from_str(&content).map_err(|e| storage(&self.path, e))?;
        if stored.version > STORE_VERSION {
            tracing::warn!(
                "Job store {} has newer version {}",
                self.path.display(),
                stored.version
            );
        }

        let mut jobs = stored.jobs;
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Processing) {
            tracing::warn!(job_id = %job.id, "Job was interrupted while processing");
            job.mark_failed(INTERRUPTED, None);
        }
        tracing::debug!("Loaded {} jobs from {}", jobs.len(), self.path.display());
        Ok(jobs)
    }

    /// Replace the stored jobs
    pub fn save(&self, jobs: &[Job]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| storage(parent, e))?;
            }
        }

        let stored = StoredQueue {
            version: STORE_VERSION,
            jobs: jobs.to_vec(),
        };
        let content =
            serde_json::to_string_pretty(&stored).map_err(|e| storage(&self.path, e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| storage(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| storage(&self.path, e))?;
        Ok(())
    }
}

fn storage(path: &Path, error: impl std::fmt::Display) -> QueueError {
    QueueError::Storage {
        reason: format!("{}: {}", path.display(), error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;
    use plotterkit_designer::MotionProgram;
    use tempfile::TempDir;

    fn job(name: &str) -> Job {
        Job::new(
            JobKind::Drawing,
            name,
            MotionProgram::from_text("G1 X1 Y1\n", 5.0, 0.0),
        )
    }

    #[test]
    fn test_missing_file_is_empty_queue() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_keeps_order() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("nested").join("jobs.json"));
        let jobs = vec![job("a"), job("b")];
        store.save(&jobs).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, jobs);
    }

    #[test]
    fn test_processing_jobs_load_as_interrupted() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        let mut running = job("running");
        running.mark_processing();
        store.save(&[running, job("waiting")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded[0].status, JobStatus::Failed);
        assert_eq!(loaded[0].error.as_deref(), Some(INTERRUPTED));
        assert_eq!(loaded[1].status, JobStatus::Pending);
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JobStore::new(&path).load().unwrap_err();
        assert_eq!(err.code(), "queue.storage");
    }
}
