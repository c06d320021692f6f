//! # PlotterKit
//!
//! Drawing job execution engine for pen plotters:
//! - Simplifies traced outlines and freehand strokes
//! - Splits traced images into colour layers
//! - Generates motion programs with distance and time statistics
//! - Streams programs to the plotter one acknowledged line at a time
//! - Queues jobs and dispatches them one at a time
//!
//! ## Architecture
//!
//! PlotterKit is organized as a workspace with multiple crates:
//!
//! 1. **plotterkit-core** - Geometry types, errors, events and the notification bus
//! 2. **plotterkit-designer** - Simplifier, colour classifier, program generator
//! 3. **plotterkit-communication** - Serial transport and the device link
//! 4. **plotterkit-queue** - Job queue and job persistence
//! 5. **plotterkit-settings** - Configuration
//! 6. **plotterkit** - Wiring and the command-line binary

use anyhow::Context;
use plotterkit_core::{Bounds, Point};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use plotterkit_communication as communication;
pub use plotterkit_core as core;
pub use plotterkit_designer as designer;
pub use plotterkit_queue as queue;
pub use plotterkit_settings as settings;

use plotterkit_communication::{
    AuxiliaryController, ConnectionParams, DeviceLink, LinkConfig, NoAuxiliary, PortOpener,
    RecoveryPlan, RecoveryPoint, SerialPortOpener, StreamSummary, VirtualBehavior,
    VirtualDevice,
};
use plotterkit_core::EventBus;
use plotterkit_designer::{
    ClassifierThresholds, GeneratorConfig, PipelineConfig, SimplifyOptions,
};
use plotterkit_queue::{Job, JobQueue, JobStore};
use plotterkit_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// Sets up structured logging with:
/// - Console output, human-readable or JSON
/// - RUST_LOG environment variable support (INFO by default)
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_line_number(true);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()?;
    }

    Ok(())
}

/// Link settings for the plotter
pub fn link_config(config: &Config) -> LinkConfig {
    let c = &config.connection;
    LinkConfig {
        params: ConnectionParams::new(&c.port, c.baud_rate),
        ack_timeout: Duration::from_millis(c.ack_timeout_ms),
        settle_delay: Duration::from_millis(c.settle_delay_ms),
        grace_delay: Duration::from_millis(c.grace_delay_ms),
        health_interval: Duration::from_millis(c.health_interval_ms),
        persistent: c.persistent,
    }
}

/// Link settings for the auxiliary controller, if one is configured
pub fn auxiliary_link_config(config: &Config) -> Option<LinkConfig> {
    config.auxiliary.port.as_ref().map(|port| LinkConfig {
        params: ConnectionParams::new(port, config.auxiliary.baud_rate),
        persistent: true,
        ..link_config(config)
    })
}

/// Drawing pipeline settings
pub fn pipeline_config(config: &Config) -> PipelineConfig {
    let plotter = &config.plotter;
    PipelineConfig {
        simplify: SimplifyOptions {
            tolerance: config.simplify.tolerance,
            min_path_length: config.simplify.min_path_length,
            remove_noise: config.simplify.remove_noise,
        },
        generator: GeneratorConfig {
            feed_rate: plotter.feed_rate,
            pen_up_z: plotter.pen_up_z,
            pen_down_z: plotter.pen_down_z,
            bounds: Bounds::from_size(plotter.width_mm, plotter.height_mm),
        },
        margin_mm: plotter.margin_mm,
    }
}

/// Colour classification thresholds
pub fn classifier_thresholds(config: &Config) -> ClassifierThresholds {
    ClassifierThresholds {
        background_min: config.classifier.background_min,
        channel_min: config.classifier.channel_min,
        dominance_margin: config.classifier.dominance_margin,
    }
}

/// Safe-return program settings
pub fn recovery_plan(config: &Config) -> RecoveryPlan {
    RecoveryPlan {
        pen_up_z: config.plotter.pen_up_z,
        feed_rate: config.plotter.recovery_feed_rate,
    }
}

/// Traced outlines or canvas strokes in source coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingSource {
    /// Source width (pixels or canvas units)
    pub width: f64,
    /// Source height
    pub height: f64,
    /// Raw point sequences
    pub paths: Vec<Vec<Point>>,
}

impl DrawingSource {
    /// Read a drawing source from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let source: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid drawing source {}", path.display()))?;
        anyhow::ensure!(
            source.width > 0.0 && source.height > 0.0,
            "Drawing source {} has no size",
            path.display()
        );
        Ok(source)
    }
}

/// Runtime objects built from a configuration
pub struct Session {
    /// Notification bus
    pub bus: Arc<EventBus>,
    /// Plotter link
    pub link: Arc<DeviceLink>,
    /// Auxiliary controller link, when configured
    pub auxiliary: Option<Arc<DeviceLink>>,
    /// Job queue
    pub queue: JobQueue,
}

impl Session {
    /// Build the runtime.
    ///
    /// With `simulate`, every port is an in-memory plotter that acknowledges
    /// each line, which allows dry runs without hardware.
    pub fn new(config: &Config, simulate: bool) -> anyhow::Result<Self> {
        let bus = Arc::new(EventBus::new());
        let opener = |simulate: bool| -> Arc<dyn PortOpener> {
            if simulate {
                Arc::new(VirtualDevice::new(VirtualBehavior::AlwaysAck))
            } else {
                Arc::new(SerialPortOpener)
            }
        };

        let link = Arc::new(
            DeviceLink::builder(link_config(config), opener(simulate))
                .event_bus(bus.clone())
                .build(),
        );
        let auxiliary = auxiliary_link_config(config).map(|aux| {
            Arc::new(
                DeviceLink::builder(aux, opener(simulate))
                    .event_bus(bus.clone())
                    .build(),
            )
        });
        let controller: Arc<dyn AuxiliaryController> = match &auxiliary {
            Some(aux) => aux.clone() as Arc<dyn AuxiliaryController>,
            None => Arc::new(NoAuxiliary),
        };

        let store_path = config
            .queue
            .resolved_store_path()
            .context("Failed to locate the job store")?;
        let queue = JobQueue::with_store(
            link.clone(),
            controller,
            bus.clone(),
            JobStore::new(store_path),
        )
        .context("Failed to load the job queue")?;

        Ok(Self {
            bus,
            link,
            auxiliary,
            queue,
        })
    }

    /// Open the plotter link and the auxiliary link
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.link
            .open()
            .await
            .with_context(|| format!("Failed to open {}", self.link.port_name()))?;
        if let Some(aux) = &self.auxiliary {
            aux.open()
                .await
                .with_context(|| format!("Failed to open auxiliary {}", aux.port_name()))?;
        }
        Ok(())
    }

    /// Dispatch the first pending job, or every pending job with `all`.
    ///
    /// Once `interrupt` resolves the running job is cancelled (it fails and
    /// stays queued) and no further job starts. Returns the dispatched jobs
    /// in their final state.
    pub async fn run_queue<F>(&self, all: bool, interrupt: F) -> anyhow::Result<Vec<Job>>
    where
        F: Future,
    {
        tokio::pin!(interrupt);
        let mut finished = Vec::new();

        while self.queue.summary().pending > 0 {
            tokio::select! {
                biased;
                connected = self.connect() => connected?,
                _ = &mut interrupt => {
                    tracing::info!("Interrupted before dispatch");
                    return Ok(finished);
                }
            }

            let dispatch = self.queue.process_next();
            tokio::pin!(dispatch);
            let mut interrupted = false;
            let job = tokio::select! {
                biased;
                job = &mut dispatch => job?,
                _ = &mut interrupt => {
                    tracing::info!("Interrupted, cancelling the running job");
                    interrupted = true;
                    self.queue.cancel_current();
                    dispatch.await?
                }
            };
            finished.push(job);
            if interrupted || !all {
                break;
            }
        }
        Ok(finished)
    }

    /// Where recovery starts: the point saved with the most recently failed
    /// job, or the link's own last position when no job failed.
    pub fn recovery_point(&self) -> RecoveryPoint {
        match self.queue.last_failure_point() {
            Some((_, point)) => point,
            None => self.link.last_position(),
        }
    }

    /// Raise the pen and return to the origin from [`Session::recovery_point`]
    pub async fn recover(&self, plan: &RecoveryPlan) -> anyhow::Result<StreamSummary> {
        if let Some((job_id, point)) = self.queue.last_failure_point() {
            tracing::info!(job_id = %job_id, "Recovering from the point saved with the failed job");
            self.link
                .restore_position(point)
                .context("Cannot recover while a program is streaming")?;
        }
        self.link
            .recover(plan)
            .await
            .context("Recovery program failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_config_from_settings() {
        let mut config = Config::default();
        config.connection.port = "COM7".to_string();
        config.connection.ack_timeout_ms = 1200;
        let link = link_config(&config);
        assert_eq!(link.params.port, "COM7");
        assert_eq!(link.ack_timeout, Duration::from_millis(1200));
        assert!(auxiliary_link_config(&config).is_none());
    }

    #[test]
    fn test_auxiliary_link_is_persistent() {
        let mut config = Config::default();
        config.auxiliary.port = Some("/dev/ttyUSB1".to_string());
        let aux = auxiliary_link_config(&config).unwrap();
        assert_eq!(aux.params.port, "/dev/ttyUSB1");
        assert_eq!(aux.params.baud_rate, 9600);
        assert!(aux.persistent);
    }

    #[test]
    fn test_pipeline_config_uses_work_area() {
        let mut config = Config::default();
        config.plotter.width_mm = 300.0;
        config.plotter.height_mm = 150.0;
        let pipeline = pipeline_config(&config);
        assert_eq!(pipeline.generator.bounds.width(), 300.0);
        assert_eq!(pipeline.generator.bounds.height(), 150.0);
        assert_eq!(pipeline.simplify.tolerance, 0.5);
    }

    #[test]
    fn test_drawing_source_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("drawing.json");
        std::fs::write(
            &path,
            r#"{"width": 100, "height": 50, "paths": [[{"x": 0, "y": 0}, {"x": 10, "y": 5}]]}"#,
        )
        .unwrap();

        let source = DrawingSource::load(&path).unwrap();
        assert_eq!(source.width, 100.0);
        assert_eq!(source.paths[0][1], Point::new(10.0, 5.0));

        std::fs::write(&path, r#"{"width": 0, "height": 50, "paths": []}"#).unwrap();
        assert!(DrawingSource::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_simulated_session_runs_a_job() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.connection.settle_delay_ms = 0;
        config.connection.grace_delay_ms = 0;
        config.queue.store_path = Some(dir.path().join("jobs.json"));

        let session = Session::new(&config, true).unwrap();
        let program = plotterkit_designer::MotionProgram::from_text(
            "G1 X0 Y0 F1500\nG1 X10 Y0\n",
            config.plotter.pen_up_z,
            config.plotter.pen_down_z,
        );
        session
            .queue
            .enqueue(plotterkit_queue::JobKind::Drawing, "square", program);

        session.connect().await.unwrap();
        let job = session.queue.process_next().await.unwrap();
        assert_eq!(job.status, plotterkit_queue::JobStatus::Completed);
        assert!(session.queue.is_empty());
    }

    fn long_program(config: &Config, lines: usize) -> plotterkit_designer::MotionProgram {
        let text: String = (0..lines).map(|i| format!("G1 X{} Y{}\n", i % 50, i % 40)).collect();
        plotterkit_designer::MotionProgram::from_text(
            &text,
            config.plotter.pen_up_z,
            config.plotter.pen_down_z,
        )
    }

    fn simulated_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.connection.settle_delay_ms = 0;
        config.connection.grace_delay_ms = 0;
        config.queue.store_path = Some(dir.path().join("jobs.json"));
        config
    }

    #[tokio::test]
    async fn test_interrupt_cancels_running_job_and_stops_the_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = simulated_config(&dir);
        let session = Session::new(&config, true).unwrap();
        let first = session.queue.enqueue(
            plotterkit_queue::JobKind::Drawing,
            "long",
            long_program(&config, 500),
        );
        let second = session.queue.enqueue(
            plotterkit_queue::JobKind::Drawing,
            "next",
            long_program(&config, 2),
        );

        let interrupt = tokio::time::sleep(Duration::from_millis(100));
        let finished = tokio::time::timeout(Duration::from_secs(2), session.run_queue(true, interrupt))
            .await
            .expect("interrupted queue should stop promptly")
            .unwrap();

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, first.id);
        assert_eq!(finished[0].status, plotterkit_queue::JobStatus::Failed);
        assert!(finished[0].current_line < finished[0].total_lines);
        assert_eq!(
            session.queue.get(second.id).map(|j| j.status),
            Some(plotterkit_queue::JobStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_run_queue_dispatches_every_job() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = simulated_config(&dir);
        let session = Session::new(&config, true).unwrap();
        for name in ["a", "b"] {
            session
                .queue
                .enqueue(plotterkit_queue::JobKind::Text, name, long_program(&config, 2));
        }

        let finished = session
            .run_queue(true, std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(finished.len(), 2);
        assert!(session.queue.is_empty());
    }

    #[tokio::test]
    async fn test_recover_starts_from_failed_job_point() {
        let dir = tempfile::TempDir::new().unwrap();
        let store_path = dir.path().join("jobs.json");
        let mut config = Config::default();
        config.connection.settle_delay_ms = 0;
        config.connection.grace_delay_ms = 0;
        config.queue.store_path = Some(store_path.clone());

        let program = plotterkit_designer::MotionProgram::from_text("G1 X40 Y25\n", 5.0, 0.0);
        let job = plotterkit_queue::Job::new(plotterkit_queue::JobKind::Drawing, "square", program);
        let mut stored = serde_json::to_value(&job).unwrap();
        stored["status"] = serde_json::json!("failed");
        stored["error"] = serde_json::json!("Device disconnected");
        stored["failed_at"] = serde_json::to_value(chrono::Utc::now()).unwrap();
        stored["recovery"] = serde_json::json!({
            "x": 40.0,
            "y": 25.0,
            "z": config.plotter.pen_up_z,
            "last_successful_line": 0
        });
        std::fs::write(
            &store_path,
            serde_json::json!({ "version": 1, "jobs": [stored] }).to_string(),
        )
        .unwrap();

        let session = Session::new(&config, true).unwrap();
        let point = session.recovery_point();
        assert_eq!((point.x, point.y), (40.0, 25.0));
        assert_eq!(point.last_successful_line, Some(0));

        // Pen already up: no lift, only the return move.
        let summary = session.recover(&recovery_plan(&config)).await.unwrap();
        assert_eq!(summary.total_lines, 2);
        let point = session.link.last_position();
        assert_eq!((point.x, point.y), (0.0, 0.0));
    }
}
