//! Dispatch tests: queue, device link and the in-memory plotter together

use parking_lot::Mutex;
use plotterkit_communication::{
    ConnectionParams, DeviceLink, LinkConfig, NoAuxiliary, VirtualBehavior, VirtualDevice,
};
use plotterkit_core::{AppEvent, EventBus, EventFilter, QueueError, QueueEvent, StreamEvent};
use plotterkit_designer::MotionProgram;
use plotterkit_queue::{JobKind, JobQueue, JobStatus, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn persistent_config() -> LinkConfig {
    LinkConfig {
        params: ConnectionParams::new("sim0", 115200),
        ack_timeout: Duration::from_millis(400),
        settle_delay: Duration::ZERO,
        grace_delay: Duration::ZERO,
        health_interval: Duration::from_millis(20),
        persistent: true,
    }
}

fn program(lines: &str) -> MotionProgram {
    MotionProgram::from_text(lines, 5.0, 0.0)
}

struct Rig {
    device: VirtualDevice,
    queue: Arc<JobQueue>,
    events: Arc<Mutex<Vec<AppEvent>>>,
}

async fn rig(behavior: VirtualBehavior, config: LinkConfig) -> Rig {
    let device = VirtualDevice::new(behavior);
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        bus.subscribe(EventFilter::All, move |event| events.lock().push(event));
    }
    let link = Arc::new(
        DeviceLink::builder(config, Arc::new(device.clone()))
            .event_bus(bus.clone())
            .build(),
    );
    link.open().await.unwrap();
    let queue = Arc::new(JobQueue::new(link, Arc::new(NoAuxiliary), bus));
    Rig {
        device,
        queue,
        events,
    }
}

#[tokio::test]
async fn test_completed_job_is_removed_and_relayed() {
    let rig = rig(VirtualBehavior::AlwaysAck, persistent_config()).await;
    let first = rig.queue.enqueue(
        JobKind::Drawing,
        "first",
        program("G1 X0 Y0 F1500\nG1 X10 Y0\n; Path 1\n"),
    );
    rig.queue
        .enqueue(JobKind::Text, "second", program("G1 X5 Y5\n"));

    let finished = rig.queue.process_next().await.unwrap();
    assert_eq!(finished.id, first.id);
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(rig.device.received(), vec!["G1 X0 Y0 F1500", "G1 X10 Y0"]);

    let summary = rig.queue.summary();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.pending, 1);
    assert!(rig.queue.get(first.id).is_none());

    let events = rig.events.lock();
    let complete = events.iter().find_map(|e| match e {
        AppEvent::Job(job) if job.job_id == first.id => match job.event {
            StreamEvent::Complete { total_lines, .. } => Some((total_lines, job.percent)),
            _ => None,
        },
        _ => None,
    });
    assert_eq!(complete, Some((2, 100.0)));
    assert!(events.iter().any(|e| matches!(
        e,
        AppEvent::Queue(QueueEvent::JobCompleted { job_id }) if *job_id == first.id
    )));
}

#[tokio::test]
async fn test_failed_job_is_retained_with_error() {
    let rig = rig(VirtualBehavior::FailWriteAt(1), persistent_config()).await;
    let job = rig
        .queue
        .enqueue(JobKind::Image, "cat", program("G1 X1 Y1\nG1 X2 Y2\nG1 X3 Y3\n"));

    let finished = rig.queue.process_next().await.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Write failed at line 1")));

    let stored = rig.queue.get(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(rig.queue.summary().failed, 1);
    assert!(!rig.queue.link().is_connected());

    let err = rig.queue.process_next().await.unwrap_err();
    assert!(matches!(err, QueueError::PreconditionsUnmet { .. }));
}

#[tokio::test]
async fn test_second_dispatch_is_rejected() {
    let mut config = persistent_config();
    config.ack_timeout = Duration::from_secs(5);
    let rig = rig(VirtualBehavior::NeverAck, config).await;
    rig.queue.enqueue(JobKind::Drawing, "slow", program("G1 X1 Y1\n"));
    rig.queue.enqueue(JobKind::Drawing, "next", program("G1 X2 Y2\n"));

    let running = {
        let queue = rig.queue.clone();
        tokio::spawn(async move { queue.process_next().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(rig.queue.is_processing());
    assert_eq!(
        rig.queue.process_next().await.unwrap_err(),
        QueueError::AlreadyProcessing
    );
    assert_eq!(rig.queue.clear(), Err(QueueError::QueueBusy));

    assert!(rig.queue.cancel_current());
    let finished = running.await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(!rig.queue.is_processing());
    assert_eq!(rig.queue.summary().pending, 1);
}

#[tokio::test]
async fn test_empty_queue_has_nothing_to_dispatch() {
    let rig = rig(VirtualBehavior::AlwaysAck, persistent_config()).await;
    assert_eq!(
        rig.queue.process_next().await.unwrap_err(),
        QueueError::NoPendingJobs
    );
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);

    let open = |store: JobStore| {
        let link = Arc::new(DeviceLink::new(
            persistent_config(),
            Arc::new(device.clone()),
        ));
        JobQueue::with_store(link, Arc::new(NoAuxiliary), Arc::new(EventBus::new()), store)
            .unwrap()
    };

    let queue = open(JobStore::new(&path));
    let a = queue.enqueue(JobKind::Drawing, "a", program("G1 X1 Y1\n"));
    let b = queue.enqueue(JobKind::Text, "b", program("G1 X2 Y2\n"));
    queue.reorder(1, 0).unwrap();
    drop(queue);

    let reopened = open(JobStore::new(&path));
    let ids: Vec<_> = reopened.list().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
}

#[tokio::test]
async fn test_failed_job_keeps_recovery_point_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    let device = VirtualDevice::new(VirtualBehavior::UnplugAfter(3));

    let open = |store: JobStore| {
        let link = Arc::new(DeviceLink::new(
            persistent_config(),
            Arc::new(device.clone()),
        ));
        JobQueue::with_store(link, Arc::new(NoAuxiliary), Arc::new(EventBus::new()), store)
            .unwrap()
    };

    let queue = open(JobStore::new(&path));
    queue.link().open().await.unwrap();
    let job = queue.enqueue(
        JobKind::Drawing,
        "square",
        program("G90\nG1 Z0\nG1 X10 Y20\nG1 X30 Y20\n"),
    );

    let failed = queue.process_next().await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.failed_at.is_some());
    let point = failed.recovery.expect("failed job keeps its recovery point");
    assert_eq!((point.x, point.y, point.z), (10.0, 20.0, 0.0));
    assert_eq!(point.last_successful_line, Some(2));
    assert_eq!(queue.last_failure_point(), Some((job.id, point)));
    drop(queue);

    let reopened = open(JobStore::new(&path));
    assert_eq!(reopened.last_failure_point(), Some((job.id, point)));

    reopened.retry(job.id).unwrap();
    assert_eq!(reopened.last_failure_point(), None);
    assert_eq!(reopened.get(job.id).unwrap().recovery, None);
}
