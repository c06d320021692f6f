//! Streaming protocol tests against the in-memory plotter

use parking_lot::Mutex;
use plotterkit_communication::{
    ConnectionParams, DeviceLink, LinkConfig, LinkState, RecoveryPlan, RecoveryPoint,
    SendControl, VirtualBehavior, VirtualDevice,
};
use plotterkit_core::{
    AppEvent, ConnectionEvent, DeviceError, DisconnectReason, EventBus, EventFilter, StreamEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn fast_config() -> LinkConfig {
    LinkConfig {
        params: ConnectionParams::new("sim0", 115200),
        ack_timeout: Duration::from_millis(400),
        settle_delay: Duration::ZERO,
        grace_delay: Duration::ZERO,
        health_interval: Duration::from_millis(20),
        persistent: false,
    }
}

fn link_for(device: &VirtualDevice, config: LinkConfig) -> DeviceLink {
    DeviceLink::new(config, Arc::new(device.clone()))
}

fn drain(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn program(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("G1 X{} Y{}", i, i)).collect()
}

#[tokio::test]
async fn test_every_line_is_acknowledged_before_the_next() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let link = link_for(&device, fast_config());
    let mut rx = link.subscribe();

    let summary = link
        .send_program(&program(5), SendControl::new())
        .await
        .unwrap();

    assert_eq!(summary.total_lines, 5);
    assert_eq!(device.received(), program(5));

    let events = drain(&mut rx);
    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { current, total, .. } => {
                assert_eq!(*total, 5);
                Some(*current)
            }
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3, 4, 5]);

    match events.last() {
        Some(StreamEvent::Complete { total_lines, .. }) => assert_eq!(*total_lines, 5),
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(link.last_position().last_successful_line, Some(4));
}

#[tokio::test]
async fn test_comments_and_blank_lines_are_not_sent() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let link = link_for(&device, fast_config());
    let mut rx = link.subscribe();

    let lines = ["G21", "; comment", "", "G1 X10 Y10"];
    let summary = link.send_program(&lines, SendControl::new()).await.unwrap();

    assert_eq!(summary.total_lines, 2);
    assert_eq!(device.received(), vec!["G21", "G1 X10 Y10"]);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::Complete { total_lines: 2, .. })));
}

#[tokio::test]
async fn test_missing_ack_times_out_and_closes() {
    let device = VirtualDevice::new(VirtualBehavior::NeverAck);
    let link = link_for(&device, fast_config());
    let mut rx = link.subscribe();

    let err = link
        .send_program(&program(3), SendControl::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        DeviceError::AckTimeout {
            line_index: 0,
            timeout_ms: 400
        }
    );
    assert_eq!(device.received().len(), 1);
    assert!(!link.is_connected());
    assert!(matches!(
        drain(&mut rx).last(),
        Some(StreamEvent::Error { .. })
    ));
}

#[tokio::test]
async fn test_unplug_mid_stream_preserves_last_line() {
    let device = VirtualDevice::new(VirtualBehavior::UnplugAfter(2));
    let link = link_for(&device, fast_config());
    let mut rx = link.subscribe();

    let err = link
        .send_program(&program(5), SendControl::new())
        .await
        .unwrap_err();

    match err {
        DeviceError::Disconnected {
            last_successful_line,
            ..
        } => assert_eq!(last_successful_line, Some(1)),
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert_eq!(device.received().len(), 3);
    assert_eq!(link.last_position().last_successful_line, Some(1));
    assert!(matches!(
        drain(&mut rx).last(),
        Some(StreamEvent::Error { .. })
    ));
}

#[tokio::test]
async fn test_write_failure_is_fatal() {
    let device = VirtualDevice::new(VirtualBehavior::FailWriteAt(1));
    let link = link_for(&device, fast_config());

    let err = link
        .send_program(&program(4), SendControl::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DeviceError::WriteFailed { line_index: 1, .. }));
    assert!(err.is_fatal());
    assert_eq!(device.received(), vec!["G1 X0 Y0"]);
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_open_failure_reports_error_event() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    device.unplug();
    let link = link_for(&device, fast_config());
    let mut rx = link.subscribe();

    let err = link
        .send_program(&program(1), SendControl::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::FailedToOpen { .. }));
    assert!(matches!(
        drain(&mut rx).last(),
        Some(StreamEvent::Error { .. })
    ));
}

#[tokio::test]
async fn test_command_is_rejected_while_streaming() {
    let device = VirtualDevice::new(VirtualBehavior::NeverAck);
    let mut config = fast_config();
    config.ack_timeout = Duration::from_secs(5);
    let link = Arc::new(link_for(&device, config));

    let control = SendControl::new();
    let streaming = {
        let link = link.clone();
        let control = control.clone();
        tokio::spawn(async move { link.send_program(&program(3), control).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(link.send_command("M115").await, Err(DeviceError::Busy));
    assert!(link.is_streaming());

    control.cancel();
    let result = streaming.await.unwrap();
    assert_eq!(result, Err(DeviceError::Cancelled { line_index: 1 }));
    assert!(!link.is_connected());
}

#[tokio::test]
async fn test_pause_holds_the_next_line() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let link = Arc::new(link_for(&device, fast_config()));

    let control = SendControl::new();
    control.pause();
    let streaming = {
        let link = link.clone();
        let control = control.clone();
        tokio::spawn(async move { link.send_program(&program(3), control).await })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(device.received().is_empty());

    control.resume();
    let summary = streaming.await.unwrap().unwrap();
    assert_eq!(summary.total_lines, 3);
    assert_eq!(device.received().len(), 3);
}

#[tokio::test]
async fn test_unplug_while_paused_ends_the_stream() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let link = Arc::new(link_for(&device, fast_config()));
    let mut rx = link.subscribe();

    let control = SendControl::new();
    control.pause();
    let streaming = {
        let link = link.clone();
        let control = control.clone();
        tokio::spawn(async move { link.send_program(&program(3), control).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(link.is_connected());
    device.unplug();

    let result = tokio::time::timeout(Duration::from_secs(1), streaming)
        .await
        .expect("stream should end once the device is gone")
        .unwrap();
    match result {
        Err(DeviceError::Disconnected {
            last_successful_line,
            ..
        }) => assert_eq!(last_successful_line, None),
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert!(device.received().is_empty());
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(!link.is_streaming());
    assert!(matches!(
        drain(&mut rx).last(),
        Some(StreamEvent::Error { .. })
    ));
}

#[tokio::test]
async fn test_cancel_interrupts_settle_delay() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let mut config = fast_config();
    config.settle_delay = Duration::from_secs(10);
    let link = Arc::new(link_for(&device, config));

    let control = SendControl::new();
    let streaming = {
        let link = link.clone();
        let control = control.clone();
        tokio::spawn(async move { link.send_program(&program(2), control).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(link.is_connected());
    assert!(link.cancel());

    let result = tokio::time::timeout(Duration::from_millis(500), streaming)
        .await
        .expect("cancel should cut the settle delay short")
        .unwrap();
    assert_eq!(result, Err(DeviceError::Cancelled { line_index: 0 }));
    assert!(device.received().is_empty());
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_recover_is_refused_while_streaming() {
    let device = VirtualDevice::new(VirtualBehavior::NeverAck);
    let mut config = fast_config();
    config.ack_timeout = Duration::from_secs(5);
    let link = Arc::new(link_for(&device, config));

    let control = SendControl::new();
    let streaming = {
        let link = link.clone();
        let control = control.clone();
        tokio::spawn(async move { link.send_program(&program(3), control).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        link.recover(&RecoveryPlan::default()).await,
        Err(DeviceError::Busy)
    );
    assert_eq!(
        link.restore_position(RecoveryPoint::default()),
        Err(DeviceError::Busy)
    );
    assert!(!control.is_cancelled());
    assert_eq!(device.received(), vec!["G1 X0 Y0"]);

    control.cancel();
    let result = streaming.await.unwrap();
    assert_eq!(result, Err(DeviceError::Cancelled { line_index: 1 }));
}

#[tokio::test]
async fn test_restored_position_drives_recovery() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let link = link_for(&device, fast_config());

    link.restore_position(RecoveryPoint {
        x: 12.0,
        y: 7.5,
        z: 0.0,
        last_successful_line: Some(41),
    })
    .unwrap();
    assert_eq!(link.last_position().last_successful_line, Some(41));

    link.recover(&RecoveryPlan::default()).await.unwrap();
    assert_eq!(device.received(), ["G90", "G0 Z5.000", "G1 X0 Y0 F500"]);
}

#[tokio::test]
async fn test_new_stream_supersedes_running_one() {
    let device = VirtualDevice::new(VirtualBehavior::NeverAck);
    let mut config = fast_config();
    config.ack_timeout = Duration::from_secs(5);
    let link = Arc::new(link_for(&device, config));

    let first = {
        let link = link.clone();
        tokio::spawn(async move { link.send_program(&["G1 X1"], SendControl::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    device.set_behavior(VirtualBehavior::AlwaysAck);
    let summary = link
        .send_program(&["G1 X2", "G1 X3"], SendControl::new())
        .await
        .unwrap();

    assert_eq!(summary.total_lines, 2);
    assert!(matches!(
        first.await.unwrap(),
        Err(DeviceError::Cancelled { .. })
    ));
    assert_eq!(device.received(), vec!["G1 X1", "G1 X2", "G1 X3"]);
    assert_eq!(device.open_count(), 2);
}

#[tokio::test]
async fn test_recovery_returns_to_origin() {
    let device = VirtualDevice::new(VirtualBehavior::UnplugAfter(3));
    let link = link_for(&device, fast_config());

    let lines = ["G90", "G1 Z0", "G1 X10 Y20", "G1 X30 Y20"];
    assert!(link.send_program(&lines, SendControl::new()).await.is_err());

    let point = link.last_position();
    assert_eq!((point.x, point.y, point.z), (10.0, 20.0, 0.0));
    assert_eq!(point.last_successful_line, Some(2));

    device.set_behavior(VirtualBehavior::AlwaysAck);
    device.plug_in();
    link.recover(&RecoveryPlan::default()).await.unwrap();

    let received = device.received();
    assert_eq!(
        received[received.len() - 3..],
        ["G90", "G0 Z5.000", "G1 X0 Y0 F500"]
    );
    let point = link.last_position();
    assert_eq!((point.x, point.y, point.z), (0.0, 0.0, 5.0));
}

#[tokio::test]
async fn test_unsolicited_lines_are_logged_not_acked() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let mut config = fast_config();
    config.persistent = true;
    let link = link_for(&device, config);
    let mut rx = link.subscribe();

    link.open().await.unwrap();
    device.emit("temperature 21");
    tokio::time::sleep(Duration::from_millis(60)).await;

    let logged = drain(&mut rx).into_iter().any(|e| {
        matches!(
            e,
            StreamEvent::Log { ref message, line_index: None, .. } if message == "temperature 21"
        )
    });
    assert!(logged);

    let responses = link.send_command("M115").await.unwrap();
    assert_eq!(responses, vec!["ok"]);
    assert!(link.is_connected());

    link.close();
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_connection_events_on_bus() {
    let device = VirtualDevice::new(VirtualBehavior::AlwaysAck);
    let bus = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        bus.subscribe(EventFilter::All, move |event| seen.lock().push(event));
    }
    let link = DeviceLink::builder(fast_config(), Arc::new(device.clone()))
        .event_bus(bus)
        .build();

    link.send_program(&program(2), SendControl::new())
        .await
        .unwrap();

    let seen = seen.lock();
    assert!(matches!(
        seen.first(),
        Some(AppEvent::Connection(ConnectionEvent::Opened { baud_rate: 115200, .. }))
    ));
    assert!(matches!(
        seen.last(),
        Some(AppEvent::Connection(ConnectionEvent::Closed {
            reason: DisconnectReason::ProgramComplete,
            ..
        }))
    ));
}
