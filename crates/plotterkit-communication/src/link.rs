//! Device link: one serial connection and the ack-paced streaming protocol.
//!
//! The link owns the port for its whole lifetime. A reader task turns the
//! inbound byte stream into lines; every line is published as a log event,
//! and while the engine waits for an acknowledgment the line is also handed
//! to the waiting operation. A health task checks the port on a fixed
//! interval and reports a lost connection the same way.
//!
//! Exactly one operation holds the wire at a time: a program stream or a
//! single command. A new stream supersedes (cancels) the running one; a
//! single command issued during a stream is rejected with
//! [`DeviceError::Busy`].

use crate::ack::{AckPredicate, TokenAck};
use crate::auxiliary::AuxiliaryController;
use crate::communication::{write_line, ConnectionParams, PortOpener, SerialPort};
use crate::control::SendControl;
use crate::recovery::{recovery_program, PositionTracker, RecoveryPlan, RecoveryPoint};
use parking_lot::{Mutex, RwLock};
use plotterkit_core::program::{is_transmittable, transmittable_lines};
use plotterkit_core::{
    AppEvent, ConnectionEvent, DeviceError, DisconnectReason, EventBus, StreamDispatcher,
    StreamEvent,
};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Link timing and connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Serial parameters
    pub params: ConnectionParams,
    /// Longest wait for an acknowledgment
    pub ack_timeout: Duration,
    /// Wait after opening; the controller resets when the port opens
    pub settle_delay: Duration,
    /// Wait after a completed stream before closing
    pub grace_delay: Duration,
    /// Interval between connection health checks
    pub health_interval: Duration,
    /// Keep the port open between operations
    pub persistent: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            params: ConnectionParams::default(),
            ack_timeout: Duration::from_millis(5000),
            settle_delay: Duration::from_millis(2000),
            grace_delay: Duration::from_millis(500),
            health_interval: Duration::from_millis(1000),
            persistent: false,
        }
    }
}

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No port open
    Disconnected,
    /// Port being opened
    Opening,
    /// Open, nothing in flight
    Idle,
    /// Writing a line
    Sending,
    /// Line written, waiting for the device
    AwaitingAck,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Opening => write!(f, "Opening"),
            LinkState::Idle => write!(f, "Idle"),
            LinkState::Sending => write!(f, "Sending"),
            LinkState::AwaitingAck => write!(f, "AwaitingAck"),
        }
    }
}

/// Outcome of a completed stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSummary {
    /// Lines sent and acknowledged
    pub total_lines: usize,
    /// Wall-clock duration
    pub elapsed: Duration,
}

#[derive(Debug)]
enum Inbound {
    Acked(String),
    Line(String),
    Closed(String),
}

#[derive(Debug)]
enum AckWait {
    Acked,
    Closed(String),
    TimedOut,
    Cancelled,
}

struct Shared {
    port_name: String,
    ack: Arc<dyn AckPredicate>,
    dispatcher: StreamDispatcher,
    bus: Option<Arc<EventBus>>,
    state: RwLock<LinkState>,
    awaiting_ack: AtomicBool,
    inbound: mpsc::UnboundedSender<Inbound>,
    epoch: Mutex<Instant>,
    streaming_index: Mutex<Option<usize>>,
}

impl Shared {
    fn elapsed_ms(&self) -> u64 {
        self.epoch.lock().elapsed().as_millis() as u64
    }

    fn state(&self) -> LinkState {
        *self.state.read()
    }

    fn set_state(&self, state: LinkState) -> LinkState {
        std::mem::replace(&mut *self.state.write(), state)
    }

    fn status(&self, message: impl Into<String>) {
        self.dispatcher.publish(StreamEvent::Status {
            message: message.into(),
            elapsed_ms: self.elapsed_ms(),
        });
    }

    fn publish_connection(&self, event: ConnectionEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(AppEvent::Connection(event));
        }
    }

    fn handle_line(&self, line: &str) {
        tracing::debug!(port = %self.port_name, "< {}", line);
        self.dispatcher.publish(StreamEvent::Log {
            message: line.to_string(),
            elapsed_ms: self.elapsed_ms(),
            line_index: *self.streaming_index.lock(),
        });

        if self.awaiting_ack.load(Ordering::SeqCst) {
            let message = if self.ack.is_ack(line) {
                Inbound::Acked(line.to_string())
            } else {
                Inbound::Line(line.to_string())
            };
            self.inbound.send(message).ok();
        }
    }

    fn connection_lost(&self, reason: String) {
        if self.set_state(LinkState::Disconnected) != LinkState::Disconnected {
            tracing::warn!(port = %self.port_name, "Connection lost: {}", reason);
            self.publish_connection(ConnectionEvent::Closed {
                port: self.port_name.clone(),
                reason: DisconnectReason::ConnectionLost,
            });
        }
        self.inbound.send(Inbound::Closed(reason)).ok();
    }
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

struct Connection {
    port: SharedPort,
    shutdown: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    fn stop(self) -> SharedPort {
        self.shutdown.store(true, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
        self.port
    }
}

async fn read_loop(shared: Arc<Shared>, port: SharedPort, shutdown: Arc<AtomicBool>) {
    let mut buffer = String::new();
    let mut chunk = [0u8; 256];

    while !shutdown.load(Ordering::SeqCst) {
        let result = port.lock().read(&mut chunk);
        match result {
            Ok(0) => {}
            Ok(n) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                while let Some(end) = buffer.find('\n') {
                    let line: String = buffer.drain(..=end).collect();
                    let line = line.trim();
                    if !line.is_empty() {
                        shared.handle_line(line);
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    shared.connection_lost(format!("read failed: {}", e));
                }
                break;
            }
        }
        tokio::time::sleep(READ_POLL_INTERVAL).await;
    }
}

async fn health_loop(
    shared: Arc<Shared>,
    port: SharedPort,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let attached = port.lock().check_attached();
        if let Err(e) = attached {
            if !shutdown.load(Ordering::SeqCst) {
                shared.connection_lost(format!("health check failed: {}", e));
            }
            break;
        }
    }
}

async fn wait_for_ack(
    wire: &mut mpsc::UnboundedReceiver<Inbound>,
    timeout: Option<Duration>,
    control: &SendControl,
    responses: &mut Vec<String>,
) -> AckWait {
    let deadline = async move {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = wire.recv() => match message {
                Some(Inbound::Acked(line)) => {
                    responses.push(line);
                    return AckWait::Acked;
                }
                Some(Inbound::Line(line)) => responses.push(line),
                Some(Inbound::Closed(reason)) => return AckWait::Closed(reason),
                None => return AckWait::Closed("inbound channel closed".to_string()),
            },
            _ = &mut deadline => return AckWait::TimedOut,
            _ = control.cancelled() => return AckWait::Cancelled,
        }
    }
}

/// Resolve with the reason once the connection is lost, discarding anything
/// else that arrives meanwhile.
async fn wait_for_close(wire: &mut mpsc::UnboundedReceiver<Inbound>) -> String {
    loop {
        match wire.recv().await {
            Some(Inbound::Closed(reason)) => return reason,
            Some(other) => tracing::trace!("Ignoring inbound message while paused: {:?}", other),
            None => return "inbound channel closed".to_string(),
        }
    }
}

fn drain_stale(wire: &mut mpsc::UnboundedReceiver<Inbound>) {
    while let Ok(stale) = wire.try_recv() {
        tracing::trace!("Discarding stale inbound message: {:?}", stale);
    }
}

/// Whether a line stops the device until the operator resumes it
pub fn is_operator_pause(line: &str) -> bool {
    let code = line.split_whitespace().next().unwrap_or_default();
    matches!(
        code.to_ascii_uppercase().as_str(),
        "M0" | "M00" | "M1" | "M01"
    )
}

/// Builder for [`DeviceLink`]
pub struct DeviceLinkBuilder {
    config: LinkConfig,
    opener: Arc<dyn PortOpener>,
    ack: Arc<dyn AckPredicate>,
    bus: Option<Arc<EventBus>>,
    event_capacity: usize,
}

impl DeviceLinkBuilder {
    /// Replace the acknowledgment rule
    pub fn ack_predicate(mut self, ack: Arc<dyn AckPredicate>) -> Self {
        self.ack = ack;
        self
    }

    /// Publish connection events on a bus
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Buffer size of the stream event channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the link; no port is opened yet
    pub fn build(self) -> DeviceLink {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            port_name: self.config.params.port.clone(),
            ack: self.ack,
            dispatcher: StreamDispatcher::new(self.event_capacity),
            bus: self.bus,
            state: RwLock::new(LinkState::Disconnected),
            awaiting_ack: AtomicBool::new(false),
            inbound: tx,
            epoch: Mutex::new(Instant::now()),
            streaming_index: Mutex::new(None),
        });

        DeviceLink {
            config: self.config,
            opener: self.opener,
            shared,
            connection: Mutex::new(None),
            wire: tokio::sync::Mutex::new(rx),
            active: Mutex::new(None),
            recovery: Mutex::new(RecoveryPoint::default()),
        }
    }
}

/// One serial connection to the plotter
pub struct DeviceLink {
    config: LinkConfig,
    opener: Arc<dyn PortOpener>,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
    wire: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    active: Mutex<Option<SendControl>>,
    recovery: Mutex<RecoveryPoint>,
}

impl DeviceLink {
    /// Link with the default ack rule and no event bus
    pub fn new(config: LinkConfig, opener: Arc<dyn PortOpener>) -> Self {
        Self::builder(config, opener).build()
    }

    /// Start building a link
    pub fn builder(config: LinkConfig, opener: Arc<dyn PortOpener>) -> DeviceLinkBuilder {
        DeviceLinkBuilder {
            config,
            opener,
            ack: Arc::new(TokenAck::default()),
            bus: None,
            event_capacity: 1024,
        }
    }

    /// Link settings
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Port name
    pub fn port_name(&self) -> &str {
        &self.shared.port_name
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Whether the port is open
    pub fn is_connected(&self) -> bool {
        matches!(
            self.shared.state(),
            LinkState::Idle | LinkState::Sending | LinkState::AwaitingAck
        )
    }

    /// Whether a program stream is running
    pub fn is_streaming(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Receive stream events (status, progress, log, complete, error)
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.dispatcher.subscribe()
    }

    /// Last known position and last acknowledged line.
    ///
    /// Preserved when the link closes or fails so a recovery program can be
    /// built from it.
    pub fn last_position(&self) -> RecoveryPoint {
        *self.recovery.lock()
    }

    /// Seed the position a recovery program starts from, e.g. with a point
    /// saved by an earlier session. Refused while a stream is running.
    pub fn restore_position(&self, point: RecoveryPoint) -> Result<(), DeviceError> {
        if self.is_streaming() {
            return Err(DeviceError::Busy);
        }
        *self.recovery.lock() = point;
        Ok(())
    }

    /// Pause the running stream before its next line
    pub fn pause(&self) -> bool {
        self.with_active(SendControl::pause)
    }

    /// Resume a paused stream
    pub fn resume(&self) -> bool {
        self.with_active(SendControl::resume)
    }

    /// Cancel the running stream; the link closes
    pub fn cancel(&self) -> bool {
        self.with_active(SendControl::cancel)
    }

    fn with_active(&self, f: impl FnOnce(&SendControl)) -> bool {
        match self.active.lock().as_ref() {
            Some(control) => {
                f(control);
                true
            }
            None => false,
        }
    }

    /// Open the port (if needed) and wait for the device to settle
    pub async fn open(&self) -> Result<(), DeviceError> {
        if self.is_connected() {
            return Ok(());
        }
        let mut wire = self.wire.lock().await;
        drain_stale(&mut wire);
        self.ensure_open(&SendControl::new()).await.map(|_| ())
    }

    /// Close the port, cancelling any running stream
    pub fn close(&self) {
        self.cancel();
        self.teardown(Some(DisconnectReason::UserRequested));
    }

    /// Open the port if it is closed. The settle wait ends early when
    /// `control` is cancelled; callers check for that themselves.
    async fn ensure_open(&self, control: &SendControl) -> Result<bool, DeviceError> {
        if self.is_connected() && self.connection.lock().is_some() {
            return Ok(false);
        }
        self.teardown(None);

        let params = &self.config.params;
        self.shared.set_state(LinkState::Opening);
        let port = match self.opener.open(params) {
            Ok(port) => port,
            Err(e) => {
                self.shared.set_state(LinkState::Disconnected);
                tracing::error!(port = %params.port, "Failed to open: {}", e);
                self.shared.publish_connection(ConnectionEvent::OpenFailed {
                    port: params.port.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let port: SharedPort = Arc::new(Mutex::new(port));
        let shutdown = Arc::new(AtomicBool::new(false));
        let tasks = vec![
            tokio::spawn(read_loop(
                self.shared.clone(),
                port.clone(),
                shutdown.clone(),
            )),
            tokio::spawn(health_loop(
                self.shared.clone(),
                port.clone(),
                shutdown.clone(),
                self.config.health_interval,
            )),
        ];
        *self.connection.lock() = Some(Connection {
            port,
            shutdown,
            tasks,
        });
        *self.shared.epoch.lock() = Instant::now();
        self.shared.set_state(LinkState::Idle);

        tracing::info!(port = %params.port, "Opened at {} baud", params.baud_rate);
        self.shared.publish_connection(ConnectionEvent::Opened {
            port: params.port.clone(),
            baud_rate: params.baud_rate,
        });

        if !self.config.settle_delay.is_zero() {
            self.shared.status(format!(
                "Connected to {}, waiting {}ms for the device to start",
                params.port,
                self.config.settle_delay.as_millis()
            ));
            tokio::select! {
                _ = tokio::time::sleep(self.config.settle_delay) => {}
                _ = control.cancelled() => {
                    tracing::info!(port = %params.port, "Cancelled while the device settled");
                }
            }
        }
        Ok(true)
    }

    fn teardown(&self, reason: Option<DisconnectReason>) {
        let connection = self.connection.lock().take();
        self.shared.awaiting_ack.store(false, Ordering::SeqCst);
        *self.shared.streaming_index.lock() = None;
        let previous = self.shared.set_state(LinkState::Disconnected);

        if let Some(connection) = connection {
            let port = connection.stop();
            if let Err(e) = port.lock().close() {
                tracing::warn!(port = %self.shared.port_name, "Error closing port: {}", e);
            }
            if let Some(reason) = reason {
                if previous != LinkState::Disconnected {
                    tracing::info!(port = %self.shared.port_name, "Closed ({:?})", reason);
                    self.shared.publish_connection(ConnectionEvent::Closed {
                        port: self.shared.port_name.clone(),
                        reason,
                    });
                }
            }
        }
    }

    fn write(&self, line: &str) -> io::Result<()> {
        let port = self.connection.lock().as_ref().map(|c| c.port.clone());
        match port {
            Some(port) => write_line(port.lock().as_mut(), line),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "port closed")),
        }
    }

    fn fail(&self, error: DeviceError, reason: DisconnectReason) -> DeviceError {
        self.shared.dispatcher.publish(StreamEvent::Error {
            message: error.to_string(),
            elapsed_ms: self.shared.elapsed_ms(),
        });
        self.teardown(Some(reason));
        error
    }

    /// Stream a program, one acknowledged line at a time.
    ///
    /// Blank and comment lines are dropped before sending. A stream already
    /// running on this link is cancelled first. Every outcome ends with a
    /// `Complete` or `Error` stream event.
    pub async fn send_program<S>(
        &self,
        program: &[S],
        control: SendControl,
    ) -> Result<StreamSummary, DeviceError>
    where
        S: AsRef<str>,
    {
        let lines = transmittable_lines(program.iter().map(|l| l.as_ref()));

        let previous = self.active.lock().replace(control.clone());
        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                tracing::warn!(port = %self.shared.port_name, "Superseding the running stream");
                previous.cancel();
            }
        }

        let mut wire = self.wire.lock().await;
        let result = self.stream(&mut wire, &lines, &control).await;
        drop(wire);

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|c| c.same_as(&control)) {
            *active = None;
        }
        result
    }

    async fn stream(
        &self,
        wire: &mut mpsc::UnboundedReceiver<Inbound>,
        lines: &[String],
        control: &SendControl,
    ) -> Result<StreamSummary, DeviceError> {
        drain_stale(wire);
        if control.is_cancelled() {
            return Err(self.fail(
                DeviceError::Cancelled { line_index: 0 },
                DisconnectReason::UserRequested,
            ));
        }
        if let Err(e) = self.ensure_open(control).await {
            self.shared.dispatcher.publish(StreamEvent::Error {
                message: e.to_string(),
                elapsed_ms: 0,
            });
            return Err(e);
        }
        if control.is_cancelled() {
            return Err(self.fail(
                DeviceError::Cancelled { line_index: 0 },
                DisconnectReason::UserRequested,
            ));
        }

        let total = lines.len();
        let started = Instant::now();
        *self.shared.epoch.lock() = started;
        let mut tracker = {
            let mut recovery = self.recovery.lock();
            recovery.last_successful_line = None;
            PositionTracker::new(recovery.position())
        };

        tracing::info!(port = %self.shared.port_name, "Streaming {} lines", total);
        self.shared.status(format!("Streaming {} lines", total));

        let mut discarded = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if control.is_paused() {
                tracing::info!("Stream paused before line {}", index);
                self.shared.status(format!("Paused before line {}", index + 1));
                tokio::select! {
                    runnable = control.wait_runnable() => {
                        if runnable {
                            tracing::info!("Stream resumed");
                            self.shared.status("Resumed");
                        }
                    }
                    reason = wait_for_close(wire) => {
                        let last = self.recovery.lock().last_successful_line;
                        tracing::warn!("Connection lost while paused before line {}", index);
                        return Err(self.fail(
                            DeviceError::Disconnected {
                                last_successful_line: last,
                                reason,
                            },
                            DisconnectReason::ConnectionLost,
                        ));
                    }
                }
            }
            if control.is_cancelled() {
                tracing::info!("Stream cancelled before line {}", index);
                return Err(self.fail(
                    DeviceError::Cancelled { line_index: index },
                    DisconnectReason::UserRequested,
                ));
            }
            if !self.is_connected() {
                let last = self.recovery.lock().last_successful_line;
                return Err(self.fail(
                    DeviceError::Disconnected {
                        last_successful_line: last,
                        reason: "connection lost between lines".to_string(),
                    },
                    DisconnectReason::ConnectionLost,
                ));
            }

            *self.shared.streaming_index.lock() = Some(index);
            self.shared.set_state(LinkState::Sending);
            self.shared.dispatcher.publish(StreamEvent::Progress {
                current: index + 1,
                total,
                line: line.clone(),
                elapsed_ms: self.shared.elapsed_ms(),
            });

            self.shared.awaiting_ack.store(true, Ordering::SeqCst);
            tracing::trace!("> {}", line);
            if let Err(e) = self.write(line) {
                tracing::error!(port = %self.shared.port_name, "Write failed at line {}: {}", index, e);
                return Err(self.fail(
                    DeviceError::WriteFailed {
                        line_index: index,
                        reason: e.to_string(),
                    },
                    DisconnectReason::Error(e.to_string()),
                ));
            }
            self.shared.set_state(LinkState::AwaitingAck);

            let timeout = if is_operator_pause(line) {
                None
            } else {
                Some(self.config.ack_timeout)
            };
            match wait_for_ack(wire, timeout, control, &mut discarded).await {
                AckWait::Acked => {
                    self.shared.awaiting_ack.store(false, Ordering::SeqCst);
                    self.shared.set_state(LinkState::Idle);
                    tracker.apply(line);
                    let position = tracker.position();
                    *self.recovery.lock() = RecoveryPoint {
                        x: position.x,
                        y: position.y,
                        z: position.z,
                        last_successful_line: Some(index),
                    };
                    discarded.clear();
                }
                AckWait::Closed(reason) => {
                    let last = self.recovery.lock().last_successful_line;
                    tracing::error!(port = %self.shared.port_name, "Disconnected during line {}: {}", index, reason);
                    return Err(self.fail(
                        DeviceError::Disconnected {
                            last_successful_line: last,
                            reason,
                        },
                        DisconnectReason::ConnectionLost,
                    ));
                }
                AckWait::TimedOut => {
                    let timeout_ms = self.config.ack_timeout.as_millis() as u64;
                    tracing::error!(port = %self.shared.port_name, "No acknowledgment for line {} within {}ms", index, timeout_ms);
                    return Err(self.fail(
                        DeviceError::AckTimeout {
                            line_index: index,
                            timeout_ms,
                        },
                        DisconnectReason::Error("acknowledgment timeout".to_string()),
                    ));
                }
                AckWait::Cancelled => {
                    tracing::info!("Stream cancelled while waiting for line {}", index);
                    return Err(self.fail(
                        DeviceError::Cancelled {
                            line_index: index + 1,
                        },
                        DisconnectReason::UserRequested,
                    ));
                }
            }
        }

        *self.shared.streaming_index.lock() = None;
        let elapsed = started.elapsed();
        tracing::info!(
            port = %self.shared.port_name,
            "Sent {} lines in {:.1}s",
            total,
            elapsed.as_secs_f64()
        );
        self.shared.dispatcher.publish(StreamEvent::Complete {
            total_lines: total,
            total_time_secs: elapsed.as_secs_f64(),
            elapsed_ms: self.shared.elapsed_ms(),
        });

        if !self.config.persistent {
            tokio::time::sleep(self.config.grace_delay).await;
            self.teardown(Some(DisconnectReason::ProgramComplete));
        }

        Ok(StreamSummary {
            total_lines: total,
            elapsed,
        })
    }

    /// Send one line and collect the device's responses up to its
    /// acknowledgment.
    ///
    /// Uses the open connection when there is one; otherwise opens the port
    /// and, unless the link is persistent, closes it again afterwards.
    /// Fails with [`DeviceError::Busy`] while another operation holds the
    /// wire.
    pub async fn send_command(&self, line: &str) -> Result<Vec<String>, DeviceError> {
        let line = line.trim();
        if !is_transmittable(line) {
            return Ok(Vec::new());
        }

        let mut wire = self.wire.try_lock().map_err(|_| DeviceError::Busy)?;
        drain_stale(&mut wire);
        let opened_here = self.ensure_open(&SendControl::new()).await?;

        *self.shared.streaming_index.lock() = None;
        self.shared.awaiting_ack.store(true, Ordering::SeqCst);
        tracing::debug!(port = %self.shared.port_name, "> {}", line);
        if let Err(e) = self.write(line) {
            self.teardown(Some(DisconnectReason::Error(e.to_string())));
            return Err(DeviceError::WriteFailed {
                line_index: 0,
                reason: e.to_string(),
            });
        }
        self.shared.set_state(LinkState::AwaitingAck);

        let mut responses = Vec::new();
        let outcome = wait_for_ack(
            &mut wire,
            Some(self.config.ack_timeout),
            &SendControl::new(),
            &mut responses,
        )
        .await;
        self.shared.awaiting_ack.store(false, Ordering::SeqCst);

        let result = match outcome {
            AckWait::Acked => {
                self.shared.set_state(LinkState::Idle);
                let mut recovery = self.recovery.lock();
                let mut tracker = PositionTracker::new(recovery.position());
                tracker.apply(line);
                let position = tracker.position();
                recovery.x = position.x;
                recovery.y = position.y;
                recovery.z = position.z;
                Ok(responses)
            }
            AckWait::Closed(reason) => {
                self.teardown(Some(DisconnectReason::ConnectionLost));
                Err(DeviceError::Disconnected {
                    last_successful_line: self.recovery.lock().last_successful_line,
                    reason,
                })
            }
            AckWait::TimedOut => {
                self.shared.set_state(LinkState::Idle);
                Err(DeviceError::AckTimeout {
                    line_index: 0,
                    timeout_ms: self.config.ack_timeout.as_millis() as u64,
                })
            }
            AckWait::Cancelled => Err(DeviceError::Cancelled { line_index: 0 }),
        };

        if opened_here && !self.config.persistent && self.is_connected() {
            self.teardown(Some(DisconnectReason::UserRequested));
        }
        result
    }

    /// Return the device to a safe state: raise the pen if it was down and
    /// travel to the origin at a conservative feed rate. Refused while a
    /// stream is running.
    pub async fn recover(&self, plan: &RecoveryPlan) -> Result<StreamSummary, DeviceError> {
        if self.is_streaming() {
            tracing::warn!(port = %self.shared.port_name, "Recovery refused while streaming");
            return Err(DeviceError::Busy);
        }
        let point = self.last_position();
        let lines = recovery_program(&point, plan);
        tracing::info!(
            "Recovering from X{:.3} Y{:.3} Z{:.3} (last line {:?})",
            point.x,
            point.y,
            point.z,
            point.last_successful_line
        );
        self.send_program(&lines, SendControl::new()).await
    }
}

impl AuxiliaryController for DeviceLink {
    fn is_connected(&self) -> bool {
        DeviceLink::is_connected(self)
    }

    fn name(&self) -> String {
        self.shared.port_name.clone()
    }
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("port", &self.shared.port_name)
            .field("state", &self.state())
            .field("persistent", &self.config.persistent)
            .finish()
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.stop();
        }
    }
}
