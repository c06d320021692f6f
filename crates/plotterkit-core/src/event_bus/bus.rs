//! Notification bus.
//!
//! Publishers hand typed events to the bus without knowing who listens.
//! Observers either register a synchronous handler with a filter or take an
//! async receiver. The bus never blocks a publisher on a slow observer: async
//! receivers that fall behind lose the oldest events.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AppEvent, EventCategory};

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Which events a handler wants
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EventFilter {
    /// Everything.
    #[default]
    All,
    /// Events in any of these categories.
    Categories(Vec<EventCategory>),
    /// Stream and lifecycle events of one queued job.
    Job(Uuid),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
            EventFilter::Job(id) => event.job_id() == Some(*id),
        }
    }
}

type Handler = Arc<dyn Fn(AppEvent) + Send + Sync>;

/// Bus settings
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Events buffered per async receiver before it starts lagging.
    pub channel_capacity: usize,
    /// Number of recent events kept for late observers; 0 keeps none.
    pub history_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_capacity: 0,
        }
    }
}

/// Application-wide notification bus
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    handlers: RwLock<Vec<(SubscriptionId, EventFilter, Handler)>>,
    next_id: AtomicU64,
    history: RwLock<VecDeque<AppEvent>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Bus with default settings
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Bus with custom settings
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            history: RwLock::new(VecDeque::with_capacity(config.history_capacity)),
            config,
        }
    }

    /// Deliver an event to every matching handler, then to async receivers.
    ///
    /// Handlers run on the publishing task in subscription order, outside the
    /// bus lock, so a handler may subscribe or unsubscribe. Returns how many
    /// observers the event reached.
    pub fn publish(&self, event: AppEvent) -> usize {
        tracing::trace!("{}", event.description());
        self.remember(&event);

        let matching: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, filter, _)| filter.matches(&event))
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in &matching {
            handler(event.clone());
        }

        matching.len() + self.sender.send(event).unwrap_or(0)
    }

    /// Register a synchronous handler
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!("Subscription {} added ({:?})", id, filter);
        self.handlers.write().push((id, filter, Arc::new(handler)));
        id
    }

    /// Remove a handler; false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _, _)| *sub != id);
        before != handlers.len()
    }

    /// Receiver for observing events from an async task
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// The last `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<AppEvent> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Forget remembered events
    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    /// Current settings
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    fn remember(&self, event: &AppEvent) {
        if self.config.history_capacity == 0 {
            return;
        }
        let mut history = self.history.write();
        if history.len() == self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::{
        ConnectionEvent, JobEvent, QueueEvent, QueueSummary, StreamEvent,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn opened() -> AppEvent {
        AppEvent::Connection(ConnectionEvent::Opened {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
        })
    }

    fn status(n: u64) -> AppEvent {
        AppEvent::Stream(StreamEvent::Status {
            message: format!("status {}", n),
            elapsed_ms: n,
        })
    }

    fn job_progress(job_id: Uuid, current: usize) -> AppEvent {
        AppEvent::Job(JobEvent {
            job_id,
            percent: current as f64 * 10.0,
            event: StreamEvent::Progress {
                current,
                total: 10,
                line: "G1 X1 Y1".to_string(),
                elapsed_ms: 0,
            },
        })
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();

        let first = bus.subscribe(EventFilter::All, |_| {});
        let second = bus.subscribe(EventFilter::All, |_| {});
        assert_ne!(first, second);
        assert_eq!(bus.subscriber_count(), 2);

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_category_filter() {
        let bus = EventBus::new();
        let connection = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(AtomicUsize::new(0));

        let c = connection.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Connection]),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        let q = queue.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Queue]),
            move |_| {
                q.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(opened());
        bus.publish(AppEvent::Queue(QueueEvent::Changed {
            summary: QueueSummary::default(),
        }));
        bus.publish(status(0));

        assert_eq!(connection.load(Ordering::SeqCst), 1);
        assert_eq!(queue.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_job_filter() {
        let bus = EventBus::new();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.subscribe(EventFilter::Job(watched), move |event| s.lock().push(event));

        bus.publish(job_progress(other, 1));
        bus.publish(job_progress(watched, 2));
        bus.publish(AppEvent::Queue(QueueEvent::JobCompleted { job_id: watched }));
        bus.publish(AppEvent::Queue(QueueEvent::JobCompleted { job_id: other }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], job_progress(watched, 2));
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Mutex::new(None));

        let (b, c, s) = (bus.clone(), calls.clone(), slot.clone());
        let id = bus.subscribe(EventFilter::All, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *s.lock() {
                b.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        bus.publish(opened());
        bus.publish(opened());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_counts_observers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(opened()), 0);

        bus.subscribe(EventFilter::All, |_| {});
        let _receiver = bus.receiver();
        assert_eq!(bus.publish(opened()), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::with_config(EventBusConfig {
            history_capacity: 5,
            ..Default::default()
        });
        for i in 0..10 {
            bus.publish(status(i));
        }

        let recent = bus.recent(usize::MAX);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0], status(5));
        assert_eq!(bus.recent(2), vec![status(8), status(9)]);

        bus.clear_history();
        assert!(bus.recent(10).is_empty());
    }

    #[test]
    fn test_history_disabled_by_default() {
        let bus = EventBus::new();
        bus.publish(status(1));
        assert!(bus.recent(10).is_empty());
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        bus.publish(opened());

        match receiver.recv().await {
            Ok(AppEvent::Connection(ConnectionEvent::Opened { port, .. })) => {
                assert_eq!(port, "/dev/ttyUSB0")
            }
            other => panic!("Wrong event received: {:?}", other),
        }
    }
}
