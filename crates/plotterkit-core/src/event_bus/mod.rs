//! # Event Bus Module
//!
//! Decoupled delivery of link, stream, job and queue events.
//!
//! - `EventBus`: application-wide publish/subscribe with category and per-job
//!   filters, synchronous handlers, async receivers and a bounded history
//! - `StreamDispatcher`: per-link broadcast of raw stream events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plotterkit_core::event_bus::{AppEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Job]),
//!     |event| {
//!         if let AppEvent::Job(job) = event {
//!             println!("{:.0}% {}", job.percent, job.event.description());
//!         }
//!     },
//! );
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod dispatcher;
mod events;

pub use bus::*;
pub use dispatcher::*;
pub use events::*;
