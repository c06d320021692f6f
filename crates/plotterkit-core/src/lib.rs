//! # PlotterKit Core
//!
//! Core types, errors and events shared by the PlotterKit crates.
//! Provides the geometry primitives of the drawing pipeline, the error
//! taxonomy and the notification bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod program;

pub use data::{polyline_length, Bounds, Path, Point, Position};

pub use error::{DeviceError, Error, InputError, Precondition, QueueError, Result};

pub use event_bus::{
    AppEvent, ConnectionEvent, DisconnectReason, EventBus, EventBusConfig, EventCategory,
    EventFilter, JobEvent, QueueEvent, QueueSummary, StreamDispatcher, StreamEvent,
    SubscriptionId,
};
