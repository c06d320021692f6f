//! # PlotterKit Communication
//!
//! Serial transport and the ack-paced streaming protocol for PlotterKit.
//! A [`DeviceLink`] owns one port, streams motion programs line by line and
//! reports progress and device output through a stream event channel.

pub mod ack;
pub mod auxiliary;
pub mod communication;
pub mod control;
pub mod link;
pub mod recovery;

pub use ack::{AckPredicate, TokenAck};
pub use auxiliary::{AuxiliaryController, AuxiliaryFlag, NoAuxiliary};
pub use communication::{
    serial::{
        is_plotter_port, list_ports, RealSerialPort, SerialPortInfo, SerialPortOpener, UsbDetails,
    },
    virtual_port::{VirtualBehavior, VirtualDevice},
    write_line, ConnectionParams, PortOpener, SerialParity, SerialPort,
};
pub use control::{ControlState, SendControl};
pub use link::{
    is_operator_pause, DeviceLink, DeviceLinkBuilder, LinkConfig, LinkState, StreamSummary,
};
pub use recovery::{recovery_program, PositionTracker, RecoveryPlan, RecoveryPoint};
