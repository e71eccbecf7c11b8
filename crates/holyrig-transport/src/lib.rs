//! holyrig-transport: the serial port transport.
//!
//! Implements [`Transport`](holyrig_core::Transport) over USB virtual COM
//! ports and physical RS-232 connections via `tokio-serial`. The rig
//! runtime consumes the trait; nothing above this crate knows it is
//! talking to a serial port.

pub mod serial;

pub use serial::{SerialConnector, SerialTransport};
