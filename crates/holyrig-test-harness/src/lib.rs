//! holyrig-test-harness: scripted transports for engine tests.
//!
//! Provides [`MockTransport`], a [`Transport`](holyrig_core::Transport)
//! implementation driven by an ordered script of expected frames and canned
//! replies. Engine and codec behavior can be exercised end to end without a
//! radio on the desk.

pub mod mock_serial;

pub use mock_serial::{MockConnector, MockTransport};
