//! holyrig-core: Core traits, types, and error definitions for holyrig.
//!
//! This crate defines the model-agnostic abstractions shared by the rest of
//! the workspace. The schema and model compilers, the codec, the rig runtime,
//! and the RPC surface all depend on these types without pulling in any
//! transport or parser machinery.
//!
//! # Key types
//!
//! - [`Value`] / [`ValueType`] -- the typed parameter and status values
//! - [`Transport`] -- byte-level communication channel to a radio
//! - [`RigState`] / [`StatusEvent`] -- runtime state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod settings;
pub mod transport;
pub mod value;

// Re-export key types at crate root for ergonomic `use holyrig_core::*`.
pub use error::{Error, Result};
pub use events::{LinkEvent, RigState, StatusEvent};
pub use settings::{DataBits, Parity, RigSettings, StopBits};
pub use transport::{Connector, Transport};
pub use value::{Value, ValueType};
