//! holyrig-engine: the concurrent half of the command engine.
//!
//! Three pieces live here, one task each:
//!
//! - [`rig`] -- the per-rig runtime: state machine, init sequence, command
//!   FIFO, and round-robin status polling over a
//!   [`Transport`](holyrig_core::Transport);
//! - [`dispatcher`] -- routing, parameter coercion, and capability
//!   reflection over the compiled models;
//! - [`subscription`] -- bounded, ordered, per-subscriber fan-out of
//!   status changes.
//!
//! Rig state is never shared: each rig task owns its status vector and
//! publishes immutable snapshots over channels.

pub mod dispatcher;
pub mod exchange;
pub mod rig;
pub mod subscription;

pub use dispatcher::{Capabilities, CommandCapability, Dispatcher};
pub use rig::{spawn as spawn_rig, RigHandle, RigTuning};
pub use subscription::{Outbound, StatusSink, SubscriptionManager};
