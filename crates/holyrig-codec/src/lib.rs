//! holyrig-codec: frame templates and the binary data codec.
//!
//! This crate is the byte-level half of the command engine. It knows how to
//! parse frame patterns (`FEFE94E0.25.??.FD`, `(IF)??????(;)`), how each
//! numeric wire format is laid out ([`DataFormat`]), and how to turn typed
//! parameter bindings into frames and replies back into typed values
//! ([`encode`] / [`decode`]).
//!
//! Everything here is pure data transformation: no I/O, no model file
//! parsing, no async. The model compiler in `holyrig-schema` produces
//! [`FrameTemplate`]s; the rig runtime in `holyrig-engine` feeds them
//! through this codec.

pub mod codec;
pub mod format;
pub mod frame;

pub use codec::{decode, encode, EnumValues, TransformOrder};
pub use format::DataFormat;
pub use frame::{FieldSpec, FramePattern, FrameTemplate, ReplySpec, Slot};
