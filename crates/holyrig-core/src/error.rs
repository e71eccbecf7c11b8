//! Error types for holyrig.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, codec-layer, and
//! runtime-layer errors are all captured here; the schema and model
//! compilers have their own span-carrying diagnostics that fold into
//! [`Error::Config`] once rendered.

/// The error type for all holyrig operations.
///
/// Variants cover the failure modes encountered when driving a transceiver
/// from a declarative model: physical transport failures, frame
/// encode/decode errors, timeouts, and requests the loaded model cannot
/// satisfy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A schema or model file failed to compile. Carries the rendered
    /// diagnostic (file, line/column, caret context).
    #[error("configuration error: {0}")]
    Config(String),

    /// The client named a command that the rig's model does not implement.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// The client named an enum member that the rig's model does not map
    /// to a wire value.
    #[error("unsupported enum member: {enum_name}::{member}")]
    UnsupportedEnumMember {
        /// The enum type the member belongs to.
        enum_name: String,
        /// The unmapped member name.
        member: String,
    },

    /// A value cannot be represented in the declared field width/format.
    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    /// A reply byte did not match the fixed positions of a validation mask.
    #[error("reply validation failed: {0}")]
    ReplyValidationFailed(String),

    /// A decoded wire value has no corresponding enum member in the model.
    #[error("unknown value {value} for enum {enum_name}")]
    UnknownEnumValue {
        /// The enum type being decoded.
        enum_name: String,
        /// The raw wire value with no mapping.
        value: u32,
    },

    /// A frame format the codec does not implement yet.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A malformed frame, pattern, or protocol-level inconsistency.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a reply from the rig.
    ///
    /// This typically means the rig is powered off, the baud rate is wrong,
    /// or the model file addresses the wrong device.
    #[error("timeout waiting for reply")]
    Timeout,

    /// The rig has been administratively disabled; no I/O is performed.
    #[error("rig is disabled")]
    RigDisabled,

    /// No connection to the rig has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the rig was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An invalid parameter was supplied for a command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A request named a rig id that is not configured.
    #[error("unknown rig id: {0}")]
    UnknownRig(String),

    /// A malformed subscription request.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
