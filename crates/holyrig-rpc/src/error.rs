//! JSON-RPC error codes and the mapping from engine errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use holyrig_core::Error;

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    // Standard JSON-RPC error codes.
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Server-defined codes for rig operations.
    pub const RIG_COMMUNICATION_ERROR: i32 = -32000;
    pub const INVALID_COMMAND_PARAMS: i32 = -32001;
    pub const SUBSCRIPTION_ERROR: i32 = -32002;
    pub const UNKNOWN_RIG_ID: i32 = -32003;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(Self::INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found() -> Self {
        Self::new(Self::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error() -> Self {
        Self::new(Self::INTERNAL_ERROR, "Internal error")
    }
}

impl From<Error> for RpcError {
    /// Fold an engine error into the wire error space.
    ///
    /// Requests the model cannot satisfy are invalid-command-parameter
    /// errors; anything that stopped an otherwise valid exchange is a rig
    /// communication error.
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::UnsupportedCommand(_)
            | Error::UnsupportedEnumMember { .. }
            | Error::ValueOutOfRange(_)
            | Error::InvalidParameter(_) => Self::INVALID_COMMAND_PARAMS,
            Error::UnknownRig(_) => Self::UNKNOWN_RIG_ID,
            Error::Subscription(_) => Self::SUBSCRIPTION_ERROR,
            Error::Config(_)
            | Error::ReplyValidationFailed(_)
            | Error::UnknownEnumValue { .. }
            | Error::NotImplemented(_)
            | Error::Protocol(_)
            | Error::Timeout
            | Error::RigDisabled
            | Error::NotConnected
            | Error::ConnectionLost
            | Error::Io(_) => Self::RIG_COMMUNICATION_ERROR,
        };
        Self::new(code, err.to_string())
    }
}
