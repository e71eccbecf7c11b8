//! JSON-RPC 2.0 envelope types.
//!
//! One datagram carries exactly one envelope. Requests echo their `id` in
//! the response; server-push notifications carry no `id` at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// The protocol version string carried in every envelope.
pub const VERSION: &str = "2.0";

/// A request id: echoed verbatim, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Null,
    Number(i64),
    String(String),
}

/// An incoming request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl Request {
    /// The params as an object, if present and object-shaped.
    pub fn params_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.params.as_ref().and_then(Value::as_object)
    }
}

/// An outgoing response envelope. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

impl Response {
    /// A success response carrying `result`.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// An error response.
    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// A server-push notification envelope (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Notification {
    /// Build a notification for `method` with `params`.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}
