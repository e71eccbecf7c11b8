//! holyrig-rpc: the JSON-RPC 2.0 over UDP surface.
//!
//! Each datagram carries one envelope. Four operations are exposed
//! (`list_rigs`, `get_capabilities`, `execute_command`,
//! `subscribe_status`, plus the matching `unsubscribe_status`), and
//! subscribed clients receive `status_update` and
//! `device_connected`/`device_disconnected` notifications pushed to their
//! address over the same socket.

pub mod error;
pub mod server;
pub mod types;

pub use error::RpcError;
pub use server::RpcServer;
pub use types::{Notification, Request, RequestId, Response};
