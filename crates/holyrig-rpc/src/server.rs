//! The UDP JSON-RPC server.
//!
//! One socket serves every client. Each datagram is parsed, dispatched,
//! and answered with a single response datagram to the sender. Clients
//! that subscribe to status updates are remembered by address: each
//! subscription installs a [`UdpSink`] that pushes `status_update` and
//! `device_connected`/`device_disconnected` notifications back to the
//! subscriber's address over the same socket.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use holyrig_core::Result;
use holyrig_engine::{Dispatcher, Outbound, StatusSink};

use crate::error::RpcError;
use crate::types::{Notification, Request, RequestId, Response};

/// Largest accepted request datagram.
const MAX_DATAGRAM: usize = 8192;

/// The JSON-RPC over UDP front end.
pub struct RpcServer {
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
}

impl RpcServer {
    /// Bind the server socket.
    pub async fn bind(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(addr = %socket.local_addr()?, "JSON-RPC UDP server listening");
        Ok(Self {
            socket: Arc::new(socket),
            dispatcher,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve datagrams until the socket fails.
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let response = self.handle_datagram(&buf[..len], peer).await;
            match serde_json::to_vec(&response) {
                Ok(bytes) => {
                    if let Err(err) = self.socket.send_to(&bytes, peer).await {
                        warn!(%peer, error = %err, "failed to send response");
                    }
                }
                Err(err) => warn!(%peer, error = %err, "failed to serialize response"),
            }
        }
    }

    /// Parse and dispatch one datagram.
    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr) -> Response {
        // Distinguish not-JSON from JSON that is not a request envelope.
        let raw: Value = match serde_json::from_slice(data) {
            Ok(raw) => raw,
            Err(_) => return Response::failure(RequestId::Null, RpcError::parse_error()),
        };
        let request: Request = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(_) => return Response::failure(RequestId::Null, RpcError::invalid_request()),
        };

        debug!(%peer, method = %request.method, "request");
        let id = request.id.clone();
        match self.handle_request(&request, peer).await {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::failure(id, error),
        }
    }

    async fn handle_request(
        &self,
        request: &Request,
        peer: SocketAddr,
    ) -> std::result::Result<Value, RpcError> {
        match request.method.as_str() {
            "list_rigs" => {
                let rigs = self.dispatcher.list_rigs();
                Ok(serde_json::to_value(rigs).map_err(|_| RpcError::internal_error())?)
            }

            "get_capabilities" => {
                let rig_id = param_str(request, "rig_id")?;
                let capabilities = self.dispatcher.capabilities(rig_id)?;
                Ok(serde_json::to_value(capabilities).map_err(|_| RpcError::internal_error())?)
            }

            "execute_command" => {
                let rig_id = param_str(request, "rig_id")?;
                let command = param_str(request, "command")?;
                let empty = serde_json::Map::new();
                let parameters = request
                    .params_object()
                    .and_then(|params| params.get("parameters"))
                    .map(|raw| {
                        raw.as_object().ok_or_else(|| {
                            RpcError::invalid_params("parameters must be an object")
                        })
                    })
                    .transpose()?
                    .unwrap_or(&empty);

                self.dispatcher.execute(rig_id, command, parameters).await?;
                Ok(json!({"success": true}))
            }

            "subscribe_status" => {
                let rig_id = param_str(request, "rig_id")?;
                let fields: Vec<String> = request
                    .params_object()
                    .and_then(|params| params.get("fields"))
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|_| RpcError::invalid_params("fields must be a string array"))?
                    .unwrap_or_default();

                let sink = Arc::new(UdpSink {
                    socket: Arc::clone(&self.socket),
                    peer,
                });
                let subscription_id = self.dispatcher.subscribe(rig_id, &fields, sink)?;
                Ok(json!({"subscription_id": subscription_id}))
            }

            "unsubscribe_status" => {
                let subscription_id = param_str(request, "subscription_id")?;
                if self.dispatcher.unsubscribe(subscription_id) {
                    Ok(json!({"success": true}))
                } else {
                    Err(RpcError::new(
                        RpcError::SUBSCRIPTION_ERROR,
                        format!("unknown subscription: {subscription_id}"),
                    ))
                }
            }

            _ => Err(RpcError::method_not_found()),
        }
    }
}

/// Fetch a required string member from the request params.
fn param_str<'r>(request: &'r Request, name: &str) -> std::result::Result<&'r str, RpcError> {
    request
        .params_object()
        .and_then(|params| params.get(name))
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("missing parameter: {name}")))
}

/// Pushes notifications to one subscriber's address.
struct UdpSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl StatusSink for UdpSink {
    async fn deliver(&self, outbound: Outbound) -> Result<()> {
        let note = match outbound {
            Outbound::Status {
                rig_id,
                subscription_id,
                updates,
            } => {
                let updates: serde_json::Map<String, Value> = updates
                    .iter()
                    .map(|(field, value)| (field.clone(), value.into()))
                    .collect();
                Notification::new(
                    "status_update",
                    json!({
                        "rig_id": rig_id,
                        "subscription_id": subscription_id,
                        "updates": updates,
                    }),
                )
            }
            Outbound::Link {
                rig_id,
                subscription_id,
                connected,
            } => {
                let method = if connected {
                    "device_connected"
                } else {
                    "device_disconnected"
                };
                Notification::new(
                    method,
                    json!({
                        "rig_id": rig_id,
                        "subscription_id": subscription_id,
                    }),
                )
            }
        };

        let bytes = serde_json::to_vec(&note)
            .map_err(|e| holyrig_core::Error::Protocol(format!("notification encoding: {e}")))?;
        self.socket.send_to(&bytes, self.peer).await?;
        Ok(())
    }
}
