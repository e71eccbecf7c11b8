//! Serial port transport for rig communication.
//!
//! Most transceivers connect over USB and present as virtual serial ports.
//! Line parameters vary by manufacturer (4800 8N2 on older Yaesu rigs,
//! 115200 8N1 on current Icom models), so everything comes from the rig's
//! [`RigSettings`] rather than hard-wired defaults.
//!
//! RTS and DTR deserve care: many radios route them to PTT and CW key
//! inputs, so the configured levels are applied immediately after opening
//! the port, before any frame is exchanged.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use holyrig_core::{Connector, DataBits, Error, Parity, Result, RigSettings, StopBits, Transport};

/// Serial port transport for one rig.
pub struct SerialTransport {
    /// The underlying serial port stream. `None` after close.
    port: Option<SerialStream>,
    /// Port path kept for logging.
    port_name: String,
}

impl SerialTransport {
    /// Open the serial port described by `settings` and apply the
    /// configured RTS/DTR levels.
    pub async fn open(settings: &RigSettings) -> Result<Self> {
        tracing::debug!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            data_bits = ?settings.data_bits,
            stop_bits = ?settings.stop_bits,
            parity = ?settings.parity,
            "opening serial port"
        );

        let mut stream = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(match settings.data_bits {
                DataBits::Five => tokio_serial::DataBits::Five,
                DataBits::Six => tokio_serial::DataBits::Six,
                DataBits::Seven => tokio_serial::DataBits::Seven,
                DataBits::Eight => tokio_serial::DataBits::Eight,
            })
            .stop_bits(match settings.stop_bits {
                StopBits::One => tokio_serial::StopBits::One,
                StopBits::Two => tokio_serial::StopBits::Two,
            })
            .parity(match settings.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            })
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %settings.port, error = %e, "failed to open serial port");
                Error::Config(format!("failed to open serial port {}: {e}", settings.port))
            })?;

        // Applied before the first frame: a wrong level here can key the
        // transmitter.
        if let Err(e) = stream.write_request_to_send(settings.rts) {
            tracing::warn!(port = %settings.port, error = %e, "failed to set RTS");
        }
        if let Err(e) = stream.write_data_terminal_ready(settings.dtr) {
            tracing::warn!(port = %settings.port, error = %e, "failed to set DTR");
        }

        tracing::info!(port = %settings.port, baud_rate = settings.baud_rate, "serial port open");

        Ok(Self {
            port: Some(stream),
            port_name: settings.port.clone(),
        })
    }

    /// The port path this transport was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Broken pipes mean the USB adapter went away; everything else is a
/// plain I/O failure.
fn map_io_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::BrokenPipe || e.kind() == std::io::ErrorKind::NotConnected {
        Error::ConnectionLost
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), data = ?data, "sending");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "write failed");
            map_io_error(e)
        })?;
        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "flush failed");
            Error::Io(e)
        })?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, data = ?&buf[..n], "received");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "read failed");
                Err(map_io_error(e))
            }
            Err(_) => {
                tracing::trace!(
                    port = %self.port_name,
                    timeout_ms = timeout.as_millis(),
                    "read timed out"
                );
                Err(Error::Timeout)
            }
        }
    }

    async fn set_rts(&mut self, level: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.write_request_to_send(level)
            .map_err(|e| Error::Protocol(format!("failed to set RTS: {e}")))
    }

    async fn set_dtr(&mut self, level: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.write_data_terminal_ready(level)
            .map_err(|e| Error::Protocol(format!("failed to set DTR: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "closing serial port");
            if let Err(e) = port.flush().await {
                tracing::warn!(port = %self.port_name, error = %e, "flush before close failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

/// [`Connector`] that reopens the serial port from stored settings.
///
/// The rig runtime holds one of these so reconnection cycles can
/// re-establish the channel without knowing about serial ports.
pub struct SerialConnector {
    settings: RigSettings,
}

impl SerialConnector {
    /// Build a connector for the given rig settings.
    pub fn new(settings: RigSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport::open(&self.settings).await?))
    }
}
