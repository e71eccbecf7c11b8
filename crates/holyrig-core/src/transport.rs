//! Transport trait for rig communication.
//!
//! The [`Transport`] trait abstracts over the byte-duplex link to a
//! transceiver. The production implementation wraps a serial port
//! (`holyrig-transport`); tests use the scripted mock from
//! `holyrig-test-harness`. The rig runtime drives a `Transport` directly --
//! it never touches a serial port type.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous byte-level channel to a rig.
///
/// Implementations handle buffering and error mapping at the physical
/// layer. Framing (reply lengths, terminators, validation masks) is the
/// rig runtime's concern.
#[async_trait]
pub trait Transport: Send {
    /// Send raw bytes to the rig.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying channel (serial TX buffer, socket, etc.).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive available bytes from the rig into `buf`.
    ///
    /// Returns the number of bytes read, waiting up to `timeout` for the
    /// first byte. Returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Set the RTS line level. Radios commonly key PTT from this line, so
    /// the runtime asserts the configured level right after opening.
    async fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Set the DTR line level. Radios commonly key CW from this line.
    async fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Close the channel. Subsequent `send`/`receive` calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Whether the channel is currently open.
    fn is_connected(&self) -> bool;
}

/// Factory for (re)opening a rig's transport.
///
/// The runtime owns one of these per rig so it can re-establish the channel
/// during reconnection cycles without knowing what kind of channel it is.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport.
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}
