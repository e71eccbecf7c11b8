//! Scripted mock transport.
//!
//! [`MockTransport`] plays back an ordered script of exchanges: each entry
//! names the exact frame the engine is expected to send and the bytes the
//! "radio" answers with. A [`Reply::Silence`] entry answers nothing, which
//! the engine observes as a reply timeout -- that is how init-retry and
//! NotResponding transitions are exercised.
//!
//! # Example
//!
//! ```
//! use holyrig_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // Expect a read-frequency poll, answer with 14.250 MHz.
//! mock.expect(
//!     &[0xFE, 0xFE, 0x94, 0xE0, 0x03, 0xFD],
//!     &[0xFE, 0xFE, 0xE0, 0x94, 0x03, 0x00, 0x00, 0x25, 0x14, 0x00, 0xFD],
//! );
//! // Expect a retry of the same poll, say nothing.
//! mock.expect_silence(&[0xFE, 0xFE, 0x94, 0xE0, 0x03, 0xFD]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use holyrig_core::{Connector, Error, Result, Transport};

/// What the scripted radio does after a matching frame arrives.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with these bytes.
    Bytes(Vec<u8>),
    /// Answer nothing; the engine sees a reply timeout.
    Silence,
}

#[derive(Debug, Clone)]
struct Exchange {
    expect: Vec<u8>,
    reply: Reply,
}

/// A [`Transport`] driven by a pre-loaded script of exchanges.
///
/// Exchanges are consumed in order. A `send` whose bytes do not match the
/// next expected frame fails the test with a protocol error; a `receive`
/// with no pending reply returns [`Error::Timeout`] immediately, so tests
/// never wait on real time.
#[derive(Debug)]
pub struct MockTransport {
    script: VecDeque<Exchange>,
    /// Reply bytes pending for `receive`, with a cursor for partial reads.
    pending: Option<Vec<u8>>,
    cursor: usize,
    connected: bool,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    /// Create a connected mock with an empty script.
    pub fn new() -> Self {
        MockTransport {
            script: VecDeque::new(),
            pending: None,
            cursor: 0,
            connected: true,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script one exchange: when `request` is sent, answer with `reply`.
    pub fn expect(&mut self, request: &[u8], reply: &[u8]) {
        self.script.push_back(Exchange {
            expect: request.to_vec(),
            reply: Reply::Bytes(reply.to_vec()),
        });
    }

    /// Script a dead-air exchange: accept `request`, answer nothing.
    pub fn expect_silence(&mut self, request: &[u8]) {
        self.script.push_back(Exchange {
            expect: request.to_vec(),
            reply: Reply::Silence,
        });
    }

    /// A shared handle to the log of every frame sent through this mock.
    ///
    /// The handle stays valid after the transport has been boxed and moved
    /// into a rig task.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }

    /// Exchanges not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Force the connected state, for exercising `NotConnected` paths.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent.lock().unwrap().push(data.to_vec());

        let Some(exchange) = self.script.pop_front() else {
            return Err(Error::Protocol(format!(
                "unexpected frame, script is exhausted: {data:02X?}"
            )));
        };
        if data != exchange.expect.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected frame: expected {:02X?}, got {data:02X?}",
                exchange.expect
            )));
        }

        self.pending = match exchange.reply {
            Reply::Bytes(bytes) => Some(bytes),
            Reply::Silence => None,
        };
        self.cursor = 0;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let Some(reply) = &self.pending else {
            return Err(Error::Timeout);
        };
        let remaining = &reply[self.cursor..];
        if remaining.is_empty() {
            self.pending = None;
            self.cursor = 0;
            return Err(Error::Timeout);
        }

        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        if self.cursor >= reply.len() {
            self.pending = None;
            self.cursor = 0;
        }
        Ok(n)
    }

    async fn set_rts(&mut self, _level: bool) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn set_dtr(&mut self, _level: bool) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending = None;
        self.cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// A [`Connector`] that hands out pre-scripted transports, one per
/// connection attempt.
///
/// The reconnection path is tested by queueing one transport whose script
/// fails init and a second whose script succeeds.
pub struct MockConnector {
    transports: Mutex<VecDeque<MockTransport>>,
}

impl MockConnector {
    /// Build a connector that yields the given transports in order.
    pub fn new(transports: Vec<MockTransport>) -> Self {
        Self {
            transports: Mutex::new(transports.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        self.transports
            .lock()
            .unwrap()
            .pop_front()
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .ok_or(Error::NotConnected)
    }
}
