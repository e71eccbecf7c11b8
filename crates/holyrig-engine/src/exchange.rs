//! One request/reply exchange against a transport.
//!
//! The rig runtime never overlaps exchanges: a frame is written, then reply
//! bytes are accumulated until the reply spec is satisfied or the deadline
//! passes. The three delimiting strategies mirror what model files can
//! declare: a fixed byte count, a terminator byte, or a validation mask
//! (whose length is fixed).

use std::time::Duration;

use bytes::BytesMut;
use tokio::time::Instant;

use holyrig_codec::ReplySpec;
use holyrig_core::{Error, Result, Transport};

/// Write `frame` and collect the reply that `spec` describes.
///
/// Returns `Ok(None)` for write-only frames (`spec` absent). The reply
/// bytes are returned unvalidated; the caller decides whether to run them
/// through the codec or just check them against the spec.
pub async fn exchange(
    transport: &mut Box<dyn Transport>,
    frame: &[u8],
    spec: Option<&ReplySpec>,
    timeout: Duration,
) -> Result<Option<Vec<u8>>> {
    transport.send(frame).await?;

    let Some(spec) = spec else {
        return Ok(None);
    };

    let deadline = Instant::now() + timeout;
    let mut acc = BytesMut::with_capacity(64);
    let mut chunk = [0u8; 256];

    loop {
        if let Some(reply) = complete_reply(&mut acc, spec) {
            return Ok(Some(reply));
        }

        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(Error::Timeout)?;
        let n = transport.receive(&mut chunk, remaining).await?;
        if n == 0 {
            return Err(Error::ConnectionLost);
        }
        acc.extend_from_slice(&chunk[..n]);
    }
}

/// If `acc` already holds a complete reply for `spec`, split it off.
fn complete_reply(acc: &mut BytesMut, spec: &ReplySpec) -> Option<Vec<u8>> {
    if let Some(needed) = spec.fixed_length() {
        if acc.len() >= needed {
            return Some(acc.split_to(needed).to_vec());
        }
        return None;
    }
    let ReplySpec::Terminator(end) = spec else {
        return None;
    };
    acc.iter()
        .position(|byte| byte == end)
        .map(|pos| acc.split_to(pos + 1).to_vec())
}
