//! Transmitter module - frame serialization and streaming onto the line
//!
//! Builds `[length][command][payload][crc32 LE]` in a fixed work buffer and
//! streams it through a [`ByteTransport`], waiting for send capacity instead
//! of requiring the whole frame to fit at once.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::contracts::{FRAME_OVERHEAD, LENGTH_OVERHEAD, MAX_FRAME_LEN};
use crate::crc::checksum;
use crate::errors::{BridgeError, Result};
use crate::transport::ByteTransport;
use crate::MAX_FRAME_PAYLOAD;

/// Transmitter - owns the frame work buffer for one serial line
///
/// Not shared between contexts directly: callers serialize access so that
/// frames from different contexts never interleave on the line.
pub struct Transmitter {
    work: [u8; MAX_FRAME_LEN],
    link_timeout: Duration,
}

impl Transmitter {
    /// Create a transmitter that gives up on a stalled line after `link_timeout`
    pub fn new(link_timeout: Duration) -> Self {
        Self {
            work: [0; MAX_FRAME_LEN],
            link_timeout,
        }
    }

    /// Encode one frame into `out`
    ///
    /// # Arguments
    /// * `command` - Command byte, flag bit included
    /// * `payload` - Frame payload, at most [`MAX_FRAME_PAYLOAD`] bytes
    /// * `out` - Destination buffer
    ///
    /// # Returns
    /// Number of bytes of `out` holding the frame
    pub fn encode(command: u8, payload: &[u8], out: &mut [u8; MAX_FRAME_LEN]) -> Result<usize> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(BridgeError::Framing {
                len: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }

        let body_len = 2 + payload.len();
        out[0] = LENGTH_OVERHEAD + payload.len() as u8;
        out[1] = command;
        out[2..body_len].copy_from_slice(payload);

        let crc = checksum(&out[..body_len]);
        out[body_len..body_len + 4].copy_from_slice(&crc.to_le_bytes());

        Ok(payload.len() + FRAME_OVERHEAD)
    }

    /// Frame `payload` and stream it onto `transport`
    ///
    /// Busy-waits for transmit capacity, bounded by the link timeout.
    ///
    /// # Returns
    /// Number of bytes put on the line
    ///
    /// # Errors
    /// - `Framing` for an oversized payload; nothing is sent
    /// - `LinkFailure` if the line accepts no byte for the link timeout
    /// - `Io` if the transport rejects a write
    pub fn send<T: ByteTransport + ?Sized>(
        &mut self,
        transport: &T,
        command: u8,
        payload: &[u8],
    ) -> Result<usize> {
        let frame_len = Self::encode(command, payload, &mut self.work)?;

        let mut written = 0;
        let mut last_progress = Instant::now();
        while written < frame_len {
            let room = transport.available_for_write();
            if room == 0 {
                if last_progress.elapsed() >= self.link_timeout {
                    warn!(written, frame_len, "serial line stalled mid-frame");
                    return Err(BridgeError::LinkFailure(self.link_timeout));
                }
                thread::yield_now();
                continue;
            }

            let chunk_end = (written + room).min(frame_len);
            for &byte in &self.work[written..chunk_end] {
                transport.write_byte(byte)?;
            }
            written = chunk_end;
            last_progress = Instant::now();
        }

        debug!(command, len = payload.len(), "frame sent");
        Ok(frame_len)
    }

    /// Frame `payload` and write it only if the whole frame fits right now
    ///
    /// For the receive and timer contexts, which must never wait on the line.
    ///
    /// # Returns
    /// Bytes put on the line, or `None` if the transport lacked room; nothing
    /// is written in that case
    pub fn try_send<T: ByteTransport + ?Sized>(
        &mut self,
        transport: &T,
        command: u8,
        payload: &[u8],
    ) -> Result<Option<usize>> {
        let frame_len = Self::encode(command, payload, &mut self.work)?;
        if transport.available_for_write() < frame_len {
            return Ok(None);
        }

        for &byte in &self.work[..frame_len] {
            transport.write_byte(byte)?;
        }
        debug!(command, len = payload.len(), "frame sent");
        Ok(Some(frame_len))
    }
}
