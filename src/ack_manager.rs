//! ACK Manager module - stop-and-wait reliability for outbound data
//!
//! Tracks the alternating transmit sequence bit, the single in-flight PUBLISH
//! frame and its retry counter. Purely a state machine: the caller owns the
//! line and the retransmission timer and acts on what this module decides.

use crate::contracts::Command;
use crate::errors::{BridgeError, Result};
use crate::MAX_PUBLISH_CHUNK;

/// Copy of the in-flight frame, kept for verbatim retransmission
#[derive(Clone, Copy)]
pub struct HeldFrame {
    command: u8,
    len: usize,
    bytes: [u8; MAX_PUBLISH_CHUNK],
}

impl HeldFrame {
    fn new(command: u8, payload: &[u8]) -> Self {
        let mut bytes = [0; MAX_PUBLISH_CHUNK];
        bytes[..payload.len()].copy_from_slice(payload);
        Self {
            command,
            len: payload.len(),
            bytes,
        }
    }

    /// Command byte, sequence bit included
    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl std::fmt::Debug for HeldFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldFrame")
            .field("command", &self.command)
            .field("len", &self.len)
            .finish()
    }
}

/// What to do when the retransmission timer fires
#[derive(Debug, Clone, Copy)]
pub enum RetransmitDecision {
    /// Nothing in flight; the timer can be disarmed
    Idle,
    /// Send the held frame again
    Resend(HeldFrame),
    /// Retry ceiling reached; the connection must be torn down
    Exhausted,
}

/// ACK Manager - send-side sequencing for one connection
///
/// At most one frame is in flight; acknowledgments are matched on the single
/// sequence bit alone.
#[derive(Debug)]
pub struct AckManager {
    tx_seq: bool,
    in_flight: Option<HeldFrame>,
    retry_count: u32,
    max_retries: u32,
}

impl AckManager {
    /// Create an idle manager that gives up after `max_retries` timeouts
    pub fn new(max_retries: u32) -> Self {
        Self {
            tx_seq: false,
            in_flight: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Sequence bit the next (or current) PUBLISH carries
    pub fn tx_sequence(&self) -> bool {
        self.tx_seq
    }

    pub fn ack_outstanding(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Take ownership of a new outbound payload
    ///
    /// # Returns
    /// The frame to put on the line
    ///
    /// # Errors
    /// `Framing` if `payload` exceeds one PUBLISH chunk
    pub fn begin(&mut self, payload: &[u8]) -> Result<HeldFrame> {
        debug_assert!(
            self.in_flight.is_none(),
            "begin called while a frame is already in flight"
        );
        if payload.len() > MAX_PUBLISH_CHUNK {
            return Err(BridgeError::Framing {
                len: payload.len(),
                max: MAX_PUBLISH_CHUNK,
            });
        }

        let frame = HeldFrame::new(Command::Publish.with_flag(self.tx_seq), payload);
        self.in_flight = Some(frame);
        self.retry_count = 0;
        Ok(frame)
    }

    /// Process an inbound ACK carrying `seq`
    ///
    /// Returns `true` if it acknowledged the in-flight frame. Acks for an
    /// already-superseded frame are ignored.
    pub fn on_ack(&mut self, seq: bool) -> bool {
        if self.in_flight.is_none() || seq != self.tx_seq {
            return false;
        }
        self.in_flight = None;
        self.tx_seq = !self.tx_seq;
        self.retry_count = 0;
        true
    }

    /// Retransmission timer expired
    pub fn on_timeout(&mut self) -> RetransmitDecision {
        let Some(frame) = self.in_flight else {
            return RetransmitDecision::Idle;
        };

        self.retry_count += 1;
        if self.retry_count >= self.max_retries {
            RetransmitDecision::Exhausted
        } else {
            RetransmitDecision::Resend(frame)
        }
    }

    /// Forget the in-flight frame without consuming its sequence bit
    ///
    /// Used when the first transmission never made it onto the line.
    pub fn abort(&mut self) {
        self.in_flight = None;
        self.retry_count = 0;
    }

    /// Back to the state of a fresh connection
    pub fn reset(&mut self) {
        self.tx_seq = false;
        self.in_flight = None;
        self.retry_count = 0;
    }
}
