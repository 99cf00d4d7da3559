//! Connection lifecycle and inbound frame dispatch.
//!
//! A [`Connection`] owns everything one logical session mutates from several
//! contexts: the state machine, both sequence bits (via [`AckManager`] for the
//! send side), and the receive ring buffer. It performs no I/O; the client
//! keeps it behind a lock and carries out the returned [`Reaction`].
//!
//! ```text
//! Disconnected --connect()--> Connecting --CONNECT_ACK--> Connected
//!      ^                          |                           |
//!      +------- timeout ----------+                           |
//!      +------ stop() | peer DISCONNECT | retries exhausted --+
//! ```

use tracing::{debug, info, warn};

use crate::ack_manager::{AckManager, HeldFrame, RetransmitDecision};
use crate::contracts::{Command, Frame};
use crate::errors::{BridgeError, Result};
use crate::ring_buffer::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session; initial state
    #[default]
    Disconnected,
    /// CONNECT sent, waiting for CONNECT_ACK
    Connecting,
    /// Session established, data may flow
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Why the last session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Local `stop()`
    Stopped,
    /// Bridge sent DISCONNECT
    PeerDisconnect,
    /// Retransmission ceiling reached
    RetryExhausted,
}

/// Outcome of dispatching one validated frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Frame had no effect
    Ignored,
    /// Handshake completed
    Established,
    /// Bridge closed the session
    PeerClosed,
    /// New data committed; acknowledge with this sequence bit
    Delivered { seq: bool, len: usize },
    /// Retransmission of already delivered data; acknowledge again
    Duplicate { seq: bool },
    /// New data that does not fit the ring; withheld so the bridge resends
    Backpressure { len: usize },
    /// The in-flight frame was acknowledged
    Acknowledged,
}

pub struct Connection {
    state: ConnectionState,
    expected_rx_seq: bool,
    acks: AckManager,
    ring: RingBuffer,
    last_teardown: Option<Teardown>,
    /// Bumped on every teardown so waiters can tell their session ended
    epoch: u64,
}

impl Connection {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            expected_rx_seq: false,
            acks: AckManager::new(max_retries),
            ring: RingBuffer::new(),
            last_teardown: None,
            epoch: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn ack_outstanding(&self) -> bool {
        self.acks.ack_outstanding()
    }

    pub fn retry_count(&self) -> u32 {
        self.acks.retry_count()
    }

    pub fn tx_sequence(&self) -> bool {
        self.acks.tx_sequence()
    }

    pub fn expected_rx_sequence(&self) -> bool {
        self.expected_rx_seq
    }

    pub fn last_teardown(&self) -> Option<Teardown> {
        self.last_teardown
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }

    fn clear_session(&mut self) {
        self.expected_rx_seq = false;
        self.acks.reset();
        self.ring.clear();
    }

    /// Start a fresh handshake, tearing down any session still open
    ///
    /// Returns the state the connection was in.
    pub fn begin_connect(&mut self) -> ConnectionState {
        let previous = self.state;
        if previous != ConnectionState::Disconnected {
            self.teardown(Teardown::Stopped);
        }
        self.clear_session();
        self.state = ConnectionState::Connecting;
        previous
    }

    /// Handshake window elapsed without CONNECT_ACK
    pub fn abandon_connect(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Reset to `Disconnected`, clearing sequence, ack, retry and ring state
    ///
    /// Returns the state the connection was in.
    pub fn teardown(&mut self, reason: Teardown) -> ConnectionState {
        let previous = self.state;
        self.state = ConnectionState::Disconnected;
        self.clear_session();
        self.last_teardown = Some(reason);
        self.epoch += 1;
        if previous != ConnectionState::Disconnected {
            info!(?reason, from = %previous, "connection torn down");
        }
        previous
    }

    /// Hand a chunk to the send side
    ///
    /// # Errors
    /// `NotConnected` unless the session is established; `Framing` for an
    /// oversized chunk
    pub fn begin_publish(&mut self, payload: &[u8]) -> Result<HeldFrame> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        self.acks.begin(payload)
    }

    /// The in-flight frame could not be put on the line
    pub fn abort_publish(&mut self) {
        self.acks.abort();
    }

    /// Retransmission tick; tears the session down once retries run out
    pub fn on_timeout(&mut self) -> RetransmitDecision {
        let decision = self.acks.on_timeout();
        match decision {
            RetransmitDecision::Exhausted => {
                warn!(retries = self.acks.max_retries(), "no acknowledgment, giving up");
                self.teardown(Teardown::RetryExhausted);
            }
            RetransmitDecision::Resend(_) => {
                debug!(attempt = self.acks.retry_count(), "retransmitting");
            }
            RetransmitDecision::Idle => {}
        }
        decision
    }

    /// Dispatch one validated inbound frame
    pub fn on_frame(&mut self, frame: &Frame<'_>) -> Reaction {
        let Some(command) = frame.command() else {
            debug!(code = frame.code(), "ignoring unknown command");
            return Reaction::Ignored;
        };
        let empty = frame.payload.is_empty();

        match command {
            Command::ConnectAck if empty && self.state == ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                info!("connection established");
                Reaction::Established
            }
            Command::Disconnect if empty && self.is_connected() => {
                self.teardown(Teardown::PeerDisconnect);
                Reaction::PeerClosed
            }
            Command::Publish if self.is_connected() => self.on_publish(frame),
            Command::Ack => {
                if self.acks.on_ack(frame.flag()) {
                    Reaction::Acknowledged
                } else {
                    debug!(seq = frame.flag(), "stale acknowledgment");
                    Reaction::Ignored
                }
            }
            _ => Reaction::Ignored,
        }
    }

    fn on_publish(&mut self, frame: &Frame<'_>) -> Reaction {
        let seq = frame.flag();
        if seq != self.expected_rx_seq {
            debug!(seq, "duplicate data frame");
            return Reaction::Duplicate { seq };
        }

        let len = frame.payload.len();
        if self.ring.write_all(frame.payload).is_err() {
            warn!(len, free = self.ring.free(), "receive buffer full, withholding ack");
            return Reaction::Backpressure { len };
        }

        self.expected_rx_seq = !self.expected_rx_seq;
        Reaction::Delivered { seq, len }
    }
}
