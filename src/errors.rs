//! Error types for serial bridge link operations
//!
//! Covers every failure mode between the application and the serial line:
//! - Framing violations caught before anything reaches the wire
//! - Handshake and destination-encoding failures
//! - Transport stalls and I/O errors
//! - Integrity violations on the receive path (never surfaced to readers)
//! - Retransmission exhaustion
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for bridge link operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge link error enumeration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Payload rejected before send - does not fit one frame
    #[error("Framing error: payload of {len} bytes exceeds the {max} byte frame limit")]
    Framing { len: usize, max: usize },

    /// Connect handshake saw no CONNECT_ACK within the inactivity window
    #[error("Connect handshake timed out after {0:?}")]
    Timeout(Duration),

    /// Hostname longer than a CONNECT frame can carry
    #[error("Hostname truncated: {len} bytes exceeds the {max} byte limit")]
    Truncated { len: usize, max: usize },

    /// Transport send capacity never materialized
    #[error("Link failure: no transmit capacity for {0:?}")]
    LinkFailure(Duration),

    /// Frame checksum mismatch on the receive path
    #[error("Integrity check failed: expected CRC32 {expected:#010x}, got {actual:#010x}")]
    IntegrityFailure { expected: u32, actual: u32 },

    /// Connection torn down after the retransmission ceiling was hit
    #[error("Maximum retransmission attempts exceeded")]
    RetryExhausted,

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// Transport reported an I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
