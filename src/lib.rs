//! Serial Bridge Core - reliable byte stream over a serial line
//!
//! **Creator**: Shayan Golmezerji
//! **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
//!
//! A companion bridge process on the far end of the serial line relays the
//! stream to a real TCP connection. This crate is the device side: framing,
//! CRC-32 integrity checking, a byte-at-a-time receive parser, stop-and-wait
//! ARQ with timer-driven retransmission, a fixed receive ring buffer and a
//! socket-like client on top.
//!
//! # Design Principles
//! - One logical connection, one frame in flight
//! - Fixed-size buffers only; nothing allocates on the frame path
//! - The receive and timer contexts never block on the application
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use serial_bridge_core::transport::DEFAULT_PORT_CAPACITY;
//! use serial_bridge_core::{BridgeClient, IntervalTimer, MemoryPort};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (line, _bridge_end) = MemoryPort::pair(DEFAULT_PORT_CAPACITY);
//! let client = BridgeClient::new(line, IntervalTimer::new()?);
//!
//! client.connect(Ipv4Addr::new(10, 0, 0, 5), 9000)?;
//! client.write(b"GET / HTTP/1.0\r\n\r\n")?;
//!
//! let mut reply = [0u8; 256];
//! let n = client.read(&mut reply);
//! # let _ = n;
//! client.stop()?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod ack_manager;
pub mod client;
pub mod connection;
pub mod contracts;
pub mod crc;
pub mod errors;
pub mod metrics;
pub mod receiver;
pub mod ring_buffer;
pub mod timer;
pub mod transmitter;
pub mod transport;

pub use client::{BridgeClient, ClientBuilder};
pub use connection::ConnectionState;
pub use contracts::{Command, Destination, Frame};
pub use errors::{BridgeError, Result};
pub use metrics::LinkMetrics;
pub use timer::{IntervalTimer, PeriodicTimer, TickCallback};
pub use transport::{ByteTransport, MemoryPort, RxCallback};

/// Largest payload a single frame carries (length byte tops out at 255)
pub const MAX_FRAME_PAYLOAD: usize = 250;

/// Largest slice of application data per PUBLISH frame
pub const MAX_PUBLISH_CHUNK: usize = 245;

/// Longest hostname a CONNECT frame carries (plus 2 port bytes)
pub const MAX_HOSTNAME_LEN: usize = 248;

/// Receive ring buffer capacity in bytes
pub const RING_CAPACITY: usize = 256;

/// How long `connect` waits for CONNECT_ACK
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// Retransmission timer period
pub const RETRANSMIT_INTERVAL_MS: u64 = 200;

/// Timeouts after which the connection is torn down
pub const MAX_RETRANSMIT_ATTEMPTS: u32 = 5;

/// How long the framer waits for transport capacity before giving up
pub const DEFAULT_LINK_TIMEOUT_MS: u64 = 1000;

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
