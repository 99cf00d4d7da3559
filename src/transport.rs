//! Byte transport seam between the protocol and the serial line.
//!
//! The protocol only needs four things from the line: how many bytes it can
//! accept right now, a byte write, a draining flush, and a per-byte receive
//! callback invoked from the line's own receive context.
//!
//! [`MemoryPort`] is an in-memory serial pair. Each direction is a crossbeam
//! channel drained by a delivery thread that plays the part of the UART
//! receive interrupt.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, trace};

use crate::contracts::MAX_FRAME_LEN;
use crate::lock;

/// Per-byte receive callback, run in the transport's receive context
pub type RxCallback = Box<dyn FnMut(u8) + Send + 'static>;

/// Byte-oriented serial line
pub trait ByteTransport: Send + Sync {
    /// Bytes that can be written right now without blocking
    fn available_for_write(&self) -> usize;

    /// Queue one byte for transmission
    ///
    /// Callers check [`available_for_write`](Self::available_for_write) first;
    /// writing into a full line may fail with `WouldBlock`.
    fn write_byte(&self, byte: u8) -> io::Result<()>;

    /// Block until every queued byte has left the line
    fn flush(&self) -> io::Result<()>;

    /// Register the callback fed with every received byte
    fn attach_receiver(&self, on_byte: RxCallback);
}

impl<T: ByteTransport + ?Sized> ByteTransport for Arc<T> {
    fn available_for_write(&self) -> usize {
        (**self).available_for_write()
    }

    fn write_byte(&self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }

    fn attach_receiver(&self, on_byte: RxCallback) {
        (**self).attach_receiver(on_byte)
    }
}

/// Default transmit buffer of a [`MemoryPort`]: room for one full frame, so
/// the receive and timer contexts never find the line too short for a resend
pub const DEFAULT_PORT_CAPACITY: usize = MAX_FRAME_LEN;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// One end of an in-memory serial line
pub struct MemoryPort {
    outgoing: Sender<u8>,
    /// Bytes written by us, not yet delivered to the peer's callback
    outgoing_pending: Arc<AtomicUsize>,
    incoming: Mutex<Option<Receiver<u8>>>,
    incoming_pending: Arc<AtomicUsize>,
    callback: Arc<Mutex<Option<RxCallback>>>,
    capacity: usize,
}

impl MemoryPort {
    /// Create two connected ports, each buffering up to `capacity` unsent bytes
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        let a_to_b = Arc::new(AtomicUsize::new(0));
        let b_to_a = Arc::new(AtomicUsize::new(0));

        let a = Self::new(a_tx, Arc::clone(&a_to_b), a_rx, Arc::clone(&b_to_a), capacity);
        let b = Self::new(b_tx, b_to_a, b_rx, a_to_b, capacity);
        (a, b)
    }

    fn new(
        outgoing: Sender<u8>,
        outgoing_pending: Arc<AtomicUsize>,
        incoming: Receiver<u8>,
        incoming_pending: Arc<AtomicUsize>,
        capacity: usize,
    ) -> Self {
        Self {
            outgoing,
            outgoing_pending,
            incoming: Mutex::new(Some(incoming)),
            incoming_pending,
            callback: Arc::new(Mutex::new(None)),
            capacity,
        }
    }

    /// Bytes written on this end that the peer has not consumed yet
    pub fn pending(&self) -> usize {
        self.outgoing_pending.load(Ordering::Acquire)
    }

    fn spawn_delivery(&self, incoming: Receiver<u8>) {
        let callback = Arc::clone(&self.callback);
        let pending = Arc::clone(&self.incoming_pending);

        let spawned = thread::Builder::new()
            .name("memory-port-rx".into())
            .spawn(move || {
                // Ends once the writing port is dropped
                for byte in incoming.iter() {
                    let mut slot = lock(&callback);
                    if let Some(on_byte) = slot.as_mut() {
                        on_byte(byte);
                    }
                    drop(slot);
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                trace!("memory port delivery thread finished");
            });

        if let Err(err) = spawned {
            error!(%err, "failed to start memory port delivery thread");
        }
    }
}

impl ByteTransport for MemoryPort {
    fn available_for_write(&self) -> usize {
        self.capacity.saturating_sub(self.pending())
    }

    fn write_byte(&self, byte: u8) -> io::Result<()> {
        if self.pending() >= self.capacity {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "transmit buffer full"));
        }

        self.outgoing_pending.fetch_add(1, Ordering::AcqRel);
        self.outgoing.send(byte).map_err(|_| {
            self.outgoing_pending.fetch_sub(1, Ordering::AcqRel);
            io::Error::new(io::ErrorKind::BrokenPipe, "peer port dropped")
        })
    }

    fn flush(&self) -> io::Result<()> {
        let deadline = Instant::now() + FLUSH_TIMEOUT;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "line did not drain"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn attach_receiver(&self, on_byte: RxCallback) {
        *lock(&self.callback) = Some(on_byte);

        let incoming = lock(&self.incoming).take();
        if let Some(incoming) = incoming {
            self.spawn_delivery(incoming);
        }
    }
}
