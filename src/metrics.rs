//! Link counters shared by the application, receive and timer contexts.
//!
//! Updated with relaxed atomics; [`LinkMetrics`] is a point-in-time copy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one client, updated from every context
#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    retransmissions: AtomicU64,
    integrity_failures: AtomicU64,
    duplicates: AtomicU64,
    backpressure_drops: AtomicU64,
    skipped_sends: AtomicU64,
    bytes_delivered: AtomicU64,
}

impl Counters {
    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn backpressure_drop(&self) {
        self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skipped_send(&self) {
        self.skipped_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self, len: usize) {
        self.bytes_delivered.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LinkMetrics {
        LinkMetrics {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
            skipped_sends: self.skipped_sends.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    /// Frames put on the line, retransmissions included
    pub frames_sent: u64,

    /// Frames that passed the checksum
    pub frames_received: u64,

    /// PUBLISH frames sent again after a timeout
    pub retransmissions: u64,

    /// Frames dropped on checksum mismatch
    pub integrity_failures: u64,

    /// Data frames acknowledged but not delivered again
    pub duplicates: u64,

    /// Data frames withheld because the ring buffer was full
    pub backpressure_drops: u64,

    /// ACKs and retransmissions not sent because the line was busy or short
    pub skipped_sends: u64,

    /// Payload bytes committed to the ring buffer
    pub bytes_delivered: u64,
}
