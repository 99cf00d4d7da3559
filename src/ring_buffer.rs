//! Fixed-capacity circular store for received application bytes.
//!
//! `head` is the next byte to read, `tail` the next write position; `full`
//! disambiguates `head == tail`. Writes never overwrite unread data.

use crate::RING_CAPACITY;

/// Write rejected: no room left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFull;

pub struct RingBuffer<const N: usize = RING_CAPACITY> {
    buf: [u8; N],
    head: usize,
    tail: usize,
    full: bool,
}

impl<const N: usize> RingBuffer<N> {
    pub fn new() -> Self {
        Self {
            buf: [0; N],
            head: 0,
            tail: 0,
            full: false,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    /// Unread bytes, `0..=N`
    pub fn available(&self) -> usize {
        if self.full {
            N
        } else if self.tail >= self.head {
            self.tail - self.head
        } else {
            N - (self.head - self.tail)
        }
    }

    /// Room left for writes
    pub fn free(&self) -> usize {
        N - self.available()
    }

    pub fn write(&mut self, byte: u8) -> Result<(), BufferFull> {
        if self.full {
            return Err(BufferFull);
        }
        self.buf[self.tail] = byte;
        self.tail = (self.tail + 1) % N;
        self.full = self.tail == self.head;
        Ok(())
    }

    /// Append all of `bytes`, or nothing if they do not fit
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        if bytes.len() > self.free() {
            return Err(BufferFull);
        }
        for &byte in bytes {
            self.write(byte)?;
        }
        Ok(())
    }

    pub fn read(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.full = false;
        Some(byte)
    }

    pub fn peek(&self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(self.buf[self.head])
        }
    }

    /// Drain up to `out.len()` bytes, returning how many were copied
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() {
            match self.read() {
                Some(byte) => {
                    out[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }
        copied
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.full = false;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
