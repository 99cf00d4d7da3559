//! Receive parser - rebuilds frames one byte at a time
//!
//! Fed from the transport's receive context. Tracks where in
//! `[length][command][payload][crc32 LE]` the next byte belongs and checks
//! the checksum before a frame is handed out.

use tracing::trace;

use crate::contracts::{Frame, LENGTH_OVERHEAD};
use crate::crc::Crc32;
use crate::errors::{BridgeError, Result};
use crate::MAX_FRAME_PAYLOAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Next byte is a length field
    Idle,
    /// Next byte is the command byte
    GotLength,
    /// Collecting payload bytes
    GotCommand,
    /// Collecting the four checksum bytes
    GotPayload,
}

/// Byte-at-a-time frame parser, fed from the transport's receive context.
///
/// Payload bytes are staged in a scratch buffer and only handed out once the
/// checksum matches, so a rejected frame never touches the ring buffer.
pub struct Receiver {
    state: RxState,
    length: u8,
    /// Bytes of the current frame consumed so far, length byte included
    count: usize,
    command: u8,
    payload: [u8; MAX_FRAME_PAYLOAD],
    payload_len: usize,
    crc: Crc32,
    rx_crc: u32,
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            state: RxState::Idle,
            length: 0,
            count: 0,
            command: 0,
            payload: [0; MAX_FRAME_PAYLOAD],
            payload_len: 0,
            crc: Crc32::new(),
            rx_crc: 0,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.count = 0;
    }

    fn declared_payload(&self) -> usize {
        (self.length - LENGTH_OVERHEAD) as usize
    }

    /// Feed one received byte.
    ///
    /// Returns the frame completed by this byte, if any. A completed frame
    /// whose checksum does not match yields `IntegrityFailure`; the parser is
    /// back in `Idle` either way.
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame<'_>>> {
        self.count += 1;

        match self.state {
            RxState::Idle => {
                if byte < LENGTH_OVERHEAD {
                    // Cannot start a frame, resync on the next byte
                    trace!(byte, "skipping implausible length byte");
                    self.count = 0;
                    return Ok(None);
                }
                self.length = byte;
                self.payload_len = 0;
                self.rx_crc = 0;
                self.crc.reset();
                self.crc.update_byte(byte);
                self.state = RxState::GotLength;
            }
            RxState::GotLength => {
                self.command = byte;
                self.crc.update_byte(byte);
                self.state = if self.declared_payload() > 0 {
                    RxState::GotCommand
                } else {
                    RxState::GotPayload
                };
            }
            RxState::GotCommand => {
                self.payload[self.payload_len] = byte;
                self.payload_len += 1;
                self.crc.update_byte(byte);
                if self.payload_len == self.declared_payload() {
                    self.state = RxState::GotPayload;
                }
            }
            RxState::GotPayload => {
                let index = self.count - 3 - self.payload_len;
                self.rx_crc |= (byte as u32) << (8 * index);

                if self.count == self.length as usize + 1 {
                    self.state = RxState::Idle;
                    self.count = 0;

                    let expected = self.crc.value();
                    if self.rx_crc != expected {
                        return Err(BridgeError::IntegrityFailure {
                            expected,
                            actual: self.rx_crc,
                        });
                    }

                    trace!(command = self.command, len = self.payload_len, "frame complete");
                    return Ok(Some(Frame::new(
                        self.command,
                        &self.payload[..self.payload_len],
                    )));
                }
            }
        }

        Ok(None)
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Command, MAX_FRAME_LEN};
    use crate::transmitter::Transmitter;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn encode(command: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = [0u8; MAX_FRAME_LEN];
        let len = Transmitter::encode(command, payload, &mut out).unwrap();
        out[..len].to_vec()
    }

    /// Feed bytes, collecting owned copies of completed frames and error count
    fn feed(rx: &mut Receiver, bytes: &[u8]) -> (Vec<(u8, Vec<u8>)>, usize) {
        let mut frames = Vec::new();
        let mut errors = 0;
        for &byte in bytes {
            match rx.push(byte) {
                Ok(Some(frame)) => frames.push((frame.command_byte, frame.payload.to_vec())),
                Ok(None) => {}
                Err(_) => errors += 1,
            }
        }
        (frames, errors)
    }

    #[test]
    fn test_state_progression() {
        let mut rx = Receiver::new();
        let wire = encode(Command::Publish.with_flag(true), b"ab");

        assert_eq!(rx.state(), RxState::Idle);
        rx.push(wire[0]).unwrap();
        assert_eq!(rx.state(), RxState::GotLength);
        rx.push(wire[1]).unwrap();
        assert_eq!(rx.state(), RxState::GotCommand);
        rx.push(wire[2]).unwrap();
        assert_eq!(rx.state(), RxState::GotCommand);
        rx.push(wire[3]).unwrap();
        assert_eq!(rx.state(), RxState::GotPayload);
        for &byte in &wire[4..7] {
            assert!(rx.push(byte).unwrap().is_none());
        }
        let frame = rx.push(wire[7]).unwrap().unwrap();
        assert_eq!(frame.command(), Some(Command::Publish));
        assert!(frame.flag());
        assert_eq!(frame.payload, b"ab");
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn test_empty_payload_skips_streaming() {
        let mut rx = Receiver::new();
        let wire = encode(Command::ConnectAck.with_flag(false), &[]);

        rx.push(wire[0]).unwrap();
        rx.push(wire[1]).unwrap();
        assert_eq!(rx.state(), RxState::GotPayload);

        let (frames, errors) = feed(&mut rx, &wire[2..]);
        assert_eq!(errors, 0);
        assert_eq!(frames, vec![(1, vec![])]);
    }

    #[test]
    fn test_random_payloads_parse_back() {
        let mut rng = StdRng::seed_from_u64(0x5e71);
        let mut rx = Receiver::new();

        for _ in 0..200 {
            let len = rng.gen_range(0..=MAX_FRAME_PAYLOAD);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let command = Command::Publish.with_flag(rng.gen());

            let (frames, errors) = feed(&mut rx, &encode(command, &payload));
            assert_eq!(errors, 0);
            assert_eq!(frames, vec![(command, payload)]);
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut rx = Receiver::new();
        let mut wire = encode(Command::Publish.with_flag(false), b"first");
        wire.extend(encode(Command::Ack.with_flag(true), &[]));
        wire.extend(encode(Command::Publish.with_flag(true), b"second"));

        let (frames, errors) = feed(&mut rx, &wire);
        assert_eq!(errors, 0);
        assert_eq!(
            frames,
            vec![
                (0x03, b"first".to_vec()),
                (0x84, vec![]),
                (0x83, b"second".to_vec()),
            ]
        );
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        let payload = b"integrity matters";
        let wire = encode(Command::Publish.with_flag(false), payload);

        // Length byte flips move the frame boundary; see the next test
        for byte_index in 1..wire.len() {
            for bit in 0..8 {
                let mut corrupted = wire.clone();
                corrupted[byte_index] ^= 1 << bit;

                let mut rx = Receiver::new();
                let (frames, errors) = feed(&mut rx, &corrupted);
                assert!(frames.is_empty(), "byte {byte_index} bit {bit} accepted");
                assert_eq!(errors, 1);
                assert_eq!(rx.state(), RxState::Idle);
            }
        }
    }

    #[test]
    fn test_length_bit_flips_never_deliver() {
        let payload = b"integrity matters";
        let wire = encode(Command::Publish.with_flag(false), payload);

        for bit in 0..8 {
            let mut corrupted = wire.clone();
            corrupted[0] ^= 1 << bit;

            let mut rx = Receiver::new();
            let (frames, _) = feed(&mut rx, &corrupted);
            assert!(frames.is_empty(), "length bit {bit} accepted");

            // Padding completes whatever frame the bad length opened
            let (frames, _) = feed(&mut rx, &[0u8; MAX_FRAME_LEN]);
            assert!(frames.is_empty(), "length bit {bit} accepted after padding");
            assert_eq!(rx.state(), RxState::Idle);
        }
    }

    #[test]
    fn test_resyncs_after_corrupted_frame() {
        let mut rx = Receiver::new();
        let mut bad = encode(Command::Publish.with_flag(false), b"lost");
        bad[3] ^= 0x10;
        let good = encode(Command::Publish.with_flag(false), b"kept");

        let (frames, errors) = feed(&mut rx, &[bad, good].concat());
        assert_eq!(errors, 1);
        assert_eq!(frames, vec![(0x03, b"kept".to_vec())]);
    }

    #[test]
    fn test_noise_below_minimum_length_is_skipped() {
        let mut rx = Receiver::new();
        let mut wire = vec![0x00, 0x04, 0x01];
        wire.extend(encode(Command::ConnectAck.with_flag(false), &[]));

        let (frames, errors) = feed(&mut rx, &wire);
        assert_eq!(errors, 0);
        assert_eq!(frames, vec![(0x01, vec![])]);
    }

    #[test]
    fn test_checksum_mismatch_reports_both_values() {
        let mut rx = Receiver::new();
        let mut wire = encode(Command::Ack.with_flag(false), &[]);
        let expected = u32::from_le_bytes([wire[2], wire[3], wire[4], wire[5]]);
        wire[5] ^= 0x80;

        let mut result = Ok(None);
        for &byte in &wire {
            result = rx.push(byte).map(|frame| frame.map(|_| ()));
        }
        assert_eq!(
            result,
            Err(BridgeError::IntegrityFailure {
                expected,
                actual: expected ^ 0x8000_0000,
            })
        );
    }
}
