//! Wire-level data structures for the serial bridge protocol
//!
//! One frame on the line:
//!
//! ```text
//! [length:1][command:1][payload:0..250][crc32:4 little-endian]
//! ```
//!
//! `length` counts everything after itself (`5 + payload length`), so a whole
//! frame occupies `length + 1` bytes. The command byte carries the command code
//! in its low 7 bits and a flag in the high bit: the sequence bit for
//! PUBLISH/ACK, the hostname selector for CONNECT.
use std::net::SocketAddrV4;

use crate::errors::{BridgeError, Result};
use crate::{MAX_FRAME_PAYLOAD, MAX_HOSTNAME_LEN};

/// Length-byte value of a frame with an empty payload
pub const LENGTH_OVERHEAD: u8 = 5;

/// Bytes on the wire besides the payload (length, command, CRC32)
pub const FRAME_OVERHEAD: usize = 6;

/// Largest encoded frame
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + MAX_FRAME_PAYLOAD;

/// High bit of the command byte
pub const FLAG_BIT: u8 = 0x80;

/// Low 7 bits of the command byte
pub const CODE_MASK: u8 = 0x7F;

/// Protocol command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Ask the bridge to open a TCP connection to a destination
    Connect = 0,
    /// Bridge reports the TCP connection is up
    ConnectAck = 1,
    /// Either side tears the session down
    Disconnect = 2,
    /// Application data
    Publish = 3,
    /// Acknowledges one PUBLISH, echoing its sequence bit
    Ack = 4,
}

impl Command {
    /// Decode a 7-bit command code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Connect),
            1 => Some(Self::ConnectAck),
            2 => Some(Self::Disconnect),
            3 => Some(Self::Publish),
            4 => Some(Self::Ack),
            _ => None,
        }
    }

    /// Build the command byte with the high bit set from `flag`
    pub fn with_flag(self, flag: bool) -> u8 {
        if flag {
            self as u8 | FLAG_BIT
        } else {
            self as u8
        }
    }
}

/// A validated inbound frame, borrowing its payload from the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Raw command byte, flag included
    pub command_byte: u8,

    /// De-framed payload
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(command_byte: u8, payload: &'a [u8]) -> Self {
        Self {
            command_byte,
            payload,
        }
    }

    pub fn code(&self) -> u8 {
        self.command_byte & CODE_MASK
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.code())
    }

    /// Sequence bit (PUBLISH/ACK) or hostname selector (CONNECT)
    pub fn flag(&self) -> bool {
        self.command_byte & FLAG_BIT != 0
    }

    /// Length byte this frame had on the wire
    pub fn encoded_length(&self) -> usize {
        LENGTH_OVERHEAD as usize + self.payload.len()
    }
}

/// Where the bridge should open its TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    /// IPv4 address and port
    Address(SocketAddrV4),

    /// Hostname resolved by the bridge, and port
    Host { name: &'a str, port: u16 },
}

impl<'a> Destination<'a> {
    /// Command byte of the CONNECT frame for this destination
    pub fn command_byte(&self) -> u8 {
        match self {
            Self::Address(_) => Command::Connect.with_flag(false),
            Self::Host { .. } => Command::Connect.with_flag(true),
        }
    }

    /// Encode the CONNECT payload into `out`
    ///
    /// # Returns
    /// Number of payload bytes written
    ///
    /// # Errors
    /// `Truncated` when a hostname exceeds [`MAX_HOSTNAME_LEN`]; nothing is
    /// written in that case.
    pub fn encode(&self, out: &mut [u8; MAX_FRAME_PAYLOAD]) -> Result<usize> {
        match self {
            Self::Address(addr) => {
                out[..4].copy_from_slice(&addr.ip().octets());
                out[4..6].copy_from_slice(&addr.port().to_le_bytes());
                Ok(6)
            }
            Self::Host { name, port } => {
                let name = name.as_bytes();
                if name.len() > MAX_HOSTNAME_LEN {
                    return Err(BridgeError::Truncated {
                        len: name.len(),
                        max: MAX_HOSTNAME_LEN,
                    });
                }
                out[..name.len()].copy_from_slice(name);
                out[name.len()..name.len() + 2].copy_from_slice(&port.to_le_bytes());
                Ok(name.len() + 2)
            }
        }
    }
}
