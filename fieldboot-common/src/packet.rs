// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire framing for the serial update link.
//!
//! Data packet (host -> device):
//!
//! ```text
//! | 0x55 | type | size | command | payload (size - 5) | checksum |
//! ```
//!
//! Replies (device -> host):
//!
//! ```text
//! ACK:  | 0x55 | 0x10 | 4 | checksum |
//! NACK: | 0x55 | 0x11 | 5 | code | checksum |
//! ```
//!
//! `size` counts every framed byte including the header and checksum. The
//! checksum byte makes the unsigned sum of the whole frame zero modulo 256.

use core::fmt;

pub const HEADER: u8 = 0x55;

pub const DATA_PACKET_TYPE: u8 = 0x01;
pub const ACK_TYPE: u8 = 0x10;
pub const NACK_TYPE: u8 = 0x11;

/// Header, type, size, command and checksum.
pub const MIN_FRAME_LEN: u8 = 5;
pub const MAX_FRAME_LEN: u8 = 255;
pub const MAX_PAYLOAD_LEN: usize = (MAX_FRAME_LEN - MIN_FRAME_LEN) as usize;

pub const ACK_FRAME_LEN: u8 = 4;
pub const NACK_FRAME_LEN: u8 = 5;

/// Command byte of a data packet.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Write = 0x01,
    CommitOk = 0x02,
    CommitFail = 0x03,
}

impl Command {
    /// Whether the command ends the session with a device reset.
    pub fn is_commit(self) -> bool {
        matches!(self, Self::CommitOk | Self::CommitFail)
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Self::Write),
            0x02 => Ok(Self::CommitOk),
            0x03 => Ok(Self::CommitFail),
            other => Err(other),
        }
    }
}

/// Error code carried by a NACK.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NackCode {
    WriteFailure = 0x01,
    ChecksumFailure = 0x02,
    Timeout = 0x03,
}

impl TryFrom<u8> for NackCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Self::WriteFailure),
            0x02 => Ok(Self::ChecksumFailure),
            0x03 => Ok(Self::Timeout),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    Ack,
    Nack(NackCode),
}

impl Reply {
    /// Frame the reply, checksum included.
    pub fn encode(self) -> heapless::Vec<u8, { NACK_FRAME_LEN as usize }> {
        let mut frame = heapless::Vec::new();
        let body: &[u8] = match self {
            Self::Ack => &[HEADER, ACK_TYPE, ACK_FRAME_LEN],
            Self::Nack(code) => &[HEADER, NACK_TYPE, NACK_FRAME_LEN, code as u8],
        };
        // Both bodies fit, with room for the checksum byte.
        let _ = frame.extend_from_slice(body);
        let _ = frame.push(checksum_residual(body));
        frame
    }

    /// Parse a framed reply. Used by host-side tests and tools.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if !is_frame_intact(frame) {
            return None;
        }
        match *frame {
            [HEADER, ACK_TYPE, ACK_FRAME_LEN, _] => Some(Self::Ack),
            [HEADER, NACK_TYPE, NACK_FRAME_LEN, code, _] => {
                NackCode::try_from(code).ok().map(Self::Nack)
            }
            _ => None,
        }
    }
}

/// Payload did not fit in a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadTooLong {
    pub len: usize,
}

impl fmt::Display for PayloadTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload of {} bytes exceeds {}", self.len, MAX_PAYLOAD_LEN)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PayloadTooLong {}

/// Byte-wise sum modulo 256.
pub fn frame_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// The byte that brings the sum of `bytes` back to zero.
pub fn checksum_residual(bytes: &[u8]) -> u8 {
    frame_sum(bytes).wrapping_neg()
}

/// Whether a complete frame (checksum included) sums to zero.
pub fn is_frame_intact(frame: &[u8]) -> bool {
    !frame.is_empty() && frame_sum(frame) == 0
}

/// Build a data packet around `payload`.
pub fn encode_data_frame(
    command: Command,
    payload: &[u8],
) -> Result<heapless::Vec<u8, { MAX_FRAME_LEN as usize }>, PayloadTooLong> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(PayloadTooLong { len: payload.len() });
    }

    let size = MIN_FRAME_LEN + payload.len() as u8;
    let mut frame = heapless::Vec::new();
    // Length was checked above, so none of these pushes can overflow.
    let _ = frame.extend_from_slice(&[HEADER, DATA_PACKET_TYPE, size, command as u8]);
    let _ = frame.extend_from_slice(payload);
    let residual = checksum_residual(&frame);
    let _ = frame.push(residual);
    Ok(frame)
}
