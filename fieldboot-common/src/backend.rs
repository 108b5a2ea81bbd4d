// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Narrow contracts for the vendor flash and persistent-store primitives.
//!
//! The update engine and status store never touch hardware directly. A board
//! crate implements [`FlashBackend`] and [`PersistentStore`] on top of its ROM
//! or SDK routines, and an [`EventGate`] that suspends the serial receive
//! interrupt while a flash operation is in progress.

use core::fmt;

/// Value read back from an erased flash cell.
pub const ERASED_BYTE: u8 = 0xFF;

const READ_CHUNK: usize = 256;

/// Failure reported by a [`FlashBackend`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    Erase { address: u32 },
    Program { address: u32 },
    Read { address: u32 },
    /// Read-back differs from what was programmed; `address` is the first bad byte.
    Mismatch { address: u32 },
    Misaligned { address: u32 },
    OutOfRange { address: u32 },
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase { address } => write!(f, "erase failed at 0x{address:08x}"),
            Self::Program { address } => write!(f, "program failed at 0x{address:08x}"),
            Self::Read { address } => write!(f, "read failed at 0x{address:08x}"),
            Self::Mismatch { address } => write!(f, "verify mismatch at 0x{address:08x}"),
            Self::Misaligned { address } => write!(f, "misaligned access at 0x{address:08x}"),
            Self::OutOfRange { address } => write!(f, "address 0x{address:08x} out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlashError {}

/// Program-flash primitives.
///
/// Addresses are absolute. Implementations may assume the caller already
/// holds the [`EventGate`] for the duration of each call.
pub trait FlashBackend {
    /// Minimum program granularity. `program` addresses and lengths are multiples of it.
    const WRITE_SIZE: u32;

    /// Value of an erased byte, used to pad short writes.
    const ERASED: u8 = ERASED_BYTE;

    fn erase_sector(&mut self, address: u32, length: u32) -> Result<(), FlashError>;

    fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashError>;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Compare flash contents at `address` against `bytes`.
    fn verify(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut addr = address;
        for expected in bytes.chunks(READ_CHUNK) {
            let actual = &mut chunk[..expected.len()];
            self.read(addr, actual)?;
            if let Some(i) = actual.iter().zip(expected).position(|(a, e)| a != e) {
                return Err(FlashError::Mismatch {
                    address: addr + i as u32,
                });
            }
            addr += expected.len() as u32;
        }
        Ok(())
    }

    /// Additive checksum of `length` bytes starting at `address`.
    ///
    /// Matches the vendor checksum primitive: every byte is added, unsigned,
    /// into a wrapping 32-bit accumulator.
    fn checksum(&mut self, address: u32, length: u32) -> Result<u32, FlashError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut sum = 0u32;
        let mut addr = address;
        let mut remaining = length as usize;

        while remaining > 0 {
            let n = remaining.min(chunk.len());
            self.read(addr, &mut chunk[..n])?;
            sum = additive_checksum(sum, &chunk[..n]);
            addr += n as u32;
            remaining -= n;
        }

        Ok(sum)
    }
}

/// Fold `bytes` into a running additive checksum.
pub fn additive_checksum(seed: u32, bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(seed, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// Failure reported by a [`PersistentStore`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Read { offset: u32 },
    Write { offset: u32 },
    OutOfRange { offset: u32 },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { offset } => write!(f, "store read failed at +{offset}"),
            Self::Write { offset } => write!(f, "store write failed at +{offset}"),
            Self::OutOfRange { offset } => write!(f, "store offset +{offset} out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

/// Byte-addressable non-volatile store (emulated EEPROM).
pub trait PersistentStore {
    /// Usable size in bytes. Zero means the store has never been provisioned.
    fn capacity(&self) -> u32;

    fn read_persistent(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError>;

    fn write_persistent(&mut self, offset: u32, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Suspends and resumes the asynchronous byte-received event.
///
/// This is the only lock in the system. It is taken around one flash or
/// store operation at a time, never across several.
pub trait EventGate {
    fn suspend(&self);

    fn resume(&self);

    /// Suspend events until the returned guard is dropped.
    fn hold(&self) -> Suspended<'_, Self>
    where
        Self: Sized,
    {
        self.suspend();
        Suspended { gate: self }
    }
}

/// Scoped suspension returned by [`EventGate::hold`]. Resumes on drop, so
/// early returns through `?` release it too.
#[must_use = "events resume as soon as the guard is dropped"]
pub struct Suspended<'a, G: EventGate> {
    gate: &'a G,
}

impl<G: EventGate> Drop for Suspended<'_, G> {
    fn drop(&mut self) {
        self.gate.resume();
    }
}

/// Gate for contexts with no asynchronous event source (boot-time promotion
/// before the receiver is armed, host tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEvents;

impl EventGate for NoEvents {
    fn suspend(&self) {}

    fn resume(&self) {}
}

impl<G: EventGate> EventGate for &G {
    fn suspend(&self) {
        (**self).suspend();
    }

    fn resume(&self) {
        (**self).resume();
    }
}
