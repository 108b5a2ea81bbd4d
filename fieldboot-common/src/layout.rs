// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash region map.
//!
//! Program flash is split into sector-aligned regions laid out back to back:
//! the bootloader, the active image it boots, and the staged image received
//! over the serial link. The persistent status record gets its own sector
//! after the staged region.

use core::ops::Range;

use crate::backend::FlashError;

// --- Reference geometry (RP2040, 2 MiB QSPI flash behind XIP) ---

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const SECTOR_SIZE: u32 = 4096;

/// Bytes written per data packet.
pub const BLOCK_SIZE: u32 = 64;

pub const BOOTLOADER_SECTORS: Range<u32> = 0..16; // 64KB
pub const ACTIVE_SECTORS: Range<u32> = 16..208; // 768KB
pub const STAGED_SECTORS: Range<u32> = 208..400; // 768KB
pub const STORE_SECTORS: Range<u32> = 400..401;

/// Largest image the staged region accepts.
pub const MAX_IMAGE_SIZE: u32 = (STAGED_SECTORS.end - STAGED_SECTORS.start) * SECTOR_SIZE;

/// A sector-aligned range of program flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub first_sector: u32,
    pub sector_count: u32,
}

impl Region {
    pub const fn from_sectors(sectors: Range<u32>) -> Self {
        Self {
            start: FLASH_BASE + sectors.start * SECTOR_SIZE,
            first_sector: sectors.start,
            sector_count: sectors.end - sectors.start,
        }
    }

    /// Maximum byte size of the region.
    pub const fn size(&self) -> u32 {
        self.sector_count * SECTOR_SIZE
    }

    /// First address past the region.
    pub const fn end(&self) -> u32 {
        self.start + self.size()
    }

    pub const fn sectors(&self) -> Range<u32> {
        self.first_sector..self.first_sector + self.sector_count
    }

    /// Start addresses of every sector in the region, in order.
    pub fn sector_addresses(&self) -> impl Iterator<Item = u32> {
        let start = self.start;
        (0..self.sector_count).map(move |i| start + i * SECTOR_SIZE)
    }

    /// Resolve `len` bytes at `offset` into an absolute address, refusing
    /// anything that would leave the region.
    pub fn span(&self, offset: u32, len: u32) -> Result<u32, FlashError> {
        let address = self.start.wrapping_add(offset);
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(address),
            _ => Err(FlashError::OutOfRange { address }),
        }
    }

    /// Like [`span`](Self::span), also requiring `offset` and `len` to be
    /// multiples of `align`.
    pub fn aligned_span(&self, offset: u32, len: u32, align: u32) -> Result<u32, FlashError> {
        let address = self.span(offset, len)?;
        if align == 0 || offset % align != 0 || len % align != 0 {
            return Err(FlashError::Misaligned { address });
        }
        Ok(address)
    }

    const fn precedes(&self, next: &Region) -> bool {
        self.end() == next.start && self.first_sector + self.sector_count == next.first_sector
    }
}

/// The full partition map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    pub bootloader: Region,
    pub active: Region,
    pub staged: Region,
    pub store: Region,
}

impl FlashLayout {
    pub const REFERENCE: FlashLayout = FlashLayout {
        bootloader: Region::from_sectors(BOOTLOADER_SECTORS),
        active: Region::from_sectors(ACTIVE_SECTORS),
        staged: Region::from_sectors(STAGED_SECTORS),
        store: Region::from_sectors(STORE_SECTORS),
    };

    /// Regions are ordered, contiguous and non-overlapping, the staged region
    /// holds the largest accepted image, and promotion fits into active.
    pub const fn is_consistent(&self) -> bool {
        self.bootloader.start == FLASH_BASE
            && self.bootloader.precedes(&self.active)
            && self.active.precedes(&self.staged)
            && self.staged.precedes(&self.store)
            && self.staged.size() >= MAX_IMAGE_SIZE
            && self.active.size() >= self.staged.size()
            && self.bootloader.sector_count > 0
            && self.store.sector_count > 0
    }
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self::REFERENCE
    }
}

const _: () = assert!(SECTOR_SIZE % BLOCK_SIZE == 0);
const _: () = assert!(MAX_IMAGE_SIZE % BLOCK_SIZE == 0);
const _: () = assert!(FlashLayout::REFERENCE.is_consistent());
