// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot transfer checks for the active image.
//!
//! The first two words of the active region are the initial stack pointer
//! and the reset vector. Control is handed over only when both match what a
//! firmware built for this layout must contain; anything else (erased flash,
//! a half-copied image, a build for another address) keeps the device in the
//! bootloader listening for an update.

use core::fmt;

use crate::backend::{EventGate, FlashBackend};
use crate::engine::UpdateEngine;
use crate::layout::{FlashLayout, Region};

/// Top of SRAM on the reference part; every application image starts with it.
pub const STACK_TOP: u32 = 0x2004_2000;

/// Offset of the reset handler from the image start: 16 system vectors plus
/// 32 device vectors, then `.Reset` at the start of `.text`.
pub const RESET_HANDLER_OFFSET: u32 = 0xC0;

pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Where the bootloader expects to find the application and what its vector
/// table must look like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootTarget {
    pub region: Region,
    pub stack_top: u32,
    pub reset_offset: u32,
}

impl BootTarget {
    pub const REFERENCE: BootTarget = BootTarget::for_layout(&FlashLayout::REFERENCE);

    pub const fn for_layout(layout: &FlashLayout) -> Self {
        Self {
            region: layout.active,
            stack_top: STACK_TOP,
            reset_offset: RESET_HANDLER_OFFSET,
        }
    }

    /// Expected reset vector, Thumb bit set.
    pub const fn entry_point(&self) -> u32 {
        (self.region.start + self.reset_offset) | 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootRejection {
    /// First word reads as erased flash.
    Erased,
    StackPointer(u32),
    EntryPoint(u32),
    /// The vector table could not be read.
    Unreadable,
}

impl fmt::Display for BootRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erased => f.write_str("active region erased"),
            Self::StackPointer(sp) => write!(f, "unexpected stack pointer 0x{sp:08x}"),
            Self::EntryPoint(pc) => write!(f, "unexpected entry point 0x{pc:08x}"),
            Self::Unreadable => f.write_str("vector table unreadable"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BootRejection {}

/// First two words of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VectorTable {
    pub initial_sp: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        Self {
            initial_sp: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            reset_vector: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    /// Read the vector table at the start of `region` through the engine.
    pub fn read<F: FlashBackend, G: EventGate>(
        engine: &mut UpdateEngine<F, G>,
        region: Region,
    ) -> Result<Self, BootRejection> {
        let mut raw = [0u8; 8];
        engine
            .read_region(region, 0, &mut raw)
            .map_err(|_| BootRejection::Unreadable)?;
        Ok(Self::from_bytes(raw))
    }

    pub fn validate(&self, target: &BootTarget) -> Result<BootVector, BootRejection> {
        if self.initial_sp == ERASED_WORD {
            return Err(BootRejection::Erased);
        }
        if self.initial_sp != target.stack_top {
            return Err(BootRejection::StackPointer(self.initial_sp));
        }
        if self.reset_vector != target.entry_point() {
            return Err(BootRejection::EntryPoint(self.reset_vector));
        }

        Ok(BootVector {
            vector_table: target.region.start,
            stack_pointer: self.initial_sp,
            entry: self.reset_vector,
        })
    }
}

/// A validated hand-off: everything the platform trampoline needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootVector {
    /// New vector table base.
    pub vector_table: u32,
    pub stack_pointer: u32,
    pub entry: u32,
}
