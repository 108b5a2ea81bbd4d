// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash update engine: staged-image writes and staged-to-active promotion.
//!
//! The engine owns the write cursor. It is derived from the number of
//! [`BLOCK_SIZE`] blocks programmed and verified since the staging session
//! was opened, and that count is the only source for the final image size.
//!
//! Every backend call is made while holding the [`EventGate`], one call per
//! hold, so the receive interrupt is never masked across more than a single
//! erase, program or read.

use core::fmt;

use crate::backend::{EventGate, FlashBackend, FlashError};
use crate::layout::{FlashLayout, Region, BLOCK_SIZE, SECTOR_SIZE};
use crate::log;
use crate::status::StatusRecord;

/// Copy granularity used during promotion.
const COPY_CHUNK: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineError {
    Flash(FlashError),
    /// No staging session has been opened.
    SessionNotOpen,
    /// An earlier flash failure ended the staging session.
    SessionFaulted,
    /// A block was not exactly [`BLOCK_SIZE`] bytes, or a payload did not fit one.
    BlockLength { len: u32 },
    /// The staged region has no room for another block.
    RegionFull,
    /// Image size is zero, not block aligned, or larger than a region.
    ImageSize { size: u32 },
    /// The promoted image does not match the recorded checksum.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl From<FlashError> for EngineError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::SessionNotOpen => f.write_str("no staging session open"),
            Self::SessionFaulted => f.write_str("staging session faulted"),
            Self::BlockLength { len } => write!(f, "bad block length {len}"),
            Self::RegionFull => f.write_str("staged region full"),
            Self::ImageSize { size } => write!(f, "invalid image size {size}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EngineError {}

/// Lifecycle of the staged region during one power-on session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Session {
    /// Nothing erased yet.
    Closed,
    /// Staged region erased; blocks are being appended.
    Open,
    /// A flash operation failed. Only a commit (and the reset after it) clears this.
    Faulted,
}

pub struct UpdateEngine<F, G> {
    flash: F,
    gate: G,
    layout: FlashLayout,
    blocks_written: u32,
    session: Session,
}

impl<F: FlashBackend, G: EventGate> UpdateEngine<F, G> {
    pub fn new(flash: F, gate: G, layout: FlashLayout) -> Self {
        Self {
            flash,
            gate,
            layout,
            blocks_written: 0,
            session: Session::Closed,
        }
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn blocks_written(&self) -> u32 {
        self.blocks_written
    }

    /// Absolute address the next block will be written to.
    pub fn write_cursor(&self) -> u32 {
        self.layout.staged.start + self.staged_image_size()
    }

    pub fn staged_image_size(&self) -> u32 {
        self.blocks_written * BLOCK_SIZE
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Erase the whole staged region and open a new session at block 0.
    pub fn begin_staging(&mut self) -> Result<(), EngineError> {
        let staged = self.layout.staged;
        log::info!("erasing staged region ({} sectors)", staged.sector_count);

        self.reset_staging_cursor();
        if let Err(e) = self.erase_region(staged) {
            log::warn!("staged erase failed: {}", e);
            self.session = Session::Faulted;
            return Err(e.into());
        }

        self.session = Session::Open;
        Ok(())
    }

    /// Program one block at the write cursor and read it back.
    ///
    /// Returns the address the block landed at. The cursor only moves once the
    /// read-back matches; any flash failure faults the session.
    pub fn append_block(&mut self, block: &[u8]) -> Result<u32, EngineError> {
        match self.session {
            Session::Open => {}
            Session::Closed => return Err(EngineError::SessionNotOpen),
            Session::Faulted => return Err(EngineError::SessionFaulted),
        }
        if block.len() != BLOCK_SIZE as usize {
            return Err(EngineError::BlockLength {
                len: block.len() as u32,
            });
        }

        let staged = self.layout.staged;
        let address = match staged.aligned_span(self.staged_image_size(), BLOCK_SIZE, F::WRITE_SIZE)
        {
            Ok(address) => address,
            Err(FlashError::OutOfRange { .. }) => return Err(EngineError::RegionFull),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.program_verified(address, block) {
            log::warn!("block {} write failed: {}", self.blocks_written, e);
            self.session = Session::Faulted;
            return Err(e.into());
        }

        self.blocks_written += 1;
        Ok(address)
    }

    /// Append a 1..=[`BLOCK_SIZE`] byte payload as one block, padding with the
    /// erased value. Opens the session on first use.
    pub fn append_payload(&mut self, payload: &[u8]) -> Result<u32, EngineError> {
        if payload.is_empty() || payload.len() > BLOCK_SIZE as usize {
            return Err(EngineError::BlockLength {
                len: payload.len() as u32,
            });
        }
        if self.session == Session::Closed {
            self.begin_staging()?;
        }

        let mut block = [F::ERASED; BLOCK_SIZE as usize];
        block[..payload.len()].copy_from_slice(payload);
        self.append_block(&block)
    }

    pub fn reset_staging_cursor(&mut self) {
        self.blocks_written = 0;
    }

    /// Size and checksum of everything written this session, as a pending record.
    pub fn finalize_staging(&mut self) -> Result<StatusRecord, EngineError> {
        match self.session {
            Session::Open if self.blocks_written > 0 => {}
            Session::Faulted => return Err(EngineError::SessionFaulted),
            _ => return Err(EngineError::SessionNotOpen),
        }

        let size = self.staged_image_size();
        let checksum = self.region_checksum(self.layout.staged, size)?;
        log::info!("staged image: {} bytes, checksum {:#x}", size, checksum);
        Ok(StatusRecord::pending(size, checksum))
    }

    /// Erase the active region, copy `record.image_size` staged bytes over it
    /// and check the result against `record.image_checksum`.
    pub fn promote_staged_to_active(&mut self, record: &StatusRecord) -> Result<(), EngineError> {
        let FlashLayout { active, staged, .. } = self.layout;
        let size = record.image_size;
        if size == 0 || size % BLOCK_SIZE != 0 || size > staged.size() || size > active.size() {
            return Err(EngineError::ImageSize { size });
        }

        log::info!("promoting {} bytes", size);
        self.erase_region(active)?;

        let mut chunk = [0u8; COPY_CHUNK];
        let mut offset = 0;
        while offset < size {
            let n = (size - offset).min(COPY_CHUNK as u32);
            let buf = &mut chunk[..n as usize];
            let src = staged.span(offset, n)?;
            let dst = active.span(offset, n)?;
            {
                let _held = self.gate.hold();
                self.flash.read(src, buf)?;
            }
            self.program_verified(dst, buf)?;
            offset += n;
        }

        let actual = self.region_checksum(active, size)?;
        if actual != record.image_checksum {
            return Err(EngineError::ChecksumMismatch {
                expected: record.image_checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Bounds-checked read from a region.
    pub fn read_region(
        &mut self,
        region: Region,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), EngineError> {
        let address = region.span(offset, buf.len() as u32)?;
        let _held = self.gate.hold();
        self.flash.read(address, buf)?;
        Ok(())
    }

    /// Backend checksum over the first `len` bytes of a region.
    pub fn region_checksum(&mut self, region: Region, len: u32) -> Result<u32, EngineError> {
        let address = region.span(0, len)?;
        let _held = self.gate.hold();
        Ok(self.flash.checksum(address, len)?)
    }

    fn erase_region(&mut self, region: Region) -> Result<(), FlashError> {
        for address in region.sector_addresses() {
            let _held = self.gate.hold();
            self.flash.erase_sector(address, SECTOR_SIZE)?;
        }
        Ok(())
    }

    fn program_verified(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashError> {
        {
            let _held = self.gate.hold();
            self.flash.program(address, bytes)?;
        }
        let _held = self.gate.hold();
        self.flash.verify(address, bytes)
    }
}
