// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host-side doubles for the flash backend, persistent store, receive gate
//! and serial link.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::ops::Range;
use std::rc::Rc;

use fieldboot_common::backend::{EventGate, FlashBackend, FlashError, PersistentStore, StoreError};
use fieldboot_common::layout::{FlashLayout, FLASH_BASE, SECTOR_SIZE};
use fieldboot_common::packet::{encode_data_frame, Command, Reply};
use fieldboot_common::protocol::{Poll, ReplyLink, WireProtocol};
use fieldboot_common::queue::ByteSource;
use fieldboot_common::status::StatusStore;
use fieldboot_common::UpdateEngine;

// =============================================================================
// Event gate probe
// =============================================================================

/// Counts suspend/resume calls and shares the current depth with [`SimFlash`]
/// so the flash can tell whether it is being touched with events suspended.
#[derive(Clone, Default)]
pub struct GateProbe {
    depth: Rc<Cell<u32>>,
    max_depth: Rc<Cell<u32>>,
    holds: Rc<Cell<u32>>,
}

impl GateProbe {
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth.get()
    }

    pub fn holds(&self) -> u32 {
        self.holds.get()
    }
}

impl EventGate for GateProbe {
    fn suspend(&self) {
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        self.max_depth.set(self.max_depth.get().max(depth));
        self.holds.set(self.holds.get() + 1);
    }

    fn resume(&self) {
        self.depth.set(self.depth.get() - 1);
    }
}

// =============================================================================
// NOR flash simulator
// =============================================================================

/// RAM-backed flash covering the whole reference layout.
///
/// Erase sets a sector to 0xFF; program can only clear bits.
pub struct SimFlash {
    mem: Vec<u8>,
    gate: GateProbe,
    pub unguarded_ops: u32,
    pub erases: u32,
    pub programs: u32,
    fail_erase_at: Option<u32>,
    corrupt_range: Range<u32>,
    corrupt_remaining: u32,
}

impl SimFlash {
    pub fn new(gate: GateProbe) -> Self {
        let end = FlashLayout::REFERENCE.store.end();
        Self {
            mem: vec![0xFF; (end - FLASH_BASE) as usize],
            gate,
            unguarded_ops: 0,
            erases: 0,
            programs: 0,
            fail_erase_at: None,
            corrupt_range: 0..0,
            corrupt_remaining: 0,
        }
    }

    /// Make the erase of the sector at `address` report failure.
    pub fn fail_erase_at(&mut self, address: u32) {
        self.fail_erase_at = Some(address);
    }

    /// The next `count` programs that start inside `range` store inverted
    /// data, so the following verify sees a mismatch.
    pub fn corrupt_programs(&mut self, range: Range<u32>, count: u32) {
        self.corrupt_range = range;
        self.corrupt_remaining = count;
    }

    /// Direct view of flash contents, bypassing the backend contract.
    pub fn peek(&self, address: u32, len: u32) -> &[u8] {
        let start = self.index(address);
        &self.mem[start..start + len as usize]
    }

    /// Direct write, bypassing NOR rules. For preloading images.
    pub fn poke(&mut self, address: u32, bytes: &[u8]) {
        let start = self.index(address);
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn index(&self, address: u32) -> usize {
        (address - FLASH_BASE) as usize
    }

    fn check_gate(&mut self) {
        if self.gate.depth() == 0 {
            self.unguarded_ops += 1;
        }
    }

    fn check_range(&self, address: u32, len: usize) -> Result<usize, FlashError> {
        if address < FLASH_BASE || (address - FLASH_BASE) as usize + len > self.mem.len() {
            return Err(FlashError::OutOfRange { address });
        }
        Ok(self.index(address))
    }
}

impl FlashBackend for SimFlash {
    const WRITE_SIZE: u32 = 4;

    fn erase_sector(&mut self, address: u32, length: u32) -> Result<(), FlashError> {
        self.check_gate();
        if address % SECTOR_SIZE != 0 || length % SECTOR_SIZE != 0 {
            return Err(FlashError::Misaligned { address });
        }
        let start = self.check_range(address, length as usize)?;
        if self.fail_erase_at == Some(address) {
            return Err(FlashError::Erase { address });
        }
        self.mem[start..start + length as usize].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashError> {
        self.check_gate();
        if address % Self::WRITE_SIZE != 0 || bytes.len() as u32 % Self::WRITE_SIZE != 0 {
            return Err(FlashError::Misaligned { address });
        }
        let start = self.check_range(address, bytes.len())?;
        self.programs += 1;

        let corrupt = self.corrupt_remaining > 0 && self.corrupt_range.contains(&address);
        if corrupt {
            self.corrupt_remaining -= 1;
        }
        for (cell, &b) in self.mem[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell = if corrupt { !b } else { *cell & b };
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_gate();
        let start = self.check_range(address, buf.len())?;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }
}

// =============================================================================
// Emulated EEPROM
// =============================================================================

pub struct SimEeprom {
    cells: Vec<u8>,
    pub writes: u32,
    fail_writes: u32,
    garble_writes: u32,
}

impl SimEeprom {
    /// Store with `capacity` bytes, freshly erased.
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: vec![0xFF; capacity],
            writes: 0,
            fail_writes: 0,
            garble_writes: 0,
        }
    }

    pub fn unprovisioned() -> Self {
        Self::new(0)
    }

    /// The next `count` writes report failure and change nothing.
    pub fn fail_next_writes(&mut self, count: u32) {
        self.fail_writes = count;
    }

    /// The next `count` writes report success but store the bytes inverted.
    pub fn garble_next_writes(&mut self, count: u32) {
        self.garble_writes = count;
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [u8] {
        &mut self.cells
    }
}

impl PersistentStore for SimEeprom {
    fn capacity(&self) -> u32 {
        self.cells.len() as u32
    }

    fn read_persistent(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        let start = offset as usize;
        let src = self
            .cells
            .get(start..start + buf.len())
            .ok_or(StoreError::OutOfRange { offset })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_persistent(&mut self, offset: u32, bytes: &[u8]) -> Result<(), StoreError> {
        self.writes += 1;
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(StoreError::Write { offset });
        }
        let garble = self.garble_writes > 0;
        if garble {
            self.garble_writes -= 1;
        }
        let start = offset as usize;
        let dst = self
            .cells
            .get_mut(start..start + bytes.len())
            .ok_or(StoreError::OutOfRange { offset })?;
        for (cell, &b) in dst.iter_mut().zip(bytes) {
            *cell = if garble { !b } else { b };
        }
        Ok(())
    }
}

// =============================================================================
// Serial link doubles
// =============================================================================

/// Receive side: bytes waiting to be polled.
#[derive(Default)]
pub struct Wire {
    bytes: VecDeque<u8>,
}

impl Wire {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes.iter().copied());
    }

    pub fn pending(&self) -> usize {
        self.bytes.len()
    }
}

impl ByteSource for Wire {
    fn next_byte(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }
}

/// Transmit side: records every frame sent.
#[derive(Default)]
pub struct VecLink {
    pub frames: Vec<Vec<u8>>,
}

impl VecLink {
    pub fn replies(&self) -> Vec<Reply> {
        self.frames
            .iter()
            .map(|f| Reply::decode(f).expect("malformed reply frame"))
            .collect()
    }
}

impl ReplyLink for VecLink {
    fn send(&mut self, frame: &[u8]) {
        self.frames.push(frame.to_vec());
    }
}

// =============================================================================
// Whole-device bench
// =============================================================================

pub const STORE_CAPACITY: usize = 256;

pub type Engine = UpdateEngine<SimFlash, GateProbe>;
pub type Status = StatusStore<SimEeprom, GateProbe>;

pub fn engine() -> (Engine, GateProbe) {
    let probe = GateProbe::default();
    let engine = UpdateEngine::new(
        SimFlash::new(probe.clone()),
        probe.clone(),
        FlashLayout::REFERENCE,
    );
    (engine, probe)
}

pub fn status_store() -> Status {
    StatusStore::new(SimEeprom::new(STORE_CAPACITY), GateProbe::default())
}

/// The bootloader's update mode with every collaborator simulated.
pub struct Bench {
    pub engine: Engine,
    pub status: Status,
    pub protocol: WireProtocol,
    pub wire: Wire,
    pub link: VecLink,
    pub probe: GateProbe,
    pub now_ms: u64,
}

impl Bench {
    pub fn new() -> Self {
        let (engine, probe) = engine();
        Self {
            engine,
            status: status_store(),
            protocol: WireProtocol::new(),
            wire: Wire::default(),
            link: VecLink::default(),
            probe,
            now_ms: 0,
        }
    }

    pub fn poll(&mut self) -> Poll {
        self.protocol.poll(
            &mut self.wire,
            &mut self.engine,
            &mut self.status,
            &mut self.link,
            self.now_ms,
        )
    }

    /// Queue `bytes` and poll once.
    pub fn send(&mut self, bytes: &[u8]) -> Poll {
        self.wire.feed(bytes);
        self.poll()
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.link.replies()
    }

    pub fn staged(&self, len: u32) -> Vec<u8> {
        let start = self.engine.layout().staged.start;
        self.engine.flash().peek(start, len).to_vec()
    }
}

pub fn write_frame(payload: &[u8]) -> Vec<u8> {
    encode_data_frame(Command::Write, payload).unwrap().to_vec()
}

pub fn commit_frame(command: Command) -> Vec<u8> {
    encode_data_frame(command, &[]).unwrap().to_vec()
}

/// Deterministic non-trivial image bytes.
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

pub fn additive(bytes: &[u8]) -> u32 {
    bytes.iter().map(|&b| u32::from(b)).sum()
}
