// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update-engine flash backend and status-sector EEPROM for RP2040.
//!
//! Both sit on the bootrom flash routines. XIP is torn down for the duration
//! of each erase or program (connect, exit XIP, operate, flush, re-enter
//! XIP), so the wrappers live in `.data` and only call through pointers
//! resolved by [`init`] while XIP still works.

use fieldboot_common::backend::{FlashBackend, FlashError, PersistentStore, StoreError};
use fieldboot_common::layout::{FlashLayout, Region, FLASH_BASE, SECTOR_SIZE};

const PAGE_SIZE: u32 = 256;

/// Bytes of the store sector exposed as emulated EEPROM.
const EEPROM_CAPACITY: u32 = PAGE_SIZE;

// ROM function pointer types
type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

// Filled by `init`; read only by the `.data` wrappers below.
static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// Bootrom lookup by two-letter tag (table at 0x14, lookup fn at 0x18).
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Proof that the ROM flash routines have been resolved.
#[derive(Clone, Copy)]
pub struct Rom {
    _private: (),
}

/// Resolve the ROM flash function pointers. Must run once, with XIP active,
/// before any backend is built.
pub fn init() -> Rom {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
        ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
        ROM_FLASH_RANGE_ERASE =
            core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
        ROM_FLASH_RANGE_PROGRAM =
            core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
        ROM_FLASH_FLUSH_CACHE =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
        ROM_FLASH_ENTER_CMD_XIP =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
    }
    Rom { _private: () }
}

/// Erase `size` bytes (whole sectors) at `offset` from the start of flash.
///
/// # Safety
/// Requires a `Rom` token; nothing else may be executing from XIP.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_erase(offset: u32, size: u32) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, size as usize, SECTOR_SIZE, 0x20);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Program `len` bytes (whole pages) at `offset` from the start of flash.
///
/// # Safety
/// Same as [`flash_erase`]; `data` must be valid for `len` bytes.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_program(offset: u32, data: *const u8, len: usize) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_PROGRAM(offset, data, len);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Copy out of the XIP window.
fn flash_read(abs_addr: u32, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = unsafe { ((abs_addr + i as u32) as *const u8).read_volatile() };
    }
}

fn contains(window: &(u32, u32), address: u32, len: u32) -> bool {
    address >= window.0 && address.checked_add(len).is_some_and(|end| end <= window.1)
}

/// Program one 256-byte page. Bytes outside `bytes` are sent as 0xFF, which
/// leaves the cells already programmed in that page untouched.
fn program_page(page: u32, address: u32, bytes: &[u8]) {
    let mut buf = [0xFFu8; PAGE_SIZE as usize];
    let at = (address - page) as usize;
    buf[at..at + bytes.len()].copy_from_slice(bytes);
    unsafe { flash_program(page - FLASH_BASE, buf.as_ptr(), buf.len()) };
}

/// Program-flash backend for the update engine.
///
/// Erase and program are refused outside the active and staged regions, so
/// neither the bootloader nor the status sector can be hit from here.
pub struct Rp2040Flash {
    writable: (u32, u32),
    readable: (u32, u32),
}

impl Rp2040Flash {
    pub fn new(_rom: Rom, layout: &FlashLayout) -> Self {
        Self {
            writable: (layout.active.start, layout.staged.end()),
            readable: (layout.bootloader.start, layout.store.end()),
        }
    }
}

impl FlashBackend for Rp2040Flash {
    // ROM programs whole pages; partial pages are padded in `program`.
    const WRITE_SIZE: u32 = 4;

    fn erase_sector(&mut self, address: u32, length: u32) -> Result<(), FlashError> {
        if address % SECTOR_SIZE != 0 || length % SECTOR_SIZE != 0 {
            return Err(FlashError::Misaligned { address });
        }
        if !contains(&self.writable, address, length) {
            return Err(FlashError::OutOfRange { address });
        }
        unsafe { flash_erase(address - FLASH_BASE, length) };
        Ok(())
    }

    fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashError> {
        let len = bytes.len() as u32;
        if address % Self::WRITE_SIZE != 0 || len % Self::WRITE_SIZE != 0 {
            return Err(FlashError::Misaligned { address });
        }
        if !contains(&self.writable, address, len) {
            return Err(FlashError::OutOfRange { address });
        }

        let mut addr = address;
        let mut rest = bytes;
        while !rest.is_empty() {
            let page = addr & !(PAGE_SIZE - 1);
            let n = ((page + PAGE_SIZE - addr) as usize).min(rest.len());
            program_page(page, addr, &rest[..n]);
            addr += n as u32;
            rest = &rest[n..];
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if !contains(&self.readable, address, buf.len() as u32) {
            return Err(FlashError::OutOfRange { address });
        }
        flash_read(address, buf);
        Ok(())
    }
}

/// Emulated EEPROM in the first page of the store sector.
///
/// Each write reads the page, patches it, erases the sector and programs the
/// page back, all from one `write_persistent` call.
pub struct FlashEeprom {
    base: u32,
    capacity: u32,
}

impl FlashEeprom {
    pub fn new(_rom: Rom, store: Region) -> Self {
        let capacity = if store.size() >= EEPROM_CAPACITY {
            EEPROM_CAPACITY
        } else {
            0
        };
        Self {
            base: store.start,
            capacity,
        }
    }

    fn check(&self, offset: u32, len: usize) -> Result<(), StoreError> {
        match offset.checked_add(len as u32) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(StoreError::OutOfRange { offset }),
        }
    }
}

impl PersistentStore for FlashEeprom {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn read_persistent(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        self.check(offset, buf.len())?;
        flash_read(self.base + offset, buf);
        Ok(())
    }

    fn write_persistent(&mut self, offset: u32, bytes: &[u8]) -> Result<(), StoreError> {
        self.check(offset, bytes.len())?;

        let mut page = [0xFFu8; PAGE_SIZE as usize];
        flash_read(self.base, &mut page[..self.capacity as usize]);
        let at = offset as usize;
        page[at..at + bytes.len()].copy_from_slice(bytes);

        unsafe {
            flash_erase(self.base - FLASH_BASE, SECTOR_SIZE);
            flash_program(self.base - FLASH_BASE, page.as_ptr(), page.len());
        }
        Ok(())
    }
}
