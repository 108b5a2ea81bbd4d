// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Fieldboot: serial field-update bootloader for RP2040.

#![no_std]
#![no_main]

mod flash;
mod jump;
mod peripherals;
mod serial;
mod update;

use defmt_rtt as _;
use embedded_hal::delay::DelayNs;
use fieldboot_common::boot::BootTarget;
use fieldboot_common::layout::FlashLayout;
use fieldboot_common::startup::{select_boot_action, BootAction};
use fieldboot_common::status::StatusStore;
use fieldboot_common::UpdateEngine;
use panic_probe as _;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let mut p = peripherals::init();

    peripherals::blink(&mut p.led_pin, &mut p.timer, 3, 200);
    let rom = flash::init();

    let layout = FlashLayout::REFERENCE;
    let mut engine = UpdateEngine::new(flash::Rp2040Flash::new(rom, &layout), serial::RxGate, layout);
    let mut status = StatusStore::new(flash::FlashEeprom::new(rom, layout.store), serial::RxGate);

    match select_boot_action(&mut engine, &mut status, &BootTarget::for_layout(&layout)) {
        BootAction::Transfer(vector) => {
            defmt::println!(
                "Booting image at 0x{:08x}, entry 0x{:08x}",
                vector.vector_table,
                vector.entry
            );
            p.timer.delay_ms(10u32);
            unsafe { jump::boot(vector) }
        }
        BootAction::Reset => {
            defmt::println!("Update promoted, resetting");
            cortex_m::peripheral::SCB::sys_reset();
        }
        BootAction::Listen(reason) => {
            defmt::println!("Entering update mode: {}", reason);
            update::run_update_mode(&mut p, &mut engine, &mut status)
        }
        BootAction::Halt(e) => {
            defmt::error!("Cannot clear update flag: {}", e);
            update::halt(&mut p)
        }
    }
}
