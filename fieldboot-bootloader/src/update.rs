// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update mode: listen on UART0 and drive the wire protocol.
//!
//! The loop is cooperative. Each pass polls the protocol state machine,
//! which drains the receive queue and returns as soon as it is empty, then
//! does housekeeping (heartbeat LED, overflow reporting).

use embedded_hal::digital::OutputPin;
use fieldboot_common::protocol::{Poll, WireProtocol};
use fieldboot_common::status::StatusStore;
use fieldboot_common::UpdateEngine;

use crate::flash::{FlashEeprom, Rp2040Flash};
use crate::peripherals::{self, Peripherals};
use crate::serial::{self, RxGate};

pub type Engine = UpdateEngine<Rp2040Flash, RxGate>;
pub type Status = StatusStore<FlashEeprom, RxGate>;

const HEARTBEAT_MS: u64 = 200;

/// Run the update loop. Does not return (reboot via SCB::sys_reset).
pub fn run_update_mode(p: &mut Peripherals, engine: &mut Engine, status: &mut Status) -> ! {
    let Some(uart) = p.uart.take() else {
        defmt::error!("UART0 unavailable, cannot listen for updates");
        halt(p);
    };

    let (mut rx, mut link) = serial::start(uart);
    let mut protocol = WireProtocol::new();
    defmt::println!("Listening on UART0 at {} baud", peripherals::BAUD_RATE);

    let mut dropped = 0;
    let mut led_on = false;
    let mut next_beat = p.now_ms();

    loop {
        let now = p.now_ms();

        match protocol.poll(&mut rx, engine, status, &mut link, now) {
            Poll::Waiting => {}
            Poll::Reset(outcome) => {
                defmt::println!("Commit: {}, resetting", outcome);
                cortex_m::peripheral::SCB::sys_reset();
            }
            Poll::Fatal(e) => {
                defmt::error!("Status record could not be saved: {}", e);
                halt(p);
            }
        }

        if rx.dropped() != dropped {
            dropped = rx.dropped();
            defmt::warn!("RX queue overflow, {} bytes lost so far", dropped);
        }

        if now >= next_beat {
            led_on = !led_on;
            if led_on {
                p.led_pin.set_high().ok();
            } else {
                p.led_pin.set_low().ok();
            }
            next_beat = now + HEARTBEAT_MS;
        }
    }
}

/// Stop for good: the status record cannot be trusted. Fast blink forever.
pub fn halt(p: &mut Peripherals) -> ! {
    defmt::error!("Halted");
    loop {
        peripherals::blink(&mut p.led_pin, &mut p.timer, 1, 50);
    }
}
