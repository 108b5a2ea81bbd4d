// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! UART0 transport: receive interrupt feeding the byte queue, blocking
//! transmit for replies, and the event gate that masks the interrupt around
//! flash operations.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::interrupt::Mutex;
use cortex_m::peripheral::NVIC;
use fieldboot_common::backend::EventGate;
use fieldboot_common::protocol::ReplyLink;
use fieldboot_common::queue::{ByteGet, BytePut, ByteQueue};
use rp2040_hal::pac::{self, interrupt};
use rp2040_hal::uart::{Reader, Writer};

use crate::peripherals::{Uart, UartPins};

pub const RX_QUEUE_SIZE: usize = 512;

pub type RxBytes = ByteGet<'static, RX_QUEUE_SIZE>;

static mut RX_QUEUE: ByteQueue<RX_QUEUE_SIZE> = ByteQueue::new();

struct RxContext {
    reader: Reader<pac::UART0, UartPins>,
    put: BytePut<'static, RX_QUEUE_SIZE>,
}

/// Handed to the interrupt once, in `start`.
static RX_CONTEXT: Mutex<RefCell<Option<RxContext>>> = Mutex::new(RefCell::new(None));

/// Set once the interrupt may be unmasked.
static RX_ARMED: AtomicBool = AtomicBool::new(false);

/// Split the UART, hand the receive half to the interrupt and unmask it.
///
/// Must be called at most once: the queue halves are `'static`.
pub fn start(mut uart: Uart) -> (RxBytes, UartLink) {
    uart.enable_rx_interrupt();
    let (reader, writer) = uart.split();

    let (put, get) = unsafe { (*core::ptr::addr_of_mut!(RX_QUEUE)).split() };
    cortex_m::interrupt::free(|cs| {
        RX_CONTEXT
            .borrow(cs)
            .replace(Some(RxContext { reader, put }));
    });

    RX_ARMED.store(true, Ordering::Release);
    RxGate.resume();

    (get, UartLink { writer })
}

#[interrupt]
fn UART0_IRQ() {
    cortex_m::interrupt::free(|cs| {
        let mut ctx = RX_CONTEXT.borrow(cs).borrow_mut();
        let Some(ctx) = ctx.as_mut() else {
            return;
        };

        // Drain the FIFO; overflow is counted by the queue.
        let mut buf = [0u8; 32];
        while let Ok(n) = ctx.reader.read_raw(&mut buf) {
            if n == 0 {
                break;
            }
            for &byte in &buf[..n] {
                let _ = ctx.put.put(byte);
            }
        }
    });
}

/// Masks the UART0 receive interrupt for the lifetime of a flash operation.
#[derive(Clone, Copy, Default)]
pub struct RxGate;

impl EventGate for RxGate {
    fn suspend(&self) {
        NVIC::mask(pac::Interrupt::UART0_IRQ);
    }

    fn resume(&self) {
        if RX_ARMED.load(Ordering::Acquire) {
            unsafe { NVIC::unmask(pac::Interrupt::UART0_IRQ) };
        }
    }
}

/// Transmit half used for ACK/NACK replies.
pub struct UartLink {
    writer: Writer<pac::UART0, UartPins>,
}

impl ReplyLink for UartLink {
    fn send(&mut self, frame: &[u8]) {
        self.writer.write_full_blocking(frame);
    }
}
