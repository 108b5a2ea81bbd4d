// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte queue between the receive interrupt and the protocol poller.
//!
//! A fixed-capacity single-producer single-consumer ring. The interrupt
//! handler owns the [`BytePut`] half and the foreground loop owns the
//! [`ByteGet`] half; neither blocks. A `put` on a full queue drops the byte
//! and bumps an overflow counter that the consumer can read, so sustained
//! overflow is observable instead of silent.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

/// The queue had no free slot; the byte was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Anything the protocol state machine can pull received bytes from.
pub trait ByteSource {
    fn next_byte(&mut self) -> Option<u8>;
}

/// Ring storage. `N` slots hold up to `N - 1` bytes.
pub struct ByteQueue<const N: usize> {
    ring: Queue<u8, N>,
    dropped: AtomicU32,
}

impl<const N: usize> ByteQueue<N> {
    pub const fn new() -> Self {
        Self {
            ring: Queue::new(),
            dropped: AtomicU32::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Split into the producer and consumer halves.
    pub fn split(&mut self) -> (BytePut<'_, N>, ByteGet<'_, N>) {
        let (producer, consumer) = self.ring.split();
        (
            BytePut {
                producer,
                dropped: &self.dropped,
            },
            ByteGet {
                consumer,
                dropped: &self.dropped,
            },
        )
    }
}

impl<const N: usize> Default for ByteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half, owned by the receive interrupt.
pub struct BytePut<'a, const N: usize> {
    producer: Producer<'a, u8, N>,
    dropped: &'a AtomicU32,
}

impl<const N: usize> BytePut<'_, N> {
    pub fn put(&mut self, byte: u8) -> Result<(), QueueFull> {
        self.producer.enqueue(byte).map_err(|_| {
            // Single writer, so load/store is enough on cores without atomic RMW.
            let dropped = self.dropped.load(Ordering::Relaxed);
            self.dropped.store(dropped.wrapping_add(1), Ordering::Relaxed);
            QueueFull
        })
    }

    pub fn is_full(&self) -> bool {
        !self.producer.ready()
    }
}

/// Consumer half, owned by the protocol poller.
pub struct ByteGet<'a, const N: usize> {
    consumer: Consumer<'a, u8, N>,
    dropped: &'a AtomicU32,
}

impl<const N: usize> ByteGet<'_, N> {
    pub fn get(&mut self) -> Option<u8> {
        self.consumer.dequeue()
    }

    pub fn is_empty(&self) -> bool {
        !self.consumer.ready()
    }

    /// Bytes currently queued.
    pub fn in_use(&self) -> usize {
        self.consumer.len()
    }

    /// Bytes dropped on overflow since the queue was created.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> ByteSource for ByteGet<'_, N> {
    fn next_byte(&mut self) -> Option<u8> {
        self.get()
    }
}
