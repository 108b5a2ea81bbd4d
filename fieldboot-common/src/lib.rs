// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Board-independent core of the fieldboot serial bootloader.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` for the bootloader target
//! - `std` feature: `std::error::Error` impls for host tools
//! - `defmt` feature: `defmt::Format` derives and log output
//!
//! Hardware is reached only through the traits in [`backend`], so everything
//! here runs under `cargo test` on the host against simulated flash.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod backend;
pub mod boot;
pub mod engine;
pub mod layout;
pub mod packet;
pub mod protocol;
pub mod queue;
pub mod startup;
pub mod status;

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(not(feature = "defmt"))]
pub(crate) mod log {
    macro_rules! info {
        ( $( $x:expr ),* ) => {};
    }
    pub(crate) use info;
    macro_rules! warner {
        ( $( $x:expr ),* ) => {};
    }
    pub(crate) use warner as warn;
    macro_rules! error {
        ( $( $x:expr ),* ) => {};
    }
    pub(crate) use error;
}

// Re-export commonly used types
pub use backend::{EventGate, FlashBackend, FlashError, NoEvents, PersistentStore, StoreError};
pub use boot::{BootRejection, BootTarget, BootVector, VectorTable};
pub use engine::{EngineError, Session, UpdateEngine};
pub use layout::{FlashLayout, Region, BLOCK_SIZE, FLASH_BASE, MAX_IMAGE_SIZE, SECTOR_SIZE};
pub use packet::{Command, NackCode, Reply};
pub use protocol::{CommitOutcome, Poll, ReplyLink, RxState, WireProtocol, RX_TIMEOUT_MS};
pub use queue::{ByteGet, BytePut, ByteQueue, ByteSource, QueueFull};
pub use startup::{select_boot_action, BootAction, ListenReason};
pub use status::{StatusError, StatusRecord, StatusStore};
