// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware status record kept in the persistent store.
//!
//! Layout at [`RECORD_OFFSET`]:
//!
//! ```text
//! +0   updated flag   (0 or 1)
//! +1   image size     (u32 LE)
//! +5   image checksum (u32 LE)
//! +9   CRC-32 ISO-HDLC over bytes +0..+9 (u32 LE)
//! ```
//!
//! The record is written with a single store call and read back before the
//! write is trusted, so a torn write shows up as a CRC failure on the next
//! load instead of a half-updated flag.

use core::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};

use crate::backend::{EventGate, PersistentStore, StoreError};
use crate::log;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const RECORD_OFFSET: u32 = 0;
const BODY_LEN: usize = 9;
pub const RECORD_LEN: usize = BODY_LEN + 4;

/// Attempts made by [`StatusStore::save_with_retry`] before giving up.
pub const STORE_WRITE_ATTEMPTS: u8 = 2;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusRecord {
    /// A staged image is waiting to be promoted.
    pub updated: bool,
    #[serde(with = "postcard::fixint::le")]
    pub image_size: u32,
    #[serde(with = "postcard::fixint::le")]
    pub image_checksum: u32,
}

impl StatusRecord {
    pub const fn cleared() -> Self {
        Self {
            updated: false,
            image_size: 0,
            image_checksum: 0,
        }
    }

    pub const fn pending(image_size: u32, image_checksum: u32) -> Self {
        Self {
            updated: true,
            image_size,
            image_checksum,
        }
    }

    /// Same image metadata with the pending flag dropped.
    pub const fn promoted(self) -> Self {
        Self {
            updated: false,
            ..self
        }
    }

    pub fn encode(&self) -> Result<[u8; RECORD_LEN], StatusError> {
        let mut raw = [0u8; RECORD_LEN];
        let used = postcard::to_slice(self, &mut raw[..BODY_LEN])
            .map_err(|_| StatusError::Encoding)?
            .len();
        if used != BODY_LEN {
            return Err(StatusError::Encoding);
        }
        let crc = CRC32.checksum(&raw[..BODY_LEN]);
        raw[BODY_LEN..].copy_from_slice(&crc.to_le_bytes());
        Ok(raw)
    }

    pub fn decode(raw: &[u8; RECORD_LEN]) -> Result<Self, StatusError> {
        let (body, crc) = raw.split_at(BODY_LEN);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if CRC32.checksum(body) != stored {
            return Err(StatusError::Corrupt);
        }
        postcard::from_bytes(body).map_err(|_| StatusError::Corrupt)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusError {
    /// The persistent store reports no usable capacity.
    NotProvisioned,
    /// Stored bytes fail the CRC or do not decode.
    Corrupt,
    /// Bytes read back after a save differ from what was written.
    Readback,
    Encoding,
    Store(StoreError),
}

impl From<StoreError> for StatusError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotProvisioned => f.write_str("persistent store not provisioned"),
            Self::Corrupt => f.write_str("status record corrupt"),
            Self::Readback => f.write_str("status record read-back mismatch"),
            Self::Encoding => f.write_str("status record encoding failed"),
            Self::Store(e) => write!(f, "persistent store: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StatusError {}

/// Sole reader and writer of the [`StatusRecord`].
pub struct StatusStore<P, G> {
    store: P,
    gate: G,
}

impl<P: PersistentStore, G: EventGate> StatusStore<P, G> {
    pub fn new(store: P, gate: G) -> Self {
        Self { store, gate }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    pub fn load(&mut self) -> Result<StatusRecord, StatusError> {
        self.ensure_provisioned()?;

        let mut raw = [0u8; RECORD_LEN];
        {
            let _held = self.gate.hold();
            self.store.read_persistent(RECORD_OFFSET, &mut raw)?;
        }
        StatusRecord::decode(&raw)
    }

    /// Write `record` and confirm it by reading it back.
    pub fn save(&mut self, record: &StatusRecord) -> Result<(), StatusError> {
        self.ensure_provisioned()?;
        let raw = record.encode()?;

        {
            let _held = self.gate.hold();
            self.store.write_persistent(RECORD_OFFSET, &raw)?;
        }

        let mut check = [0u8; RECORD_LEN];
        {
            let _held = self.gate.hold();
            self.store.read_persistent(RECORD_OFFSET, &mut check)?;
        }
        if check != raw {
            return Err(StatusError::Readback);
        }
        Ok(())
    }

    /// [`save`](Self::save), retried up to [`STORE_WRITE_ATTEMPTS`] times.
    /// An error from here is unrecoverable for the caller.
    pub fn save_with_retry(&mut self, record: &StatusRecord) -> Result<(), StatusError> {
        let mut attempt = 1;
        loop {
            match self.save(record) {
                Ok(()) => return Ok(()),
                Err(StatusError::NotProvisioned) => return Err(StatusError::NotProvisioned),
                Err(e) if attempt >= STORE_WRITE_ATTEMPTS => return Err(e),
                Err(_e) => {
                    log::warn!("status save attempt {} failed: {}", attempt, _e);
                    attempt += 1;
                }
            }
        }
    }

    fn ensure_provisioned(&self) -> Result<(), StatusError> {
        if (self.store.capacity() as usize) < RECORD_OFFSET as usize + RECORD_LEN {
            return Err(StatusError::NotProvisioned);
        }
        Ok(())
    }
}
