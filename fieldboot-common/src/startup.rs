// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot-time decision: promote a pending image, hand off, or listen.

use crate::backend::{EventGate, FlashBackend, PersistentStore};
use crate::boot::{BootRejection, BootTarget, BootVector, VectorTable};
use crate::engine::{EngineError, UpdateEngine};
use crate::log;
use crate::status::{StatusError, StatusRecord, StatusStore};

/// Promotion attempts per boot before leaving the update pending.
pub const PROMOTION_ATTEMPTS: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ListenReason {
    /// Promotion failed on every attempt; the pending flag is still set.
    PromotionFailed(EngineError),
    NoBootableImage(BootRejection),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootAction {
    /// Jump to the active image.
    Transfer(BootVector),
    /// Run the wire protocol and wait for an image.
    Listen(ListenReason),
    /// Promotion finished and the flag is cleared; reset into the new image.
    Reset,
    /// The status record could not be persisted. Stop.
    Halt(StatusError),
}

/// Read the status record once and decide what this boot does.
///
/// An unreadable record (never provisioned, corrupt, or erased) is treated
/// as "no pending update". So is a pending record whose size could never be
/// promoted; it is cleared and the active image checked as usual.
pub fn select_boot_action<F, G, P, H>(
    engine: &mut UpdateEngine<F, G>,
    status: &mut StatusStore<P, H>,
    target: &BootTarget,
) -> BootAction
where
    F: FlashBackend,
    G: EventGate,
    P: PersistentStore,
    H: EventGate,
{
    let record = match status.load() {
        Ok(record) => record,
        Err(_e) => {
            log::warn!("status record unavailable ({}), assuming no update", _e);
            StatusRecord::cleared()
        }
    };

    if record.updated {
        match promote_pending(engine, &record) {
            Ok(()) => {
                return match status.save_with_retry(&record.promoted()) {
                    Ok(()) => BootAction::Reset,
                    Err(e) => BootAction::Halt(e),
                };
            }
            // Nothing was erased, so the active image is still what it was.
            Err(EngineError::ImageSize { size: _size }) => {
                log::warn!("pending size {} is impossible, dropping update", _size);
                if let Err(e) = status.save_with_retry(&StatusRecord::cleared()) {
                    return BootAction::Halt(e);
                }
            }
            Err(e) => return BootAction::Listen(ListenReason::PromotionFailed(e)),
        }
    }

    let checked = VectorTable::read(engine, target.region).and_then(|vt| vt.validate(target));
    match checked {
        Ok(vector) => BootAction::Transfer(vector),
        Err(rejection) => BootAction::Listen(ListenReason::NoBootableImage(rejection)),
    }
}

/// Run the promotion, retrying up to [`PROMOTION_ATTEMPTS`] times.
pub fn promote_pending<F: FlashBackend, G: EventGate>(
    engine: &mut UpdateEngine<F, G>,
    record: &StatusRecord,
) -> Result<(), EngineError> {
    let mut attempt = 1;
    loop {
        match engine.promote_staged_to_active(record) {
            Ok(()) => {
                log::info!("promotion done on attempt {}", attempt);
                return Ok(());
            }
            // An impossible size will not get better on retry.
            Err(e @ EngineError::ImageSize { .. }) => return Err(e),
            Err(e) if attempt >= PROMOTION_ATTEMPTS => {
                log::warn!("promotion failed, update left pending: {}", e);
                return Err(e);
            }
            Err(_e) => {
                log::warn!("promotion attempt {} failed: {}", attempt, _e);
                attempt += 1;
            }
        }
    }
}
