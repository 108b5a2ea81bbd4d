// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash update engine against the NOR flash simulator.

mod support;

use fieldboot_common::backend::FlashError;
use fieldboot_common::engine::{EngineError, Session};
use fieldboot_common::layout::{BLOCK_SIZE, MAX_IMAGE_SIZE, SECTOR_SIZE};
use fieldboot_common::status::StatusRecord;
use support::{additive, engine, image};

fn block(seed: u32) -> Vec<u8> {
    (0..BLOCK_SIZE).map(|i| (i ^ seed.wrapping_mul(31)) as u8).collect()
}

// =============================================================================
// Staging
// =============================================================================

#[test]
fn test_begin_staging_erases_every_staged_sector() {
    let (mut engine, _probe) = engine();
    let staged = engine.layout().staged;
    engine.flash_mut().poke(staged.start, &[0u8; 16]);
    engine.flash_mut().poke(staged.end() - 16, &[0u8; 16]);

    engine.begin_staging().unwrap();

    assert_eq!(engine.flash().erases, staged.sector_count);
    assert!(engine.flash().peek(staged.start, 16).iter().all(|&b| b == 0xFF));
    assert!(engine
        .flash()
        .peek(staged.end() - 16, 16)
        .iter()
        .all(|&b| b == 0xFF));
    assert_eq!(engine.session(), Session::Open);
    assert_eq!(engine.write_cursor(), staged.start);
}

#[test]
fn test_append_requires_open_session() {
    let (mut engine, _probe) = engine();
    assert_eq!(
        engine.append_block(&block(0)),
        Err(EngineError::SessionNotOpen)
    );
    assert_eq!(engine.flash().programs, 0);
}

#[test]
fn test_append_rejects_wrong_block_length() {
    let (mut engine, _probe) = engine();
    engine.begin_staging().unwrap();

    assert_eq!(
        engine.append_block(&[0u8; 32]),
        Err(EngineError::BlockLength { len: 32 })
    );
    assert_eq!(
        engine.append_block(&[0u8; 65]),
        Err(EngineError::BlockLength { len: 65 })
    );
    assert_eq!(engine.blocks_written(), 0);
    assert_eq!(engine.session(), Session::Open);
}

#[test]
fn test_readback_at_every_block_address() {
    let (mut engine, _probe) = engine();
    let staged = engine.layout().staged;
    engine.begin_staging().unwrap();

    let blocks = MAX_IMAGE_SIZE / BLOCK_SIZE;
    for n in 0..blocks {
        let data = block(n);
        let address = engine.append_block(&data).unwrap();
        assert_eq!(address, staged.start + n * BLOCK_SIZE);
        assert_eq!(engine.flash().peek(address, BLOCK_SIZE), data.as_slice());
    }

    assert_eq!(engine.staged_image_size(), MAX_IMAGE_SIZE);
    assert_eq!(engine.append_block(&block(0)), Err(EngineError::RegionFull));
    assert_eq!(engine.blocks_written(), blocks);

    // Nothing spilled into the persistent-store sector
    let store = engine.layout().store;
    assert!(engine
        .flash()
        .peek(store.start, SECTOR_SIZE)
        .iter()
        .all(|&b| b == 0xFF));
}

#[test]
fn test_cursor_is_block_aligned_and_monotonic() {
    let (mut engine, _probe) = engine();
    engine.begin_staging().unwrap();

    let mut last = engine.write_cursor();
    for n in 0..8 {
        engine.append_block(&block(n)).unwrap();
        let cursor = engine.write_cursor();
        assert!(cursor > last);
        assert_eq!(cursor % BLOCK_SIZE, 0);
        last = cursor;
    }
}

#[test]
fn test_verify_mismatch_faults_session_and_holds_cursor() {
    let (mut engine, _probe) = engine();
    let staged = engine.layout().staged;
    engine.begin_staging().unwrap();
    engine.append_block(&block(1)).unwrap();

    engine
        .flash_mut()
        .corrupt_programs(staged.start..staged.end(), 1);
    let err = engine.append_block(&block(2)).unwrap_err();

    assert_eq!(
        err,
        EngineError::Flash(FlashError::Mismatch {
            address: staged.start + BLOCK_SIZE
        })
    );
    assert_eq!(engine.blocks_written(), 1);
    assert_eq!(engine.write_cursor(), staged.start + BLOCK_SIZE);
    assert_eq!(engine.session(), Session::Faulted);
    assert_eq!(
        engine.append_block(&block(3)),
        Err(EngineError::SessionFaulted)
    );
}

#[test]
fn test_erase_failure_faults_session() {
    let (mut engine, _probe) = engine();
    let staged = engine.layout().staged;
    let address = staged.start + 5 * SECTOR_SIZE;
    engine.flash_mut().fail_erase_at(address);

    assert_eq!(
        engine.begin_staging(),
        Err(EngineError::Flash(FlashError::Erase { address }))
    );
    assert_eq!(engine.session(), Session::Faulted);
    assert_eq!(
        engine.append_payload(&[1, 2, 3]),
        Err(EngineError::SessionFaulted)
    );
}

#[test]
fn test_append_payload_opens_session_once() {
    let (mut engine, _probe) = engine();
    let sectors = engine.layout().staged.sector_count;

    engine.append_payload(&image(64)).unwrap();
    engine.append_payload(&image(10)).unwrap();

    assert_eq!(engine.flash().erases, sectors);
    assert_eq!(engine.blocks_written(), 2);
}

#[test]
fn test_reset_staging_cursor() {
    let (mut engine, _probe) = engine();
    engine.append_payload(&image(64)).unwrap();
    engine.append_payload(&image(64)).unwrap();

    engine.reset_staging_cursor();
    assert_eq!(engine.blocks_written(), 0);
    assert_eq!(engine.write_cursor(), engine.layout().staged.start);
}

#[test]
fn test_finalize_reports_size_and_checksum() {
    let (mut engine, _probe) = engine();
    let img = image(192);
    for chunk in img.chunks(64) {
        engine.append_payload(chunk).unwrap();
    }

    assert_eq!(
        engine.finalize_staging(),
        Ok(StatusRecord::pending(192, additive(&img)))
    );
}

#[test]
fn test_finalize_rejects_empty_and_faulted_sessions() {
    let (mut engine, _probe) = engine();
    assert_eq!(engine.finalize_staging(), Err(EngineError::SessionNotOpen));

    engine.begin_staging().unwrap();
    assert_eq!(engine.finalize_staging(), Err(EngineError::SessionNotOpen));

    let staged = engine.layout().staged;
    engine
        .flash_mut()
        .corrupt_programs(staged.start..staged.end(), 1);
    let _ = engine.append_block(&block(0));
    assert_eq!(engine.finalize_staging(), Err(EngineError::SessionFaulted));
}

// =============================================================================
// Promotion
// =============================================================================

fn stage(engine: &mut support::Engine, img: &[u8]) -> StatusRecord {
    for chunk in img.chunks(BLOCK_SIZE as usize) {
        engine.append_payload(chunk).unwrap();
    }
    engine.finalize_staging().unwrap()
}

#[test]
fn test_promotion_copies_image_and_checksum() {
    let (mut engine, _probe) = engine();
    let img = image(1000);
    let record = stage(&mut engine, &img);
    let active = engine.layout().active;
    engine.flash_mut().poke(active.start, &[0x00; 2048]);

    engine.promote_staged_to_active(&record).unwrap();

    let copied = engine.flash().peek(active.start, record.image_size).to_vec();
    assert_eq!(&copied[..1000], img.as_slice());
    assert!(copied[1000..].iter().all(|&b| b == 0xFF));
    assert_eq!(engine.region_checksum(active, record.image_size), Ok(record.image_checksum));
    assert_eq!(engine.flash().peek(active.start + 1024, 1024), &[0xFF; 1024][..]);
}

#[test]
fn test_promotion_erases_whole_active_region() {
    let (mut engine, _probe) = engine();
    let record = stage(&mut engine, &image(64));
    let active = engine.layout().active;
    engine.flash_mut().poke(active.end() - 4, &[0x12, 0x34, 0x56, 0x78]);

    engine.promote_staged_to_active(&record).unwrap();

    assert_eq!(engine.flash().peek(active.end() - 4, 4), &[0xFF; 4]);
}

#[test]
fn test_promotion_detects_checksum_mismatch() {
    let (mut engine, _probe) = engine();
    let img = image(256);
    let record = stage(&mut engine, &img);
    let tampered = StatusRecord::pending(record.image_size, record.image_checksum + 1);

    assert_eq!(
        engine.promote_staged_to_active(&tampered),
        Err(EngineError::ChecksumMismatch {
            expected: record.image_checksum + 1,
            actual: record.image_checksum,
        })
    );
}

#[test]
fn test_promotion_verify_failure() {
    let (mut engine, _probe) = engine();
    let record = stage(&mut engine, &image(512));
    let active = engine.layout().active;
    engine
        .flash_mut()
        .corrupt_programs(active.start..active.end(), 1);

    assert!(matches!(
        engine.promote_staged_to_active(&record),
        Err(EngineError::Flash(FlashError::Mismatch { .. }))
    ));

    // A second attempt starts from a fresh erase and succeeds
    assert_eq!(engine.promote_staged_to_active(&record), Ok(()));
}

#[test]
fn test_promotion_rejects_bad_sizes() {
    let (mut engine, _probe) = engine();
    for size in [0, 100, MAX_IMAGE_SIZE + BLOCK_SIZE] {
        assert_eq!(
            engine.promote_staged_to_active(&StatusRecord::pending(size, 0)),
            Err(EngineError::ImageSize { size })
        );
    }
    assert_eq!(engine.flash().erases, 0);
}

#[test]
fn test_read_region_is_bounds_checked() {
    let (mut engine, _probe) = engine();
    let active = engine.layout().active;
    let mut buf = [0u8; 8];

    assert_eq!(engine.read_region(active, 0, &mut buf), Ok(()));
    assert_eq!(
        engine.read_region(active, active.size() - 4, &mut buf),
        Err(EngineError::Flash(FlashError::OutOfRange {
            address: active.end() - 4
        }))
    );
}

// =============================================================================
// Interrupt gating
// =============================================================================

#[test]
fn test_every_backend_call_is_individually_gated() {
    let (mut engine, probe) = engine();
    let record = stage(&mut engine, &image(640));
    engine.promote_staged_to_active(&record).unwrap();

    assert_eq!(engine.flash().unguarded_ops, 0);
    assert_eq!(probe.depth(), 0);
    assert_eq!(probe.max_depth(), 1);
    // One hold per erase at least; never one hold for the whole region
    assert!(probe.holds() >= engine.flash().erases);
}

#[test]
fn test_gate_released_on_error_paths() {
    let (mut engine, probe) = engine();
    let staged = engine.layout().staged;
    engine.flash_mut().fail_erase_at(staged.start);

    assert!(engine.begin_staging().is_err());
    assert_eq!(probe.depth(), 0);

    let (mut engine, probe) = support::engine();
    engine.begin_staging().unwrap();
    engine
        .flash_mut()
        .corrupt_programs(staged.start..staged.end(), 1);
    assert!(engine.append_block(&block(0)).is_err());
    assert_eq!(probe.depth(), 0);
}
