// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire protocol state machine.
//!
//! Polled from the foreground loop. Each call drains whatever bytes the
//! [`ByteSource`] holds, assembling at most one packet at a time, and returns
//! as soon as it needs more input. Waiting is a state, never a block.
//!
//! ```text
//! Idle -> InitiateReceive -> FindHeader -> CheckType -> CheckSize
//!      -> CheckCommand -> ExtractPayload -> Validate
//!      -> WriteToFlash -> SendReply -> InitiateReceive ...       (write)
//!      -> FinalizeIfCommit -> ResetDevice                         (commit)
//! ```
//!
//! Malformed type, size or command bytes drop the packet silently and the
//! machine goes back to hunting for a header; the rejected byte is consumed
//! even when it equals [`HEADER`]. A packet that stalls for [`RX_TIMEOUT_MS`]
//! is dropped. It is answered with a timeout NACK only once its command byte
//! has been accepted.

use crate::backend::{EventGate, FlashBackend, PersistentStore};
use crate::engine::UpdateEngine;
use crate::log;
use crate::packet::{
    is_frame_intact, Command, NackCode, Reply, DATA_PACKET_TYPE, HEADER, MAX_FRAME_LEN,
    MIN_FRAME_LEN,
};
use crate::queue::ByteSource;
use crate::status::{StatusError, StatusRecord, StatusStore};

/// Inactivity allowed between two bytes of the same packet.
pub const RX_TIMEOUT_MS: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    Idle,
    InitiateReceive,
    FindHeader,
    CheckType,
    CheckSize,
    CheckCommand,
    ExtractPayload,
    Validate,
    WriteToFlash,
    SendReply,
    FinalizeIfCommit,
    ResetDevice,
}

/// Transmit side of the serial link.
pub trait ReplyLink {
    fn send(&mut self, frame: &[u8]);
}

/// What the persisted record says after a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommitOutcome {
    /// A staged image is pending promotion.
    Pending,
    /// The staged image was abandoned.
    Discarded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll {
    /// Need more bytes.
    Waiting,
    /// Status persisted; the caller must reset the device now.
    Reset(CommitOutcome),
    /// Status could not be persisted even after a retry.
    Fatal(StatusError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolStats {
    /// Complete packets that reached `Validate`.
    pub packets: u32,
    /// Packets dropped on a bad type, size or command byte.
    pub resyncs: u32,
    pub checksum_failures: u32,
    pub write_failures: u32,
    pub timeouts: u32,
}

pub struct WireProtocol {
    state: RxState,
    frame: heapless::Vec<u8, { MAX_FRAME_LEN as usize }>,
    expected_len: u8,
    command: Command,
    checksum_ok: bool,
    write_ok: bool,
    last_byte_ms: u64,
    outcome: CommitOutcome,
    stats: ProtocolStats,
}

impl WireProtocol {
    pub const fn new() -> Self {
        Self {
            state: RxState::Idle,
            frame: heapless::Vec::new(),
            expected_len: 0,
            command: Command::Write,
            checksum_ok: false,
            write_ok: false,
            last_byte_ms: 0,
            outcome: CommitOutcome::Discarded,
            stats: ProtocolStats {
                packets: 0,
                resyncs: 0,
                checksum_failures: 0,
                write_failures: 0,
                timeouts: 0,
            },
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    /// Run the machine until it runs out of input or needs a reset.
    pub fn poll<S, F, G, P, H, L>(
        &mut self,
        source: &mut S,
        engine: &mut UpdateEngine<F, G>,
        status: &mut StatusStore<P, H>,
        link: &mut L,
        now_ms: u64,
    ) -> Poll
    where
        S: ByteSource,
        F: FlashBackend,
        G: EventGate,
        P: PersistentStore,
        H: EventGate,
        L: ReplyLink,
    {
        loop {
            match self.state {
                RxState::Idle => self.state = RxState::InitiateReceive,

                RxState::InitiateReceive => {
                    self.frame.clear();
                    self.expected_len = 0;
                    self.checksum_ok = false;
                    self.write_ok = false;
                    self.state = RxState::FindHeader;
                }

                RxState::FindHeader => {
                    let Some(byte) = source.next_byte() else {
                        return Poll::Waiting;
                    };
                    if byte == HEADER {
                        self.start_packet(now_ms);
                    }
                }

                RxState::CheckType
                | RxState::CheckSize
                | RxState::CheckCommand
                | RxState::ExtractPayload => match source.next_byte() {
                    Some(byte) => {
                        self.last_byte_ms = now_ms;
                        self.accept(byte);
                    }
                    None if now_ms.saturating_sub(self.last_byte_ms) >= RX_TIMEOUT_MS => {
                        log::warn!("packet stalled in {}, dropping", self.state);
                        self.stats.timeouts += 1;
                        // Only a frame with an accepted command is answered;
                        // a lone header byte is line noise.
                        if self.state == RxState::ExtractPayload {
                            link.send(&Reply::Nack(NackCode::Timeout).encode());
                        }
                        self.state = RxState::InitiateReceive;
                    }
                    None => return Poll::Waiting,
                },

                RxState::Validate => {
                    self.stats.packets += 1;
                    self.checksum_ok = is_frame_intact(&self.frame);
                    if !self.checksum_ok {
                        self.stats.checksum_failures += 1;
                    }
                    self.state = match self.command {
                        Command::Write => RxState::WriteToFlash,
                        Command::CommitOk | Command::CommitFail => RxState::FinalizeIfCommit,
                    };
                }

                RxState::WriteToFlash => {
                    let payload = &self.frame[4..self.frame.len() - 1];
                    self.write_ok = match engine.append_payload(payload) {
                        Ok(_) => true,
                        Err(_e) => {
                            log::warn!("write rejected: {}", _e);
                            self.stats.write_failures += 1;
                            false
                        }
                    };
                    self.state = RxState::SendReply;
                }

                RxState::SendReply => {
                    let reply = if !self.write_ok {
                        Reply::Nack(NackCode::WriteFailure)
                    } else if !self.checksum_ok {
                        Reply::Nack(NackCode::ChecksumFailure)
                    } else {
                        Reply::Ack
                    };
                    link.send(&reply.encode());
                    self.state = RxState::InitiateReceive;
                }

                RxState::FinalizeIfCommit => {
                    let (record, outcome) = self.finalize(engine);
                    if let Err(e) = status.save_with_retry(&record) {
                        log::error!("status record not saved: {}", e);
                        self.state = RxState::Idle;
                        return Poll::Fatal(e);
                    }
                    self.outcome = outcome;
                    self.state = RxState::ResetDevice;
                }

                RxState::ResetDevice => return Poll::Reset(self.outcome),
            }
        }
    }

    fn start_packet(&mut self, now_ms: u64) {
        self.frame.clear();
        self.push(HEADER);
        self.last_byte_ms = now_ms;
        self.state = RxState::CheckType;
    }

    /// Feed one byte to a mid-packet state.
    fn accept(&mut self, byte: u8) {
        match self.state {
            RxState::CheckType if byte == DATA_PACKET_TYPE => {
                self.push(byte);
                self.state = RxState::CheckSize;
            }
            RxState::CheckSize if byte >= MIN_FRAME_LEN => {
                self.push(byte);
                self.expected_len = byte;
                self.state = RxState::CheckCommand;
            }
            RxState::CheckCommand => match Command::try_from(byte) {
                Ok(command) => {
                    self.push(byte);
                    self.command = command;
                    // A zero-length payload goes straight to the checksum byte.
                    self.state = RxState::ExtractPayload;
                }
                Err(_) => self.resync(),
            },
            RxState::ExtractPayload => {
                self.push(byte);
                if self.frame.len() == usize::from(self.expected_len) {
                    self.state = RxState::Validate;
                }
            }
            _ => self.resync(),
        }
    }

    /// Drop the packet being assembled, rejected byte included, and hunt
    /// for the next header.
    fn resync(&mut self) {
        self.stats.resyncs += 1;
        self.state = RxState::InitiateReceive;
    }

    fn push(&mut self, byte: u8) {
        // `expected_len` never exceeds the buffer capacity.
        let _ = self.frame.push(byte);
    }

    fn finalize<F: FlashBackend, G: EventGate>(
        &self,
        engine: &mut UpdateEngine<F, G>,
    ) -> (StatusRecord, CommitOutcome) {
        if self.command == Command::CommitOk {
            match engine.finalize_staging() {
                Ok(record) => {
                    log::info!("commit: image pending promotion");
                    return (record, CommitOutcome::Pending);
                }
                Err(_e) => {
                    log::warn!("commit-ok on unusable session ({}), discarding", _e);
                }
            }
        } else {
            log::info!("commit: transfer abandoned by host");
        }
        (StatusRecord::cleared(), CommitOutcome::Discarded)
    }
}

impl Default for WireProtocol {
    fn default() -> Self {
        Self::new()
    }
}
