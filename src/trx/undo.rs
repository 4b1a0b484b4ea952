//! Undo records and the rollback-segment history list (spec §4.7 "Rollback
//! segments", "Undo page").
//!
//! A real rollback segment anchors its insert-undo and update-undo logs as
//! on-disk page chains (`FSEG`-backed, like everything else in this
//! engine). Here each `Trx` keeps its own undo records in memory and a
//! `RollPtr` is an index into that in-memory log rather than a
//! `(space, page_no, offset)` triple — see DESIGN.md "rollback segments
//! kept in-memory". The history list and purge horizon tracking this
//! module implements are otherwise exactly spec shape.

use std::sync::Arc;

use crate::common::TrxId;

use super::sys::TrxSys;
use super::trx::Trx;

/// A back-link to one undo record, taking the place of `DB_ROLL_PTR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollPtr {
    pub trx_id: TrxId,
    pub is_insert: bool,
    pub index: u32,
}

/// Encoded width of [`RollPtr::encode`]: 8-byte trx id, 1-byte insert flag,
/// 4-byte undo-log index.
pub const ROLL_PTR_ENCODED_LEN: usize = 13;

impl RollPtr {
    /// Packs this pointer into the fixed-width `DB_ROLL_PTR` column a
    /// clustered row carries on disk (spec §4.7 "roll pointer"), mirroring
    /// `BlobRef::encode`'s fixed-layout convention.
    pub fn encode(&self) -> [u8; ROLL_PTR_ENCODED_LEN] {
        let mut out = [0u8; ROLL_PTR_ENCODED_LEN];
        out[0..8].copy_from_slice(&self.trx_id.to_be_bytes());
        out[8] = self.is_insert as u8;
        out[9..13].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        RollPtr {
            trx_id: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            is_insert: bytes[8] != 0,
            index: u32::from_be_bytes(bytes[9..13].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOp {
    Insert,
    UpdateInPlace,
    DeleteMark,
}

/// One undo log record: enough to reverse a single row modification and to
/// chain to the prior version for MVCC reconstruction (spec §4.7 "Undo
/// page").
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub op: UndoOp,
    pub table_id: u64,
    pub trx_id: TrxId,
    pub roll_ptr: Option<RollPtr>,
    /// Primary-key image, enough to locate the row being undone.
    pub key_image: Vec<u8>,
    /// Pre-image of the fields a `UPDATE_IN_PLACE` changed, empty otherwise.
    pub field_images: Vec<u8>,
}

struct HistoryEntry {
    trx_id: TrxId,
}

/// One rollback segment: the round-robin-selected home for a transaction's
/// undo logs while active, and the history list purge walks once it
/// commits (spec §4.7).
pub struct RollbackSegment {
    pub id: u32,
    history: Vec<HistoryEntry>,
}

impl RollbackSegment {
    pub fn new(id: u32) -> Self {
        RollbackSegment {
            id,
            history: Vec::new(),
        }
    }

    pub fn add_to_history(&mut self, trx_id: TrxId) {
        self.history.push(HistoryEntry { trx_id });
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Removes every history entry older than `horizon` and returns the
    /// finished transactions they belonged to, for the caller to purge.
    pub fn drain_history_below(&mut self, horizon: u64, sys: &TrxSys) -> Vec<Arc<Trx>> {
        let mut due = Vec::new();
        self.history.retain(|e| {
            if e.trx_id < horizon {
                if let Some(trx) = sys.take_finished(e.trx_id) {
                    due.push(trx);
                }
                false
            } else {
                true
            }
        });
        due
    }
}
