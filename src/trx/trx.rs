//! A single transaction's lifecycle state (spec §4.7).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::TrxId;
use crate::error::Result;

use super::read_view::ReadView;
use super::sys::TrxSys;
use super::undo::{RollPtr, UndoRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    Active,
    Committed,
    RolledBack,
}

const STATE_ACTIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;
const STATE_ROLLED_BACK: u8 = 2;

/// One insert-undo and one update-undo log per rollback segment per active
/// transaction (spec §4.7 "Rollback segments"). See `undo` module doc for
/// why the logs live here in memory rather than as addressed undo pages.
pub struct Trx {
    pub id: TrxId,
    pub rseg_idx: usize,
    state: AtomicU8,
    read_view: Mutex<Option<ReadView>>,
    insert_undo: Mutex<Vec<UndoRecord>>,
    update_undo: Mutex<Vec<UndoRecord>>,
}

impl Trx {
    pub fn new(id: TrxId, rseg_idx: usize) -> Self {
        Trx {
            id,
            rseg_idx,
            state: AtomicU8::new(STATE_ACTIVE),
            read_view: Mutex::new(None),
            insert_undo: Mutex::new(Vec::new()),
            update_undo: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> TrxState {
        match self.state.load(Ordering::Acquire) {
            STATE_COMMITTED => TrxState::Committed,
            STATE_ROLLED_BACK => TrxState::RolledBack,
            _ => TrxState::Active,
        }
    }

    /// Opens this transaction's read view on first use and reuses it for
    /// the rest of the transaction's lifetime — see DESIGN.md "isolation
    /// level" for why this engine fixes repeatable-read semantics rather
    /// than re-opening a view per statement.
    pub fn ensure_read_view(&self, sys: &TrxSys) -> ReadView {
        let mut guard = self.read_view.lock();
        if let Some(v) = &*guard {
            return v.clone();
        }
        let view = ReadView::open(sys, self.id);
        *guard = Some(view.clone());
        view
    }

    pub fn read_view(&self) -> Option<ReadView> {
        self.read_view.lock().clone()
    }

    pub fn record_insert_undo(&self, rec: UndoRecord) -> RollPtr {
        let mut log = self.insert_undo.lock();
        log.push(rec);
        RollPtr {
            trx_id: self.id,
            is_insert: true,
            index: (log.len() - 1) as u32,
        }
    }

    pub fn record_update_undo(&self, rec: UndoRecord) -> RollPtr {
        let mut log = self.update_undo.lock();
        log.push(rec);
        RollPtr {
            trx_id: self.id,
            is_insert: false,
            index: (log.len() - 1) as u32,
        }
    }

    pub fn undo_record_at(&self, ptr: RollPtr) -> Option<UndoRecord> {
        let log = if ptr.is_insert { &self.insert_undo } else { &self.update_undo };
        log.lock().get(ptr.index as usize).cloned()
    }

    pub fn all_undo_records(&self) -> Vec<UndoRecord> {
        let mut records = self.insert_undo.lock().clone();
        records.extend(self.update_undo.lock().iter().cloned());
        records
    }

    pub fn commit(self: &Arc<Self>, sys: &TrxSys) {
        self.state.store(STATE_COMMITTED, Ordering::Release);
        sys.retire(Arc::clone(self));
    }

    /// Rolls back by applying `apply` to every undo record, most recent
    /// first (update-undo before insert-undo, each log in reverse), then
    /// marks the transaction finished (spec §4.7 "Undo page").
    pub fn rollback<F>(self: &Arc<Self>, sys: &TrxSys, mut apply: F) -> Result<()>
    where
        F: FnMut(&UndoRecord) -> Result<()>,
    {
        for rec in self.update_undo.lock().iter().rev() {
            apply(rec)?;
        }
        for rec in self.insert_undo.lock().iter().rev() {
            apply(rec)?;
        }
        self.state.store(STATE_ROLLED_BACK, Ordering::Release);
        sys.retire(Arc::clone(self));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::sys::TrxSys;
    use super::super::undo::{UndoOp, UndoRecord};
    use super::*;

    #[test]
    fn commit_marks_state() {
        let sys = TrxSys::new();
        let trx = sys.begin();
        trx.commit(&sys);
        assert_eq!(trx.state(), TrxState::Committed);
    }

    #[test]
    fn rollback_applies_in_reverse_order() {
        let sys = TrxSys::new();
        let trx = sys.begin();
        trx.record_insert_undo(UndoRecord {
            op: UndoOp::Insert,
            table_id: 1,
            trx_id: trx.id,
            roll_ptr: None,
            key_image: vec![1],
            field_images: vec![],
        });
        trx.record_insert_undo(UndoRecord {
            op: UndoOp::Insert,
            table_id: 1,
            trx_id: trx.id,
            roll_ptr: None,
            key_image: vec![2],
            field_images: vec![],
        });
        let mut seen = Vec::new();
        trx.rollback(&sys, |rec| {
            seen.push(rec.key_image.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![vec![2], vec![1]]);
        assert_eq!(trx.state(), TrxState::RolledBack);
    }
}
