//! Transaction system singleton: id allocation, the active-transaction
//! table, and the rollback segment array (spec §4.7 "Trx-sys header").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::common::TrxId;

use super::trx::Trx;
use super::undo::{RollPtr, RollbackSegment, UndoRecord};

/// Trx ids are handed out in batches of this size: the trx-sys header page
/// (page 5 of the system tablespace) is rewritten only once per margin, so
/// recovery can always mint an id strictly above any committed-but-not-yet-
/// durable value (spec §4.7).
pub const TRX_SYS_TRX_ID_WRITE_MARGIN: u64 = 256;

pub const N_ROLLBACK_SEGMENTS: usize = 8;

pub struct TrxSys {
    next_trx_id: AtomicU64,
    durable_trx_id: AtomicU64,
    active: DashMap<TrxId, Arc<Trx>>,
    finished: DashMap<TrxId, Arc<Trx>>,
    pub rsegs: Vec<Mutex<RollbackSegment>>,
}

impl TrxSys {
    pub fn new() -> Arc<Self> {
        Arc::new(TrxSys {
            next_trx_id: AtomicU64::new(1),
            durable_trx_id: AtomicU64::new(TRX_SYS_TRX_ID_WRITE_MARGIN),
            active: DashMap::new(),
            finished: DashMap::new(),
            rsegs: (0..N_ROLLBACK_SEGMENTS).map(|i| Mutex::new(RollbackSegment::new(i as u32))).collect(),
        })
    }

    /// Restores the id counter from a persisted trx-sys header's
    /// `max_trx_id` at recovery, re-establishing the write margin above it.
    pub fn recover_from(max_trx_id: TrxId) -> Arc<Self> {
        let sys = Self::new();
        sys.next_trx_id.store(max_trx_id, Ordering::SeqCst);
        sys.durable_trx_id.store(max_trx_id + TRX_SYS_TRX_ID_WRITE_MARGIN, Ordering::SeqCst);
        sys
    }

    /// Advances the durable margin once `id` reaches it. In a full
    /// implementation this also schedules a write of the new margin to the
    /// trx-sys header page via an `Mtr`; `TrxSys` itself is page-I/O
    /// agnostic, so that write is the caller's responsibility (`engine`
    /// wires it once the trx-sys header page exists).
    fn bump_durable_margin_if_needed(&self, id: TrxId) -> bool {
        loop {
            let durable = self.durable_trx_id.load(Ordering::SeqCst);
            if id < durable {
                return false;
            }
            let new_durable = id + TRX_SYS_TRX_ID_WRITE_MARGIN;
            if self
                .durable_trx_id
                .compare_exchange(durable, new_durable, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn begin(self: &Arc<Self>) -> Arc<Trx> {
        let id = self.next_trx_id.fetch_add(1, Ordering::SeqCst);
        self.bump_durable_margin_if_needed(id);
        let rseg_idx = (id as usize) % self.rsegs.len();
        let trx = Arc::new(Trx::new(id, rseg_idx));
        self.active.insert(id, Arc::clone(&trx));
        trx
    }

    pub fn max_assigned_trx_id(&self) -> TrxId {
        self.next_trx_id.load(Ordering::SeqCst)
    }

    /// `(low_limit_id, active ids descending)` for opening a read view
    /// (spec §4.7 rules 2-4): `low_limit_id` is the first id not yet
    /// assigned, and every currently active id is reported so the view can
    /// treat them as not-yet-committed regardless of what they do next.
    pub fn snapshot_active_ids(&self) -> (TrxId, Vec<TrxId>) {
        let low_limit = self.next_trx_id.load(Ordering::SeqCst);
        let mut ids: Vec<TrxId> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        (low_limit, ids)
    }

    /// Minimum `low_limit_no` over currently open read views — the purge
    /// horizon (spec §4.7 "Purge"). `None` when no view is open, meaning
    /// purge may reclaim everything finished so far.
    pub fn purge_view_low_limit(&self) -> Option<u64> {
        self.active.iter().filter_map(|e| e.value().read_view().map(|v| v.low_limit_no)).min()
    }

    /// Moves a finished transaction from `active` to `finished` and records
    /// its rollback segment's history list entry, so purge can find it
    /// later (spec §4.7 "Purge": "a background worker ... for every
    /// history-list undo record ...").
    pub(crate) fn retire(&self, trx: Arc<Trx>) {
        let id = trx.id;
        let rseg_idx = trx.rseg_idx;
        self.active.remove(&id);
        self.rsegs[rseg_idx].lock().add_to_history(id);
        self.finished.insert(id, trx);
    }

    pub(crate) fn take_finished(&self, id: TrxId) -> Option<Arc<Trx>> {
        self.finished.remove(&id).map(|(_, v)| v)
    }

    /// Chases a `DB_ROLL_PTR` into whichever transaction still holds it
    /// (active, mid-rollback, or finished awaiting purge), without removing
    /// it — used by a reader reconstructing an older row version (spec §4.7
    /// "the reader follows DB_ROLL_PTR into the undo log").
    pub fn undo_record(&self, ptr: RollPtr) -> Option<UndoRecord> {
        if let Some(trx) = self.active.get(&ptr.trx_id) {
            return trx.undo_record_at(ptr);
        }
        self.finished.get(&ptr.trx_id).and_then(|trx| trx.undo_record_at(ptr))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let sys = TrxSys::new();
        let a = sys.begin();
        let b = sys.begin();
        assert!(b.id > a.id);
    }

    #[test]
    fn rollback_segment_assignment_is_round_robin() {
        let sys = TrxSys::new();
        let trxs: Vec<_> = (0..N_ROLLBACK_SEGMENTS + 2).map(|_| sys.begin()).collect();
        let distinct: std::collections::HashSet<_> = trxs.iter().map(|t| t.rseg_idx).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn commit_moves_trx_from_active_to_finished() {
        let sys = TrxSys::new();
        let trx = sys.begin();
        assert_eq!(sys.active_count(), 1);
        trx.commit(&sys);
        assert_eq!(sys.active_count(), 0);
        assert_eq!(sys.finished_count(), 1);
    }
}
