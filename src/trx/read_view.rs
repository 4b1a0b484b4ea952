//! Read view: a transaction's MVCC snapshot (spec §4.7 "Visibility
//! predicate").

use crate::common::TrxId;

use super::sys::TrxSys;

/// A consistent read snapshot: every transaction that had committed at the
/// moment this view opened is visible; every transaction active at that
/// moment (including the creator) is visible only for its own changes.
#[derive(Debug, Clone)]
pub struct ReadView {
    pub creator_trx_id: TrxId,
    /// Smallest id among transactions active when the view opened; ids
    /// below this are guaranteed already committed.
    pub up_limit_id: TrxId,
    /// First id not yet handed out when the view opened; ids at or above
    /// this did not exist yet and can never be visible.
    pub low_limit_id: TrxId,
    /// Purge horizon this view pins; purge will not remove undo history
    /// for any transaction at or above this value (spec §4.7 "Purge").
    pub low_limit_no: u64,
    /// Ids active when the view opened, descending, so membership is a
    /// binary search (spec §4.7 rule 4).
    pub trx_ids: Vec<TrxId>,
}

impl ReadView {
    pub fn open(sys: &TrxSys, creator_trx_id: TrxId) -> Self {
        let (low_limit_id, trx_ids) = sys.snapshot_active_ids();
        let up_limit_id = trx_ids.last().copied().unwrap_or(low_limit_id);
        ReadView {
            creator_trx_id,
            up_limit_id,
            low_limit_id,
            low_limit_no: low_limit_id,
            trx_ids,
        }
    }

    /// Spec §4.7 visibility predicate, rules 1-4 in order.
    pub fn is_visible(&self, db_trx_id: TrxId) -> bool {
        if db_trx_id == self.creator_trx_id {
            return true;
        }
        if db_trx_id < self.up_limit_id {
            return true;
        }
        if db_trx_id >= self.low_limit_id {
            return false;
        }
        let found = self.trx_ids.binary_search_by(|probe| db_trx_id.cmp(probe)).is_ok();
        !found
    }
}

#[cfg(test)]
mod tests {
    use super::super::sys::TrxSys;

    #[test]
    fn own_changes_always_visible() {
        let sys = TrxSys::new();
        let trx = sys.begin();
        let view = trx.ensure_read_view(&sys);
        assert!(view.is_visible(trx.id));
    }

    #[test]
    fn future_trx_not_visible() {
        let sys = TrxSys::new();
        let trx = sys.begin();
        let view = trx.ensure_read_view(&sys);
        let later = sys.begin();
        assert!(!view.is_visible(later.id));
    }

    #[test]
    fn concurrently_active_trx_not_visible_until_committed() {
        let sys = TrxSys::new();
        let t1 = sys.begin();
        let t2 = sys.begin();
        let view = t1.ensure_read_view(&sys);
        assert!(!view.is_visible(t2.id));
    }

    #[test]
    fn committed_before_view_open_is_visible() {
        let sys = TrxSys::new();
        let old = sys.begin();
        old.commit(&sys);
        let t1 = sys.begin();
        let view = t1.ensure_read_view(&sys);
        assert!(view.is_visible(old.id));
    }
}
