//! Background purge: removes undo history no open read view can still need
//! (spec §4.7 "Purge").

use std::sync::Arc;

use crate::error::Result;

use super::sys::TrxSys;
use super::undo::UndoOp;

/// One purge pass: walks every rollback segment's history list, and for
/// every finished transaction strictly older than the purge horizon, hands
/// each of its delete-marked undo records to `reclaim` (pure-insert undo
/// needs no physical work; a delete-marked row is physically removed from
/// its indexes by the caller) before dropping the transaction's undo log
/// entirely. Returns the number of undo records processed.
pub fn run_purge_pass<F>(sys: &Arc<TrxSys>, mut reclaim: F) -> Result<usize>
where
    F: FnMut(u64, &[u8]) -> Result<()>,
{
    let horizon = sys.purge_view_low_limit().unwrap_or(u64::MAX);
    let mut processed = 0;
    for rseg in &sys.rsegs {
        let due = rseg.lock().drain_history_below(horizon, sys);
        for trx in due {
            for rec in trx.all_undo_records() {
                if matches!(rec.op, UndoOp::DeleteMark) {
                    reclaim(rec.table_id, &rec.key_image)?;
                }
                processed += 1;
            }
        }
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trx::sys::TrxSys;
    use crate::trx::undo::{UndoOp, UndoRecord};

    #[test]
    fn purge_reclaims_finished_trx_with_no_open_views() {
        let sys = TrxSys::new();
        let trx = sys.begin();
        trx.record_update_undo(UndoRecord {
            op: UndoOp::DeleteMark,
            table_id: 9,
            trx_id: trx.id,
            roll_ptr: None,
            key_image: vec![7],
            field_images: vec![],
        });
        trx.commit(&sys);

        let mut reclaimed = Vec::new();
        let n = run_purge_pass(&sys, |table_id, key| {
            reclaimed.push((table_id, key.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(reclaimed, vec![(9, vec![7])]);
        assert_eq!(sys.finished_count(), 0);
    }

    #[test]
    fn open_read_view_blocks_purge_of_later_commits() {
        let sys = TrxSys::new();
        let reader = sys.begin();
        let _view = reader.ensure_read_view(&sys);

        let writer = sys.begin();
        writer.record_insert_undo(UndoRecord {
            op: UndoOp::Insert,
            table_id: 1,
            trx_id: writer.id,
            roll_ptr: None,
            key_image: vec![1],
            field_images: vec![],
        });
        writer.commit(&sys);

        let n = run_purge_pass(&sys, |_, _| Ok(())).unwrap();
        assert_eq!(n, 0);
        assert_eq!(sys.finished_count(), 1);
    }
}
