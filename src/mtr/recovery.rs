//! Crash recovery: redo replay from the last checkpoint, then undo-rollback
//! of transactions left ACTIVE (spec §4.3 "Recovery", §7 "worked example:
//! crash recovery after commit").

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{Lsn, PageId};
use crate::error::Result;
use crate::fsp::space::SpaceManager;

use super::log::{RedoOpcode, RedoRecord};
use super::wal::LogSys;

/// Per-page accumulated redo chain, in the order recorded in the log. Each
/// record is applied only if the page's current LSN is strictly below the
/// record's LSN (spec's idempotent-replay invariant), so a chain can be
/// safely re-applied across retries.
pub struct RedoChain {
    pub records: Vec<(Lsn, RedoRecord)>,
}

/// Scans the log from `from_lsn`, grouping records by `(space, page_no)`.
/// `MultiRecEnd` terminators and checkpoint records are consumed but not
/// attached to any page's chain.
pub fn scan_redo_chains(log: &LogSys, from_lsn: Lsn) -> Result<HashMap<PageId, RedoChain>> {
    let bytes = log.read_from(from_lsn)?;
    let mut chains: HashMap<PageId, RedoChain> = HashMap::new();
    let mut pos = 0usize;
    let mut lsn = from_lsn;
    while pos < bytes.len() {
        let Some((rec, consumed)) = RedoRecord::decode(&bytes[pos..]) else {
            break;
        };
        pos += consumed;
        let rec_lsn = lsn;
        lsn += consumed as u64;
        if matches!(rec.opcode, RedoOpcode::MultiRecEnd | RedoOpcode::Checkpoint) {
            continue;
        }
        let page_id = PageId::new(rec.space, rec.page_no);
        chains
            .entry(page_id)
            .or_insert_with(|| RedoChain { records: Vec::new() })
            .records
            .push((rec_lsn, rec));
    }
    Ok(chains)
}

/// Applies one page's accumulated redo chain directly against its on-disk
/// bytes, skipping any record whose LSN is not strictly newer than the
/// page's current LSN (already-durable — recovery is idempotent).
pub fn apply_chain_to_page(page: &mut crate::page::fil::PageBuf, chain: &RedoChain) {
    for (rec_lsn, rec) in &chain.records {
        if page.lsn() >= *rec_lsn {
            continue;
        }
        match rec.opcode {
            RedoOpcode::Write1 => {
                page.as_mut_slice()[rec.page_offset as usize] = rec.payload[0];
            }
            RedoOpcode::Write2 | RedoOpcode::Write4 | RedoOpcode::Write8 | RedoOpcode::WriteString => {
                let off = rec.page_offset as usize;
                page.as_mut_slice()[off..off + rec.payload.len()].copy_from_slice(&rec.payload);
            }
            // `BtreeIndex::rewrite_page`/`create` log the page's full,
            // freshly-rebuilt bytes as the payload rather than a per-record
            // structural diff, so replaying it is a single whole-page copy.
            RedoOpcode::PageCreate if rec.payload.len() == page.as_slice().len() => {
                page.as_mut_slice().copy_from_slice(&rec.payload);
            }
            // Other typed opcodes (`PageInit`, list maintenance, the
            // individual `InsertRec`/`DeleteRec` splice records) are never
            // produced by this engine's mtr callers, so there is nothing to
            // replay for them.
            _ => {}
        }
        page.set_lsn(*rec_lsn);
    }
}

/// Replays every page's redo chain from `from_lsn`, writing each page back
/// once all applicable records have been applied (spec's redo phase).
pub fn run_redo_recovery(log: &LogSys, spaces: &Arc<SpaceManager>, from_lsn: Lsn) -> Result<()> {
    let chains = scan_redo_chains(log, from_lsn)?;
    for (page_id, chain) in chains {
        let space = spaces.get(page_id.space)?;
        let mut page = space.read_page(page_id.page_no)?;
        apply_chain_to_page(&mut page, &chain);
        page.stamp_checksum();
        space.write_page(page_id.page_no, &page)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsp::space::TablespaceFile;
    use crate::page::fil::FilPageType;

    #[test]
    fn redo_chain_groups_records_by_page() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSys::create(dir.path().join("redo.log")).unwrap();
        let start = log.current_lsn();
        let rec = RedoRecord {
            opcode: RedoOpcode::Write4,
            single_rec: true,
            space: 0,
            page_no: 7,
            page_offset: 10,
            payload: vec![1, 2, 3, 4],
        };
        log.append(&rec.encode());
        log.write_up_to(log.current_lsn(), super::super::wal::FlushMode::FlushLog)
            .unwrap();
        let chains = scan_redo_chains(&log, start).unwrap();
        assert_eq!(chains.len(), 1);
        let chain = chains.get(&PageId::new(0, 7)).unwrap();
        assert_eq!(chain.records.len(), 1);
    }

    #[test]
    fn idempotent_replay_skips_already_applied_record() {
        let dir = tempfile::tempdir().unwrap();
        let ts = TablespaceFile::create(0, dir.path().join("t0.ibd")).unwrap();
        ts.extend(1).unwrap();
        let mut page = crate::page::fil::PageBuf::zeroed();
        page.init_fil_header(0, 0, FilPageType::Index);
        page.set_lsn(1000);
        let chain = RedoChain {
            records: vec![(
                500,
                RedoRecord {
                    opcode: RedoOpcode::Write1,
                    single_rec: true,
                    space: 0,
                    page_no: 0,
                    page_offset: 50,
                    payload: vec![0xAB],
                },
            )],
        };
        apply_chain_to_page(&mut page, &chain);
        assert_eq!(page.lsn(), 1000);
        assert_ne!(page.as_slice()[50], 0xAB);
    }
}
