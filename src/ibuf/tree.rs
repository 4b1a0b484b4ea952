//! The insert buffer itself: admission into the buffered-change queue for a
//! non-resident secondary-index page, and the merge back onto that page
//! once it's read in (spec §4.9 `ibuf_insert`, `ibuf_merge_or_delete_for_page`,
//! `ibuf_contract`).
//!
//! Two stores back every buffered entry: an in-memory `pending` map, which
//! is what `merge_or_delete_for_page` actually drains, and an on-disk B-tree
//! that exists purely so `ibuf_insert`'s write is WAL-logged like any other
//! tablespace modification (spec §4.9 "crash safety"). Recovery replays the
//! tree's inserts/deletes like any other redo, but there is no
//! `IbufTree::load_pending` to repopulate `pending` from the recovered tree
//! afterward: this engine's `BtreeIndex` has only point `get` (exact or
//! longest-prefix match on a known key), not a range-scan cursor, and a
//! `(space, page_no)` prefix is shared by every entry still pending for
//! that page, so a prefix `get` can only ever recover the single
//! lowest-`seq` entry, never the rest (see DESIGN.md "ibuf load_pending").
//! In-process, `pending` is always populated by `ibuf_insert` itself, so
//! this only matters for reopening a database after a restart, which this
//! engine does not yet support for other reasons either (see
//! `engine::Engine`'s recovery-scope notes).

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::{BufferPool, LatchMode};
use crate::common::{IndexId, PageId, PageNo, SpaceId};
use crate::error::Result;
use crate::fsp::FileSpace;
use crate::index::BtreeIndex;
use crate::mtr::{LogSys, Mtr, RedoOpcode};
use crate::page::fil::{FilPageType, PageBuf, FIL_PAGE_DATA};
use crate::page::record::{CompactHeader, RecType};
use crate::page::{self, header};
use crate::row::dtuple::{compare_tuples, BinaryCollation, ColumnType, DField, DTuple};
use crate::row::{rec_build_for_insert, ColumnMeta};
use crate::trx::lock::LockManager;

use super::bitmap::{self, IbufBitmap, BITMAP_BYTES};

/// Index id the on-disk ibuf tree's own leaf/node pages carry, distinct from
/// any user index id so the read hook can recognize (and skip) the ibuf
/// tree's own pages rather than trying to merge into them.
pub const IBUF_TREE_INDEX_ID: IndexId = u64::MAX - 1;

const TAG_INT: u8 = 0;
const TAG_BIGINT: u8 = 1;
const TAG_BINARY: u8 = 2;
const TAG_VARBINARY: u8 = 3;
const TAG_TEXT: u8 = 4;

fn tag_of(t: ColumnType) -> u8 {
    match t {
        ColumnType::Int => TAG_INT,
        ColumnType::BigInt => TAG_BIGINT,
        ColumnType::Binary => TAG_BINARY,
        ColumnType::VarBinary => TAG_VARBINARY,
        ColumnType::Text => TAG_TEXT,
    }
}

fn type_of_tag(tag: u8) -> ColumnType {
    match tag {
        TAG_INT => ColumnType::Int,
        TAG_BIGINT => ColumnType::BigInt,
        TAG_BINARY => ColumnType::Binary,
        TAG_VARBINARY => ColumnType::VarBinary,
        _ => ColumnType::Text,
    }
}

/// Packs the originating index's column metadata and the buffered row into
/// one opaque payload (spec §4.9: ibuf tree rows carry "packed_types" plus
/// the original index's fields so a merge can reconstruct a dummy index
/// descriptor without touching the dictionary).
fn encode_payload(columns: &[ColumnMeta], tuple: &DTuple) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(columns.len() as u32).to_be_bytes());
    for col in columns {
        out.push(tag_of(col.col_type));
        out.push(col.nullable as u8);
        match col.fixed_len {
            Some(n) => {
                out.push(1);
                out.extend_from_slice(&(n as u32).to_be_bytes());
            }
            None => out.push(0),
        }
    }
    for field in &tuple.fields {
        out.push(field.is_null as u8);
        if !field.is_null {
            out.extend_from_slice(&(field.data.len() as u32).to_be_bytes());
            out.extend_from_slice(&field.data);
        }
    }
    out
}

fn decode_payload(bytes: &[u8]) -> (Vec<ColumnMeta>, DTuple) {
    let mut pos = 0usize;
    let n_cols = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    pos += 4;
    let mut columns = Vec::with_capacity(n_cols);
    for _ in 0..n_cols {
        let tag = bytes[pos];
        let nullable = bytes[pos + 1] != 0;
        let has_fixed = bytes[pos + 2];
        pos += 3;
        let fixed_len = if has_fixed != 0 {
            let n = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            Some(n)
        } else {
            None
        };
        columns.push(ColumnMeta {
            col_type: type_of_tag(tag),
            nullable,
            fixed_len,
        });
    }
    let mut tuple = DTuple::new();
    for col in &columns {
        let is_null = bytes[pos] != 0;
        pos += 1;
        if is_null {
            tuple.fields.push(DField::null(col.col_type));
            continue;
        }
        let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let data = bytes[pos..pos + len].to_vec();
        pos += len;
        tuple.fields.push(DField::inline(col.col_type, data));
    }
    (columns, tuple)
}

/// The key columns of the on-disk ibuf tree: `(space_page, seq)`, where
/// `space_page` packs `(space, page_no)` into one sortable 8-byte value so
/// every entry for a page is keyed together, and `seq` orders entries for
/// the same page by arrival (spec §4.9's key additionally sorts on the
/// packed types and original fields; this engine's B-tree only supports
/// exact `get`/`delete`, so that finer ordering is only needed for the
/// in-memory `pending` queue, not for the on-disk row's identity).
fn ibuf_tree_key(space: SpaceId, page_no: PageNo, seq: u32) -> DTuple {
    let space_page = ((space as u64) << 32) | page_no as u64;
    DTuple::new()
        .push(DField::inline(ColumnType::BigInt, space_page.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, seq.to_be_bytes().to_vec()))
}

fn ibuf_tree_columns() -> Vec<ColumnMeta> {
    vec![
        ColumnMeta {
            col_type: ColumnType::BigInt,
            nullable: false,
            fixed_len: Some(8),
        },
        ColumnMeta {
            col_type: ColumnType::Int,
            nullable: false,
            fixed_len: Some(4),
        },
        ColumnMeta {
            col_type: ColumnType::Text,
            nullable: false,
            fixed_len: None,
        },
    ]
}

struct PendingEntry {
    seq: u32,
    columns: Vec<ColumnMeta>,
    tuple: DTuple,
}

/// Conservative estimate of a record's encoded size on a page, matching the
/// B-tree layer's own split-threshold estimator (spec §4.5/§4.9).
fn estimate_record_size(tuple: &DTuple) -> usize {
    crate::page::record::REC_COMPACT_HEADER_SIZE + tuple.fields.len().div_ceil(8) + tuple.fields.len() * 2 + tuple.packed_size()
}

fn free_bytes_estimate(page: &PageBuf) -> usize {
    const PAGE_CAPACITY: usize = crate::common::PAGE_SIZE - page::PAGE_DATA - 8;
    PAGE_CAPACITY.saturating_sub(header::heap_top(page) as usize)
}

/// Rewrites a leaf page's record chain from `tuples`, preserving its
/// existing file header (space/page_no/prev/next/index_id) — the merge path
/// never moves a page's identity or sibling links, only its contents
/// (mirrors `BtreeIndex::rewrite_page`, specialized to level 0 and without
/// access to a live `BtreeIndex`).
fn rewrite_leaf_records(buf: &mut PageBuf, columns: &[ColumnMeta], tuples: &[DTuple]) -> Result<()> {
    header::set_n_dir_slots(buf, 2);
    let mut cursor = page::PAGE_DATA;
    let mut prev_origin = page::PAGE_INFIMUM_OFFSET;
    for (i, tuple) in tuples.iter().enumerate() {
        let heap_no = (i + 2) as u16;
        let built = rec_build_for_insert(tuple, columns, heap_no, RecType::Ordinary, |_, _| {
            Err(crate::error::EngineError::Internal(
                "externally stored fields are not supported on the ibuf merge path".into(),
            ))
        })?;
        let header_start = cursor;
        let origin = header_start + built.header.len();
        let bytes = buf.as_mut_slice();
        bytes[header_start..origin].copy_from_slice(&built.header);
        bytes[origin..origin + built.data.len()].copy_from_slice(&built.data);

        let mut prev_rec = CompactHeader::read(bytes, prev_origin);
        prev_rec.set_next_origin(prev_origin, origin);
        prev_rec.write(bytes, prev_origin);

        prev_origin = origin;
        cursor = origin + built.data.len();
    }
    {
        let bytes = buf.as_mut_slice();
        let mut prev_rec = CompactHeader::read(bytes, prev_origin);
        prev_rec.set_next_origin(prev_origin, page::PAGE_SUPREMUM_OFFSET);
        prev_rec.write(bytes, prev_origin);
    }
    header::set_n_recs(buf, tuples.len() as u16);
    header::set_n_heap(buf, (tuples.len() + 2) as u16);
    header::set_heap_top(buf, (cursor - FIL_PAGE_DATA) as u16);
    Ok(())
}

fn read_all_tuples(buf: &PageBuf, columns: &[ColumnMeta]) -> Vec<DTuple> {
    page::iter_records_on(buf.as_slice())
        .map(|origin| crate::index::cursor::read_record_tuple(buf.as_slice(), origin, columns))
        .collect()
}

/// Lazily stamps a virgin bitmap page the first time it's touched
/// (page_type defaults to `Allocated` / all-zero for a never-written page),
/// otherwise decodes the bits already there.
fn read_or_init_bitmap(mtr: &mut Mtr, frame_id: usize, space: SpaceId, bitmap_page_no: PageNo) -> IbufBitmap {
    let already_init = mtr.page_ref(frame_id).page_type() == FilPageType::IbufBitmap as u16;
    if already_init {
        let bytes = mtr.page_ref(frame_id).as_slice();
        return IbufBitmap::from_bytes(&bytes[FIL_PAGE_DATA..FIL_PAGE_DATA + BITMAP_BYTES]);
    }
    let bm = IbufBitmap::new_all_free();
    {
        let buf = mtr.page_mut(frame_id);
        buf.init_fil_header(space, bitmap_page_no, FilPageType::IbufBitmap);
    }
    mtr.log_typed(frame_id, RedoOpcode::PageInit, vec![]);
    mtr.page_write_string(frame_id, FIL_PAGE_DATA as u16, &bm.to_bytes());
    bm
}

/// The insert buffer: bitmap pages plus the queue of changes still waiting
/// to be merged into their target secondary-index pages (spec §4.9).
pub struct IbufTree {
    pool: Arc<BufferPool>,
    tree: BtreeIndex,
    lock_manager: Arc<LockManager>,
    pending: DashMap<(SpaceId, PageNo), Mutex<Vec<PendingEntry>>>,
    next_seq: AtomicU32,
    /// Reentrancy guard: an insert or merge already touching the ibuf tree
    /// must not recursively enter `ibuf_insert` for another secondary
    /// index's record, which would violate the latch order between a
    /// page's own latch and the ibuf tree's (spec §4.9 `ibuf_inside`).
    inside: AtomicBool,
    n_entries: AtomicU32,
}

impl IbufTree {
    /// Creates the insert buffer's own B-tree (always non-unique — it holds
    /// one row per buffered change, keyed by arrival order, never a user
    /// key) in `space`.
    pub fn create(space_id: SpaceId, space: Arc<FileSpace>, pool: Arc<BufferPool>, lock_manager: Arc<LockManager>, log: &LogSys) -> Result<Self> {
        let tree = BtreeIndex::create(space_id, IBUF_TREE_INDEX_ID, ibuf_tree_columns(), 2, true, space, pool.clone(), log)?;
        Ok(IbufTree {
            pool,
            tree,
            lock_manager,
            pending: DashMap::new(),
            next_seq: AtomicU32::new(0),
            inside: AtomicBool::new(false),
            n_entries: AtomicU32::new(0),
        })
    }

    /// True for a page belonging to the ibuf tree itself, or a bitmap page —
    /// the read hook must never try to merge into either (spec §4.9: ibuf
    /// bookkeeping pages are never themselves ibuf-eligible).
    pub fn is_ibuf_internal_page(page: &PageBuf) -> bool {
        if page.page_type() == FilPageType::IbufBitmap as u16 {
            return true;
        }
        page.page_type() == FilPageType::Index as u16 && header::index_id(page) == IBUF_TREE_INDEX_ID
    }

    fn compare_full(a: &DTuple, b: &DTuple) -> Ordering {
        compare_tuples(a, b, &BinaryCollation).ordering
    }

    /// Attempts to buffer `tuple` (a full secondary-index leaf row) for
    /// later application to `(space, page_no)`, rather than reading that
    /// page in now (spec §4.9 `ibuf_insert`). Returns `false` (caller must
    /// fall back to an ordinary, immediate insert) whenever any of the
    /// guard conditions fail: the index is unique, the page is already
    /// resident, a record lock already exists on it, there isn't enough
    /// bitmap-reported free space, or another ibuf operation is already in
    /// flight on this thread's mtr stack.
    pub fn ibuf_insert(
        &self,
        space: SpaceId,
        page_no: PageNo,
        unique: bool,
        columns: Vec<ColumnMeta>,
        tuple: DTuple,
        log: &LogSys,
    ) -> Result<bool> {
        if unique {
            return Ok(false);
        }
        if self.pool.peek(PageId::new(space, page_no)).is_some() {
            return Ok(false);
        }
        if self.lock_manager.has_any_lock_on_page(space, page_no) {
            return Ok(false);
        }
        if self.inside.swap(true, AtomicOrdering::Acquire) {
            return Ok(false);
        }
        let result = self.try_buffer(space, page_no, columns, tuple, log);
        self.inside.store(false, AtomicOrdering::Release);
        result
    }

    fn try_buffer(&self, space: SpaceId, page_no: PageNo, columns: Vec<ColumnMeta>, tuple: DTuple, log: &LogSys) -> Result<bool> {
        let (bitmap_page_no, offset) = bitmap::bitmap_page_for(page_no);
        let mut mtr = Mtr::start(&self.pool);
        let bm_frame = mtr.x_lock(PageId::new(space, bitmap_page_no))?;
        let mut bm = read_or_init_bitmap(&mut mtr, bm_frame, space, bitmap_page_no);

        let already_buffered: usize = self
            .pending
            .get(&(space, page_no))
            .map(|slot| slot.lock().iter().map(|e| estimate_record_size(&e.tuple)).sum())
            .unwrap_or(0);
        let new_size = estimate_record_size(&tuple);
        let free_budget = bitmap::bucket_to_min_free_bytes(bm.free_bucket(offset));
        if already_buffered + new_size > free_budget {
            mtr.commit(log)?;
            return Ok(false);
        }

        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let payload = encode_payload(&columns, &tuple);
        let row = ibuf_tree_key(space, page_no, seq).push(DField::inline(ColumnType::Text, payload));
        self.tree.insert(row, log)?;

        bm.set_buffered(offset, true);
        mtr.page_write_string(bm_frame, FIL_PAGE_DATA as u16, &bm.to_bytes());
        mtr.commit(log)?;

        self.pending
            .entry((space, page_no))
            .or_default()
            .lock()
            .push(PendingEntry { seq, columns, tuple });
        self.n_entries.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(space, page_no, seq, "buffered secondary-index insert");
        Ok(true)
    }

    /// Applies every pending entry for `page_id` directly onto the
    /// just-read-in page buffer, clears its `BUFFERED` bit, and recomputes
    /// its `FREE` bucket (spec §4.9 `ibuf_merge_or_delete_for_page`, called
    /// from `BufferPool`'s read-completion hook). Returns whether `page` was
    /// mutated.
    pub fn merge_or_delete_for_page(&self, page_id: PageId, page: &mut PageBuf, log: &LogSys) -> Result<bool> {
        let (bitmap_page_no, offset) = bitmap::bitmap_page_for(page_id.page_no);
        let mut mtr = Mtr::start(&self.pool);
        let bm_frame = mtr.x_lock(PageId::new(page_id.space, bitmap_page_no))?;
        let mut bm = read_or_init_bitmap(&mut mtr, bm_frame, page_id.space, bitmap_page_no);
        if !bm.is_buffered(offset) {
            mtr.commit(log)?;
            return Ok(false);
        }

        let key = (page_id.space, page_id.page_no);
        let mut entries = match self.pending.remove(&key) {
            Some((_, mutex)) => mutex.into_inner(),
            None => Vec::new(),
        };
        entries.sort_by_key(|e| e.seq);

        if entries.is_empty() {
            // Bit says buffered but nothing is pending in memory: either a
            // fresh process that hasn't replayed `load_pending` yet, or a
            // stale bit left by a crash mid-merge. Clear it rather than
            // spin forever on every subsequent read of this page.
            warn!(space = page_id.space, page_no = page_id.page_no, "ibuf bitmap marked buffered with no pending entries");
            bm.set_buffered(offset, false);
            mtr.page_write_string(bm_frame, FIL_PAGE_DATA as u16, &bm.to_bytes());
            mtr.commit(log)?;
            return Ok(false);
        }

        let index_id = header::index_id(page);
        for entry in &entries {
            let mut tuples = read_all_tuples(page, &entry.columns);
            let pos = tuples.partition_point(|t| Self::compare_full(t, &entry.tuple) != Ordering::Greater);
            tuples.insert(pos, entry.tuple.clone());
            rewrite_leaf_records(page, &entry.columns, &tuples)?;
        }
        header::set_index_id(page, index_id);

        for entry in &entries {
            self.tree.delete(&ibuf_tree_key(key.0, key.1, entry.seq), log)?;
        }
        self.n_entries.fetch_sub(entries.len() as u32, AtomicOrdering::Relaxed);

        bm.set_buffered(offset, false);
        bm.set_free_bucket(offset, bitmap::free_bytes_to_bucket(free_bytes_estimate(page)));
        mtr.page_write_string(bm_frame, FIL_PAGE_DATA as u16, &bm.to_bytes());
        mtr.commit(log)?;
        debug!(space = page_id.space, page_no = page_id.page_no, n = entries.len(), "merged buffered inserts into page");
        Ok(true)
    }

    /// Drops every buffered entry for a tablespace that's being discarded,
    /// without ever reading its pages back in (spec §4.9
    /// `ibuf_delete_for_discarded_space`).
    pub fn delete_for_discarded_space(&self, space: SpaceId, log: &LogSys) -> Result<()> {
        let keys: Vec<(SpaceId, PageNo)> = self.pending.iter().map(|e| *e.key()).filter(|(s, _)| *s == space).collect();
        for key in keys {
            if let Some((_, mutex)) = self.pending.remove(&key) {
                let entries = mutex.into_inner();
                self.n_entries.fetch_sub(entries.len() as u32, AtomicOrdering::Relaxed);
                for entry in entries {
                    self.tree.delete(&ibuf_tree_key(key.0, key.1, entry.seq), log)?;
                }
            }
        }
        Ok(())
    }

    /// Total number of entries still waiting to be merged, the signal a
    /// background task uses to decide whether contraction is worthwhile
    /// (spec §4.9 `ibuf_contract`).
    pub fn n_pending(&self) -> u32 {
        self.n_entries.load(AtomicOrdering::Relaxed)
    }

    /// Forces the merge of up to `n_pages` buffered pages even though
    /// nothing is reading them for its own purposes, keeping the buffer
    /// from growing unbounded under a write-heavy, read-light workload
    /// (spec §4.9 `ibuf_contract_for_n_pages`). `sync` is accepted for
    /// parity with the spec's signature; this engine has no background I/O
    /// queue to defer onto, so every contraction is synchronous.
    pub fn contract_for_n_pages(&self, _sync: bool, n_pages: usize, log: &LogSys) -> Result<usize> {
        let mut targets: Vec<(SpaceId, PageNo)> = self.pending.iter().map(|e| *e.key()).collect();
        targets.truncate(n_pages);
        let mut merged = 0;
        for (space, page_no) in targets {
            let page_id = PageId::new(space, page_no);
            let frame_id = self.pool.get(page_id, LatchMode::Exclusive)?;
            let mut guard = self.pool.block(frame_id).data.x_lock();
            if self.merge_or_delete_for_page(page_id, &mut guard, log)? {
                merged += 1;
            }
            drop(guard);
            self.pool.release(frame_id, LatchMode::Exclusive);
        }
        Ok(merged)
    }

    /// Convenience wrapper matching the spec's unbounded `ibuf_contract`:
    /// keeps forcing merges until nothing is left pending.
    pub fn contract(&self, sync: bool, log: &LogSys) -> Result<usize> {
        let mut total = 0;
        loop {
            let n = self.contract_for_n_pages(sync, 8, log)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

/// Wires an [`IbufTree`] into [`crate::buffer::BufferPool`] as its
/// [`ReadCompletionHook`](crate::buffer::ReadCompletionHook): every data
/// page read in gets its pending changes merged before any caller sees it
/// (spec §4.2 `get`: "on completion the I/O handler applies deferred
/// insert-buffer merges").
pub struct IbufReadHook {
    tree: Arc<IbufTree>,
    log: Arc<LogSys>,
}

impl IbufReadHook {
    pub fn new(tree: Arc<IbufTree>, log: Arc<LogSys>) -> Self {
        IbufReadHook { tree, log }
    }
}

impl crate::buffer::ReadCompletionHook for IbufReadHook {
    fn on_page_read(&self, page_id: PageId, page: &mut PageBuf) -> bool {
        if IbufTree::is_ibuf_internal_page(page) {
            return false;
        }
        match self.tree.merge_or_delete_for_page(page_id, page, &self.log) {
            Ok(mutated) => mutated,
            Err(err) => {
                warn!(space = page_id.space, page_no = page_id.page_no, %err, "ibuf merge on read failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPoolConfig, NoopReadHook};
    use crate::fsp::space::{SpaceManager, TablespaceFile};

    fn setup(n_frames: usize) -> (tempfile::TempDir, Arc<BufferPool>, Arc<FileSpace>, Arc<LogSys>, Arc<LockManager>) {
        let dir = tempfile::tempdir().unwrap();
        let spaces = Arc::new(SpaceManager::new());
        let ts = TablespaceFile::create(0, dir.path().join("t0.ibd")).unwrap();
        let ts_arc = spaces.register(ts);
        let log = Arc::new(LogSys::create(dir.path().join("redo.log")).unwrap());
        let pool = Arc::new(
            BufferPool::new(
                BufferPoolConfig {
                    num_frames: n_frames,
                    ..Default::default()
                },
                spaces,
                Arc::clone(&log),
            )
            .with_read_hook(Arc::new(NoopReadHook)),
        );
        let space = Arc::new(FileSpace::create(ts_arc, 0).unwrap());
        let lock_manager = LockManager::new();
        (dir, pool, space, log, lock_manager)
    }

    fn row_columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta {
                col_type: ColumnType::Int,
                nullable: false,
                fixed_len: Some(4),
            },
            ColumnMeta {
                col_type: ColumnType::Text,
                nullable: false,
                fixed_len: None,
            },
        ]
    }

    fn row(k: u32, payload: &str) -> DTuple {
        DTuple::new()
            .push(DField::inline(ColumnType::Int, k.to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Text, payload.as_bytes().to_vec()))
    }

    #[test]
    fn payload_round_trips_through_encode_decode() {
        let cols = row_columns();
        let tuple = row(7, "seven");
        let bytes = encode_payload(&cols, &tuple);
        let (back_cols, back_tuple) = decode_payload(&bytes);
        assert_eq!(back_cols.len(), cols.len());
        assert_eq!(back_tuple.fields[0].data, tuple.fields[0].data);
        assert_eq!(back_tuple.fields[1].data, b"seven");
    }

    #[test]
    fn insert_buffers_when_page_not_resident() {
        let (_dir, pool, space, log, lock_manager) = setup(64);
        let ibuf = IbufTree::create(0, space, pool, lock_manager, &log).unwrap();
        let buffered = ibuf
            .ibuf_insert(0, 50, false, row_columns(), row(1, "one"), &log)
            .unwrap();
        assert!(buffered);
        assert_eq!(ibuf.n_pending(), 1);
    }

    #[test]
    fn insert_rejected_for_unique_index() {
        let (_dir, pool, space, log, lock_manager) = setup(64);
        let ibuf = IbufTree::create(0, space, pool, lock_manager, &log).unwrap();
        let buffered = ibuf
            .ibuf_insert(0, 50, true, row_columns(), row(1, "one"), &log)
            .unwrap();
        assert!(!buffered);
        assert_eq!(ibuf.n_pending(), 0);
    }

    #[test]
    fn insert_rejected_when_page_already_resident() {
        let (_dir, pool, space, log, lock_manager) = setup(64);
        pool.get(PageId::new(0, 50), LatchMode::Shared).unwrap();
        let ibuf = IbufTree::create(0, space, pool, lock_manager, &log).unwrap();
        let buffered = ibuf
            .ibuf_insert(0, 50, false, row_columns(), row(1, "one"), &log)
            .unwrap();
        assert!(!buffered);
    }

    #[test]
    fn merge_applies_pending_entries_and_clears_bit() {
        let (_dir, pool, space, log, lock_manager) = setup(64);
        let ibuf = IbufTree::create(0, space.clone(), pool.clone(), lock_manager, &log).unwrap();
        let target_page_no = space.alloc_free_page(None).unwrap();
        ibuf.ibuf_insert(0, target_page_no, false, row_columns(), row(3, "three"), &log)
            .unwrap();
        ibuf.ibuf_insert(0, target_page_no, false, row_columns(), row(1, "one"), &log)
            .unwrap();

        let mut page = PageBuf::zeroed();
        header::init_index_page(&mut page, 0, target_page_no, 77, 0);
        let mutated = ibuf
            .merge_or_delete_for_page(PageId::new(0, target_page_no), &mut page, &log)
            .unwrap();
        assert!(mutated);
        assert_eq!(header::n_recs(&page), 2);
        assert_eq!(header::index_id(&page), 77);
        assert_eq!(ibuf.n_pending(), 0);

        let tuples = read_all_tuples(&page, &row_columns());
        assert_eq!(tuples[0].fields[1].data, b"one");
        assert_eq!(tuples[1].fields[1].data, b"three");
    }
}
