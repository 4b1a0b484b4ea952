//! Mini-transaction: the scoped unit of atomic multi-page modification
//! (spec §4.3 "Mini-transaction (MTR) & WAL").

use crate::buffer::BufferPool;
use crate::common::{mach, Lsn, PageId};
use crate::error::Result;
use crate::latch::RwGuard;
use crate::page::fil::PageBuf;

use super::log::{RedoOpcode, RedoRecord, SINGLE_REC_FLAG};
use super::wal::LogSys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    All,
    None,
    ShortInserts,
}

enum Memo<'a> {
    Exclusive {
        frame_id: usize,
        guard: RwGuard<'a, PageBuf>,
    },
    Shared {
        frame_id: usize,
        guard: RwGuard<'a, PageBuf>,
    },
}

impl<'a> Memo<'a> {
    fn frame_id(&self) -> usize {
        match self {
            Memo::Exclusive { frame_id, .. } => *frame_id,
            Memo::Shared { frame_id, .. } => *frame_id,
        }
    }
}

/// An atomic unit of page modification. `start`, zero or more
/// `x_lock`/`page_modify_*` calls, then `commit`.
pub struct Mtr<'a> {
    pool: &'a BufferPool,
    memo: Vec<Memo<'a>>,
    log_records: Vec<RedoRecord>,
    modified: bool,
    mode: LoggingMode,
}

impl<'a> Mtr<'a> {
    pub fn start(pool: &'a BufferPool) -> Self {
        Mtr {
            pool,
            memo: Vec::new(),
            log_records: Vec::new(),
            modified: false,
            mode: LoggingMode::All,
        }
    }

    pub fn set_logging_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn x_lock(&mut self, page_id: PageId) -> Result<usize> {
        let frame_id = self.pool.get(page_id, crate::buffer::LatchMode::Exclusive)?;
        let guard = self.pool.block(frame_id).data.x_lock();
        self.memo.push(Memo::Exclusive { frame_id, guard });
        Ok(frame_id)
    }

    pub fn s_lock(&mut self, page_id: PageId) -> Result<usize> {
        let frame_id = self.pool.get(page_id, crate::buffer::LatchMode::Shared)?;
        let guard = self.pool.block(frame_id).data.s_lock();
        self.memo.push(Memo::Shared { frame_id, guard });
        Ok(frame_id)
    }

    fn page_of(&mut self, frame_id: usize) -> &mut PageBuf {
        self.page_mut(frame_id)
    }

    /// Mutable access to a frame this mtr already holds X-latched. Used by
    /// the B-tree layer to lay out whole pages directly (split/merge/
    /// reorganize), bypassing the byte-range `page_modify_*` helpers.
    pub fn page_mut(&mut self, frame_id: usize) -> &mut PageBuf {
        self.memo
            .iter_mut()
            .find(|m| m.frame_id() == frame_id)
            .and_then(|m| match m {
                Memo::Exclusive { guard, .. } => Some(&mut **guard),
                Memo::Shared { .. } => None,
            })
            .expect("page_mut called on a frame not x-latched by this mtr")
    }

    /// Shared access to any latched frame (S or X), used for read-only
    /// inspection such as B-tree cursor search.
    pub fn page_ref(&self, frame_id: usize) -> &PageBuf {
        self.memo
            .iter()
            .find(|m| m.frame_id() == frame_id)
            .map(|m| match m {
                Memo::Exclusive { guard, .. } => &**guard,
                Memo::Shared { guard, .. } => &**guard,
            })
            .expect("page_ref called on a frame not latched by this mtr")
    }

    fn append_redo(&mut self, frame_id: usize, opcode: RedoOpcode, page_offset: u16, payload: Vec<u8>) {
        if self.mode == LoggingMode::None {
            return;
        }
        let page_id = self
            .pool
            .block(frame_id)
            .page_id()
            .expect("modified frame must be mapped");
        self.log_records.push(RedoRecord {
            opcode,
            single_rec: false,
            space: page_id.space,
            page_no: page_id.page_no,
            page_offset,
            payload,
        });
    }

    fn modify(&mut self, frame_id: usize, offset: u16, bytes: &[u8], opcode: RedoOpcode) {
        {
            let page = self.page_of(frame_id);
            page.as_mut_slice()[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        }
        self.modified = true;
        self.append_redo(frame_id, opcode, offset, bytes.to_vec());
    }

    pub fn page_modify_1(&mut self, frame_id: usize, offset: u16, value: u8) {
        self.modify(frame_id, offset, &[value], RedoOpcode::Write1);
    }

    pub fn page_modify_2(&mut self, frame_id: usize, offset: u16, value: u16) {
        let mut b = [0u8; 2];
        mach::write_u16(&mut b, value);
        self.modify(frame_id, offset, &b, RedoOpcode::Write2);
    }

    pub fn page_modify_4(&mut self, frame_id: usize, offset: u16, value: u32) {
        let mut b = [0u8; 4];
        mach::write_u32(&mut b, value);
        self.modify(frame_id, offset, &b, RedoOpcode::Write4);
    }

    pub fn page_modify_8(&mut self, frame_id: usize, offset: u16, value: u64) {
        let mut b = [0u8; 8];
        mach::write_u64(&mut b, value);
        self.modify(frame_id, offset, &b, RedoOpcode::Write8);
    }

    pub fn page_write_string(&mut self, frame_id: usize, offset: u16, bytes: &[u8]) {
        self.modify(frame_id, offset, bytes, RedoOpcode::WriteString);
    }

    /// Records a higher-level typed redo record (page init/create, record
    /// insert/delete splices, …) whose payload recovery's parser
    /// understands structurally rather than as a raw byte write.
    pub fn log_typed(&mut self, frame_id: usize, opcode: RedoOpcode, payload: Vec<u8>) {
        self.modified = true;
        self.append_redo(frame_id, opcode, 0, payload);
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Commits the mtr: if unmodified, just releases latches. Otherwise
    /// reserves a contiguous LSN range in the global log, stamps every
    /// touched frame, and inserts dirty frames into the flush list (spec
    /// §4.3 `commit`).
    pub fn commit(mut self, log: &LogSys) -> Result<Lsn> {
        if !self.modified {
            return Ok(log.current_lsn());
        }

        let mut touched_frames: Vec<usize> = self.memo.iter().map(|m| m.frame_id()).collect();
        touched_frames.dedup();

        let serialized = self.serialize_log_records();
        let (_start_lsn, end_lsn) = log.append(&serialized);

        // Stamp every exclusively-latched page's `FIL_PAGE_LSN` to this
        // mtr's end LSN before releasing latches, so a page on disk never
        // carries a lower LSN than the redo that last touched it (spec
        // §4.3 `commit`). Shared-latched frames were only read, not
        // mutated, and carry no `&mut PageBuf` to stamp.
        for memo in &mut self.memo {
            if let Memo::Exclusive { guard, .. } = memo {
                guard.set_lsn(end_lsn);
            }
        }

        for frame_id in &touched_frames {
            self.pool.mark_dirty(*frame_id, end_lsn);
        }

        Ok(end_lsn)
    }

    fn serialize_log_records(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.log_records.len() == 1 {
            let mut rec = self.log_records[0].clone();
            rec.single_rec = true;
            out.extend(rec.encode());
        } else {
            for rec in &self.log_records {
                out.extend(rec.encode());
            }
            out.extend(
                RedoRecord {
                    opcode: RedoOpcode::MultiRecEnd,
                    single_rec: false,
                    space: 0,
                    page_no: 0,
                    page_offset: 0,
                    payload: vec![],
                }
                .encode(),
            );
        }
        out
    }
}

impl<'a> Drop for Mtr<'a> {
    fn drop(&mut self) {
        // Latches release in reverse acquisition order as the memo drains
        // back-to-front (spec §4.3 `commit`: "release latches in reverse
        // order").
        while self.memo.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsp::space::{SpaceManager, TablespaceFile};
    use crate::page::fil::FilPageType;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, BufferPool, Arc<LogSys>) {
        let dir = tempfile::tempdir().unwrap();
        let spaces = Arc::new(SpaceManager::new());
        let ts = TablespaceFile::create(0, dir.path().join("t0.ibd")).unwrap();
        ts.extend(2).unwrap();
        for i in 0..2u32 {
            let mut p = PageBuf::zeroed();
            p.init_fil_header(0, i, FilPageType::Index);
            p.stamp_checksum();
            ts.write_page(i, &p).unwrap();
        }
        spaces.register(ts);
        let log = Arc::new(LogSys::create(dir.path().join("redo.log")).unwrap());
        let pool = BufferPool::new(Default::default(), spaces, Arc::clone(&log));
        (dir, pool, log)
    }

    #[test]
    fn unmodified_mtr_commits_as_noop() {
        let (_dir, pool, log) = setup();
        let mut mtr = Mtr::start(&pool);
        mtr.s_lock(PageId::new(0, 0)).unwrap();
        let lsn = mtr.commit(&log).unwrap();
        assert_eq!(lsn, log.current_lsn());
    }

    #[test]
    fn single_modification_dirties_page_and_advances_lsn() {
        let (_dir, pool, log) = setup();
        let start = log.current_lsn();
        let mut mtr = Mtr::start(&pool);
        let frame_id = mtr.x_lock(PageId::new(0, 1)).unwrap();
        mtr.page_modify_4(frame_id, 40, 0xDEADBEEF);
        let end_lsn = mtr.commit(&log).unwrap();
        assert!(end_lsn > start);
        assert!(pool.block(frame_id).is_dirty());
    }
}
