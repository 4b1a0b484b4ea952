//! The buffer pool itself: page hash, frame array, free list, LRU, flush
//! list, and the pin+latch API (spec §4.2).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::common::{Lsn, PageId, PAGES_PER_EXTENT};
use crate::error::{EngineError, Result};
use crate::fsp::space::SpaceManager;
use crate::mtr::{FlushMode, LogSys};
use crate::page::fil::PageBuf;

use super::flush_list::FlushList;
use super::frame::{BlockState, BufferBlock};
use super::lru::Lru;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
    NoLatch,
    TryShared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushType {
    Lru,
    List,
}

/// Hook invoked once a page read completes, before waiters are woken, so
/// the insert buffer can apply any deferred secondary-index changes for
/// that page (spec §4.2 `get`: "on completion the I/O handler applies
/// deferred insert-buffer merges"). Returns `true` if `page` was mutated,
/// telling the caller to mark the frame dirty once it's placed in the
/// pool. Wired to `ibuf::IbufTree::merge_or_delete_for_page`.
pub trait ReadCompletionHook: Send + Sync {
    fn on_page_read(&self, page_id: PageId, page: &mut PageBuf) -> bool;
}

pub struct NoopReadHook;
impl ReadCompletionHook for NoopReadHook {
    fn on_page_read(&self, _page_id: PageId, _page: &mut PageBuf) -> bool {
        false
    }
}

pub struct BufferPoolConfig {
    pub num_frames: usize,
    pub old_sublist_min_age: Duration,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            num_frames: 4096,
            old_sublist_min_age: Duration::from_millis(1000),
        }
    }
}

struct FlushRunning {
    lru: AtomicBool,
    list: AtomicBool,
}

/// Rolling counters feeding the adaptive flush-rate estimate (spec §4.2
/// "Adaptive flush pacing").
struct PacingStats {
    redo_generated_since: AtomicU64,
    pages_flushed_since: AtomicU64,
    window_start: Mutex<Instant>,
}

pub struct BufferPool {
    frames: Vec<Arc<BufferBlock>>,
    page_hash: DashMap<PageId, usize>,
    free_list: Mutex<Vec<usize>>,
    lru: Lru,
    flush_list: FlushList,
    spaces: Arc<SpaceManager>,
    log: Arc<LogSys>,
    read_hook: RwLock<Arc<dyn ReadCompletionHook>>,
    flush_running: FlushRunning,
    pacing: PacingStats,
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig, spaces: Arc<SpaceManager>, log: Arc<LogSys>) -> Self {
        let frames: Vec<Arc<BufferBlock>> = (0..config.num_frames)
            .map(|i| Arc::new(BufferBlock::new(i)))
            .collect();
        let free_list = Mutex::new((0..config.num_frames).collect());
        BufferPool {
            frames,
            page_hash: DashMap::new(),
            free_list,
            lru: Lru::new(config.old_sublist_min_age),
            flush_list: FlushList::new(),
            spaces,
            log,
            read_hook: RwLock::new(Arc::new(NoopReadHook)),
            flush_running: FlushRunning {
                lru: AtomicBool::new(false),
                list: AtomicBool::new(false),
            },
            pacing: PacingStats {
                redo_generated_since: AtomicU64::new(0),
                pages_flushed_since: AtomicU64::new(0),
                window_start: Mutex::new(Instant::now()),
            },
        }
    }

    pub fn with_read_hook(self, hook: Arc<dyn ReadCompletionHook>) -> Self {
        *self.read_hook.write() = hook;
        self
    }

    /// Post-construction variant of [`Self::with_read_hook`], needed when the
    /// hook itself needs an `Arc<BufferPool>` to build (e.g. the insert
    /// buffer's own B-tree), which creates a construction-order cycle a
    /// builder taking `self` by value can't resolve.
    pub fn set_read_hook(&self, hook: Arc<dyn ReadCompletionHook>) {
        *self.read_hook.write() = hook;
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn block(&self, frame_id: usize) -> &Arc<BufferBlock> {
        &self.frames[frame_id]
    }

    /// Finds or reads `page_id`, pins it, and returns its frame id. The
    /// caller then takes the latch directly off `block(frame_id).data`
    /// (spec §4.2 `get`).
    pub fn get(&self, page_id: PageId, mode: LatchMode) -> Result<usize> {
        if let Some(entry) = self.page_hash.get(&page_id) {
            let frame_id = *entry;
            drop(entry);
            let block = self.block(frame_id);
            block.pin();
            self.lru.touch(frame_id);
            return Ok(frame_id);
        }
        if matches!(mode, LatchMode::TryShared) {
            return Err(EngineError::Fail);
        }
        self.read_page_in(page_id)
    }

    fn read_page_in(&self, page_id: PageId) -> Result<usize> {
        let frame_id = self.allocate_frame()?;
        let space = self.spaces.get(page_id.space)?;
        let mut page = space.read_page(page_id.page_no)?;
        let mutated = self.read_hook.read().on_page_read(page_id, &mut page);

        let block = self.block(frame_id);
        {
            let mut guard = block.data.x_lock();
            *guard = page;
        }
        block.set_page_id(page_id);
        block.set_state(BlockState::FilePage);
        block.pin();
        self.page_hash.insert(page_id, frame_id);
        self.lru.insert_at_old_head(frame_id);
        if mutated {
            // No mtr is open on this frame yet (it isn't pinned into any
            // caller's memo), so the merge carries no redo record of its
            // own; its durability rests entirely on the insert buffer's own
            // WAL-logged tree, which is replayed and re-merged on the next
            // read if this page is lost before its next flush.
            self.mark_dirty(frame_id, 0);
        }
        Ok(frame_id)
    }

    fn allocate_frame(&self) -> Result<usize> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }
        self.evict_one()
            .ok_or_else(|| EngineError::internal("buffer pool exhausted: no replaceable frame"))
    }

    fn evict_one(&self) -> Option<usize> {
        for frame_id in self.lru.tail_to_head() {
            let block = self.block(frame_id);
            if block.is_replaceable() {
                if let Some(page_id) = block.page_id() {
                    self.page_hash.remove(&page_id);
                }
                block.set_state(BlockState::NotUsed);
                block.clear_page_id();
                self.lru.remove(frame_id);
                return Some(frame_id);
            }
        }
        None
    }

    /// Releases a pin taken by `get`. `mode` is accepted for symmetry with
    /// the latch that was taken alongside the pin, though latches in this
    /// engine are released by dropping the `RwGuard` directly.
    pub fn release(&self, frame_id: usize, _mode: LatchMode) {
        self.block(frame_id).unpin();
    }

    pub fn make_young(&self, frame_id: usize) {
        self.lru.touch(frame_id);
    }

    /// Hash lookup without I/O (spec §4.2 `peek`).
    pub fn peek(&self, page_id: PageId) -> Option<usize> {
        self.page_hash.get(&page_id).map(|e| *e)
    }

    /// Oldest-modification LSN across the whole flush list, the ceiling a
    /// checkpoint may advance to (spec §4.3 "Checkpoints").
    pub fn oldest_modification_lsn(&self) -> Option<Lsn> {
        self.flush_list.oldest_lsn()
    }

    /// Records a page as dirtied at `lsn`, inserting it at the flush list
    /// head only if not already present (spec §4.3 `mtr::commit`).
    pub fn mark_dirty(&self, frame_id: usize, lsn: Lsn) {
        let block = self.block(frame_id);
        let was_clean = !block.is_dirty();
        block.mark_dirty(lsn);
        if was_clean {
            self.flush_list.insert(frame_id, block.oldest_modification());
            self.pacing.redo_generated_since.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn write_back(&self, frame_id: usize) -> Result<()> {
        let block = self.block(frame_id);
        let page_id = block
            .page_id()
            .ok_or_else(|| EngineError::internal("flushing an unmapped frame"))?;
        let space = self.spaces.get(page_id.space)?;
        // WAL-before-write: the redo covering this page's newest
        // modification must be durable before the page itself reaches the
        // tablespace file (spec §4.3 invariant).
        self.log.write_up_to(block.newest_modification(), FlushMode::FlushLog)?;
        {
            let guard = block.data.s_lock();
            space.write_page(page_id.page_no, &guard)?;
        }
        let oldest = block.oldest_modification();
        self.flush_list.remove(frame_id, oldest);
        block.mark_clean();
        self.pacing.pages_flushed_since.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes up to `min_n` blocks, or every block below `lsn_limit` for
    /// `FlushType::List`. Returns `Ok(n_queued)` or `Err(Fail)` if a batch
    /// of this type is already running (spec §4.2 `flush_batch`).
    pub fn flush_batch(&self, flush_type: FlushType, min_n: usize, lsn_limit: Lsn) -> Result<usize> {
        let running_flag = match flush_type {
            FlushType::Lru => &self.flush_running.lru,
            FlushType::List => &self.flush_running.list,
        };
        if running_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::Fail);
        }
        let result = (|| {
            let candidates: Vec<usize> = match flush_type {
                FlushType::Lru => self
                    .lru
                    .tail_to_head()
                    .into_iter()
                    .filter(|&id| self.block(id).is_dirty())
                    .take(min_n.max(1))
                    .collect(),
                FlushType::List => self.flush_list.below(lsn_limit),
            };
            let mut n = 0;
            for frame_id in candidates {
                if flush_type == FlushType::Lru && n >= min_n {
                    break;
                }
                self.write_back(frame_id)?;
                n += 1;
            }
            Ok(n)
        })();
        running_flag.store(false, Ordering::Release);
        result
    }

    /// Desired pages/sec derived from recent redo generation vs. recent
    /// flush throughput (spec §4.2 "Adaptive flush pacing"). Resets the
    /// rolling window each call.
    pub fn adaptive_flush_target(&self) -> f64 {
        let mut window_start = self.pacing.window_start.lock();
        let elapsed = window_start.elapsed().as_secs_f64().max(0.001);
        let generated = self.pacing.redo_generated_since.swap(0, Ordering::AcqRel) as f64;
        let flushed = self.pacing.pages_flushed_since.swap(0, Ordering::AcqRel) as f64;
        *window_start = Instant::now();
        if flushed < 1.0 {
            return generated / elapsed;
        }
        (generated / flushed) * (flushed / elapsed)
    }

    /// Detects a sufficient run of sequential accesses within a 64-page
    /// area and issues a linear read-ahead for the rest of it (spec §4.2
    /// "Read-ahead"). Never reads past an ibuf/non-ibuf boundary: the whole
    /// area must be on the same side, which the `ibuf_boundary` predicate
    /// decides.
    pub fn maybe_linear_read_ahead(
        &self,
        page_id: PageId,
        is_ibuf_page: impl Fn(PageId) -> bool,
    ) -> Vec<PageId> {
        let area_start = (page_id.page_no / PAGES_PER_EXTENT) * PAGES_PER_EXTENT;
        let area: Vec<PageId> = (0..PAGES_PER_EXTENT)
            .map(|i| PageId::new(page_id.space, area_start + i))
            .collect();
        let is_ibuf_area = is_ibuf_page(area[0]);
        if area.iter().any(|&p| is_ibuf_page(p) != is_ibuf_area) {
            return Vec::new();
        }
        let accessed = area.iter().filter(|&&p| self.peek(p).is_some()).count();
        if accessed * 4 >= area.len() * 3 {
            area.into_iter().filter(|p| self.peek(*p).is_none()).collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsp::space::TablespaceFile;
    use crate::page::fil::FilPageType;

    fn setup() -> (tempfile::TempDir, BufferPool) {
        let dir = tempfile::tempdir().unwrap();
        let spaces = Arc::new(SpaceManager::new());
        let ts = TablespaceFile::create(0, dir.path().join("t0.ibd")).unwrap();
        ts.extend(8).unwrap();
        for i in 0..8u32 {
            let mut p = PageBuf::zeroed();
            p.init_fil_header(0, i, FilPageType::Index);
            p.stamp_checksum();
            ts.write_page(i, &p).unwrap();
        }
        spaces.register(ts);
        let log = Arc::new(LogSys::create(dir.path().join("redo.log")).unwrap());
        let pool = BufferPool::new(
            BufferPoolConfig {
                num_frames: 4,
                old_sublist_min_age: Duration::from_secs(1000),
            },
            spaces,
            log,
        );
        (dir, pool)
    }

    #[test]
    fn get_reads_and_pins_then_release_unpins() {
        let (_dir, pool) = setup();
        let id = PageId::new(0, 2);
        let frame_id = pool.get(id, LatchMode::Shared).unwrap();
        assert_eq!(pool.block(frame_id).pin_count(), 1);
        pool.release(frame_id, LatchMode::Shared);
        assert_eq!(pool.block(frame_id).pin_count(), 0);
    }

    #[test]
    fn peek_never_blocks_on_io() {
        let (_dir, pool) = setup();
        assert!(pool.peek(PageId::new(0, 5)).is_none());
        pool.get(PageId::new(0, 5), LatchMode::Shared).unwrap();
        assert!(pool.peek(PageId::new(0, 5)).is_some());
    }

    #[test]
    fn dirty_block_is_on_flush_list_until_flushed() {
        let (_dir, pool) = setup();
        let frame_id = pool.get(PageId::new(0, 1), LatchMode::Exclusive).unwrap();
        pool.mark_dirty(frame_id, 10);
        assert_eq!(pool.flush_list.len(), 1);
        pool.flush_batch(FlushType::List, 1, 100).unwrap();
        assert_eq!(pool.flush_list.len(), 0);
        assert!(!pool.block(frame_id).is_dirty());
    }

    #[test]
    fn eviction_skips_pinned_and_dirty_blocks() {
        let (_dir, pool) = setup();
        let f0 = pool.get(PageId::new(0, 0), LatchMode::Shared).unwrap();
        pool.get(PageId::new(0, 1), LatchMode::Shared).unwrap();
        pool.get(PageId::new(0, 2), LatchMode::Shared).unwrap();
        pool.get(PageId::new(0, 3), LatchMode::Shared).unwrap();
        // Pool is full (4 frames); pin frame 0 to keep it unreplaceable,
        // release the rest so a 5th read must evict one of them.
        pool.release(pool.peek(PageId::new(0, 1)).unwrap(), LatchMode::Shared);
        pool.release(pool.peek(PageId::new(0, 2)).unwrap(), LatchMode::Shared);
        pool.release(pool.peek(PageId::new(0, 3)).unwrap(), LatchMode::Shared);
        let frame_id = pool.get(PageId::new(0, 4), LatchMode::Shared).unwrap();
        assert!(pool.block(frame_id).pin_count() >= 1);
        pool.release(f0, LatchMode::Shared);
    }
}
