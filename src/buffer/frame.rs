//! A resident page frame and its block descriptor (spec §4.2 "Frames").

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};

use crate::common::{Lsn, PageId};
use crate::latch::{LatchLevel, RwLatch};
use crate::page::fil::PageBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    NotUsed = 0,
    ReadyForUse = 1,
    FilePage = 2,
    Memory = 3,
    RemoveHash = 4,
}

impl BlockState {
    fn from_u8(v: u8) -> BlockState {
        match v {
            1 => BlockState::ReadyForUse,
            2 => BlockState::FilePage,
            3 => BlockState::Memory,
            4 => BlockState::RemoveHash,
            _ => BlockState::NotUsed,
        }
    }
}

/// One buffer-pool slot: identity, pin/latch state, and LSN bookkeeping,
/// guarding the actual page bytes behind the frame's own rw-latch (spec §4.2
/// "Buffer block").
pub struct BufferBlock {
    pub frame_id: usize,
    page_id: AtomicU64,
    state: AtomicU8,
    pin_count: AtomicI32,
    oldest_modification: AtomicU64,
    newest_modification: AtomicU64,
    pub data: RwLatch<PageBuf>,
}

fn encode_page_id(id: PageId) -> u64 {
    ((id.space as u64) << 32) | id.page_no as u64
}

fn decode_page_id(v: u64) -> PageId {
    PageId::new((v >> 32) as u32, v as u32)
}

impl BufferBlock {
    pub fn new(frame_id: usize) -> Self {
        BufferBlock {
            frame_id,
            page_id: AtomicU64::new(u64::MAX),
            state: AtomicU8::new(BlockState::NotUsed as u8),
            pin_count: AtomicI32::new(0),
            oldest_modification: AtomicU64::new(0),
            newest_modification: AtomicU64::new(0),
            data: RwLatch::new("buf_block", LatchLevel::BufBlock, PageBuf::zeroed()),
        }
    }

    pub fn page_id(&self) -> Option<PageId> {
        let v = self.page_id.load(Ordering::Acquire);
        if v == u64::MAX {
            None
        } else {
            Some(decode_page_id(v))
        }
    }

    pub fn set_page_id(&self, id: PageId) {
        self.page_id.store(encode_page_id(id), Ordering::Release);
    }

    pub fn clear_page_id(&self) {
        self.page_id.store(u64::MAX, Ordering::Release);
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, s: BlockState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn pin(&self) -> i32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn unpin(&self) -> i32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn pin_count(&self) -> i32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.oldest_modification.load(Ordering::Acquire) > 0
    }

    pub fn oldest_modification(&self) -> Lsn {
        self.oldest_modification.load(Ordering::Acquire)
    }

    /// Records the page's first dirtying LSN. A no-op if already dirty: the
    /// oldest-modification LSN must never move once set, until the page is
    /// flushed and marked clean again (spec §4.2 flush-list ordering
    /// invariant).
    pub fn mark_dirty(&self, lsn: Lsn) {
        self.oldest_modification
            .compare_exchange(0, lsn, Ordering::AcqRel, Ordering::Acquire)
            .ok();
        self.newest_modification.fetch_max(lsn, Ordering::AcqRel);
    }

    pub fn mark_clean(&self) {
        self.oldest_modification.store(0, Ordering::Release);
    }

    pub fn newest_modification(&self) -> Lsn {
        self.newest_modification.load(Ordering::Acquire)
    }

    pub fn is_replaceable(&self) -> bool {
        self.pin_count() == 0 && !self.is_dirty() && self.state() == BlockState::FilePage
    }
}
