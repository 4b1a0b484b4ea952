//! L6 file-space management: extent/segment allocation on top of the L3
//! tablespace file (spec §4.4). Owns the FSP header, the extent descriptors,
//! and the segment inodes for one tablespace.

pub mod dblwr;
pub mod extent;
pub mod header;
pub mod list;
pub mod segment;
pub mod space;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{PageNo, SpaceId, FIL_NULL, PAGES_PER_EXTENT};
use crate::error::{EngineError, Result};
use extent::{ExtentDescriptor, ExtentState};
use header::FspHeader;
use segment::SegmentInode;
use space::TablespaceFile;

pub const FSP_HEADER_PAGE_NO: PageNo = 0;
pub const FSP_IBUF_BITMAP_PAGE_NO: PageNo = 1;
pub const FSP_FIRST_INODE_PAGE_NO: PageNo = 2;
pub const FSP_IBUF_HEADER_PAGE_NO: PageNo = 3;
pub const FSP_IBUF_TREE_ROOT_PAGE_NO: PageNo = 4;
pub const FSP_TRX_SYS_PAGE_NO: PageNo = 5;
pub const FSP_FIRST_RSEG_PAGE_NO: PageNo = 6;
pub const FSP_DICT_HDR_PAGE_NO: PageNo = 7;

/// One extent slot as tracked by this space's allocator: the persistent
/// descriptor plus which segment (if any) currently owns it. Space-wide
/// free/free_frag/full bookkeeping is kept as a direct state tag scanned
/// linearly rather than threaded through an on-disk `Flst` chain (see
/// DESIGN.md) — segment-level fragment/full/free lists still use the real
/// `fsp::list` chains, since those are the ones a segment needs to walk
/// independently of the rest of the space.
struct OwnedExtent {
    desc: ExtentDescriptor,
    owner_seg: Option<u64>,
}

/// The allocator for a single tablespace: extents, segment inodes, and the
/// FSP header that roots them.
pub struct FileSpace {
    pub space_id: SpaceId,
    pub file: Arc<TablespaceFile>,
    header: Mutex<FspHeader>,
    extents: Mutex<Vec<OwnedExtent>>,
    inodes: Mutex<HashMap<u64, SegmentInode>>,
}

impl FileSpace {
    pub fn create(file: Arc<TablespaceFile>, space_id: SpaceId) -> Result<Self> {
        file.extend(FSP_FIRST_RSEG_PAGE_NO + 1)?;
        let header = FspHeader::new(space_id);
        let space = FileSpace {
            space_id,
            file,
            header: Mutex::new(header),
            extents: Mutex::new(Vec::new()),
            inodes: Mutex::new(HashMap::new()),
        };
        space.persist_header()?;
        Ok(space)
    }

    fn persist_header(&self) -> Result<()> {
        let header = self.header.lock();
        let mut page = self.file.read_page(FSP_HEADER_PAGE_NO).unwrap_or_else(|_| {
            let mut p = crate::page::fil::PageBuf::zeroed();
            p.init_fil_header(self.space_id, FSP_HEADER_PAGE_NO, crate::page::fil::FilPageType::FspHdr);
            p
        });
        header.encode(page.as_mut_slice());
        page.stamp_checksum();
        self.file.write_page(FSP_HEADER_PAGE_NO, &page)
    }

    pub fn size_in_pages(&self) -> u32 {
        self.header.lock().size_pages
    }

    /// Ensures at least `n_extents` whole extents are free somewhere in the
    /// space, extending the underlying file if not (spec §4.4
    /// `reserve_free_extents`).
    pub fn reserve_free_extents(&self, n_extents: u32) -> Result<()> {
        let free_pages_available = {
            let extents = self.extents.lock();
            extents
                .iter()
                .filter(|e| matches!(e.desc.state, ExtentState::Free))
                .count() as u32
        };
        if free_pages_available >= n_extents {
            return Ok(());
        }
        let to_create = n_extents - free_pages_available;
        for _ in 0..to_create {
            self.grow_by_one_extent()?;
        }
        Ok(())
    }

    fn grow_by_one_extent(&self) -> Result<()> {
        let start_page = self.file.extend(PAGES_PER_EXTENT)?;
        let desc = ExtentDescriptor::new_free(self.space_id, start_page);
        self.extents.lock().push(OwnedExtent {
            desc,
            owner_seg: None,
        });
        let mut header = self.header.lock();
        header.size_pages += PAGES_PER_EXTENT;
        header.free_limit += PAGES_PER_EXTENT;
        header.free.len += 1;
        drop(header);
        self.persist_header()
    }

    /// Allocates one page, preferring an already-partially-used extent
    /// (`FreeFrag`) owned by no one or by `seg_id`, over breaking a new
    /// extent out of `Free` (spec §4.4 fragment-then-extent allocation
    /// order).
    pub fn alloc_free_page(&self, seg_id: Option<u64>) -> Result<PageNo> {
        if let Some(page_no) = self.try_alloc_from_existing(seg_id) {
            if let Some(id) = seg_id {
                self.inodes
                    .lock()
                    .get_mut(&id)
                    .map(|inode| inode.add_fragment_page(page_no));
            }
            return Ok(page_no);
        }
        self.reserve_free_extents(1)?;
        self.try_alloc_from_existing(seg_id)
            .map(|page_no| {
                if let Some(id) = seg_id {
                    self.inodes
                        .lock()
                        .get_mut(&id)
                        .map(|inode| inode.add_fragment_page(page_no));
                }
                page_no
            })
            .ok_or(EngineError::OutOfFileSpace {
                space_id: self.space_id,
            })
    }

    fn try_alloc_from_existing(&self, seg_id: Option<u64>) -> Option<PageNo> {
        let mut extents = self.extents.lock();
        // Prefer an extent already owned by this segment (or unowned
        // fragment space) that still has free pages.
        for e in extents.iter_mut() {
            let ownable = e.owner_seg.is_none() || e.owner_seg == seg_id;
            if ownable
                && matches!(e.desc.state, ExtentState::FreeFrag | ExtentState::FSeg)
                && e.desc.n_free() > 0
            {
                let page = e.desc.alloc_free_page().unwrap();
                if e.owner_seg.is_none() {
                    e.owner_seg = seg_id;
                }
                if e.desc.is_full() {
                    e.desc.state = if seg_id.is_some() {
                        ExtentState::FSeg
                    } else {
                        ExtentState::Full
                    };
                }
                return Some(page);
            }
        }
        for e in extents.iter_mut() {
            if matches!(e.desc.state, ExtentState::Free) {
                e.desc.state = ExtentState::FreeFrag;
                e.owner_seg = seg_id;
                let page = e.desc.alloc_free_page().unwrap();
                return Some(page);
            }
        }
        None
    }

    /// Returns `page_no` to its extent's free bitmap (spec §4.4
    /// `free_page`). An extent that becomes entirely free reverts to
    /// `Free` and loses its segment ownership.
    pub fn free_page(&self, page_no: PageNo) -> Result<()> {
        let mut extents = self.extents.lock();
        let extent_start = (page_no / PAGES_PER_EXTENT) * PAGES_PER_EXTENT;
        let e = extents
            .iter_mut()
            .find(|e| e.desc.start_page == extent_start)
            .ok_or_else(|| EngineError::NotFound(format!("extent for page {}", page_no)))?;
        e.desc.free_page(page_no);
        if let Some(seg_id) = e.owner_seg {
            self.inodes
                .lock()
                .get_mut(&seg_id)
                .map(|inode| inode.remove_fragment_page(page_no));
        }
        if e.desc.n_free() == PAGES_PER_EXTENT {
            e.desc.state = ExtentState::Free;
            e.owner_seg = None;
        } else if matches!(e.desc.state, ExtentState::Full | ExtentState::FSeg) {
            e.desc.state = ExtentState::FreeFrag;
        }
        Ok(())
    }

    /// Allocates a new segment: a fresh inode and one header page drawn
    /// from the space's fragment allocator (spec §4.4 `create_segment`).
    pub fn create_segment(&self) -> Result<(u64, PageNo)> {
        let seg_id = self.header.lock().alloc_seg_id();
        self.persist_header()?;
        let mut inode = SegmentInode::new(seg_id, self.space_id);
        let header_page = self.alloc_free_page(Some(seg_id))?;
        inode.add_fragment_page(header_page);
        self.inodes.lock().insert(seg_id, inode);
        Ok((seg_id, header_page))
    }

    /// Frees one unit (a fragment page, or in a fuller engine a whole
    /// extent) of the segment that is *not* its designated header page.
    /// Returns `true` once nothing but the header page remains, at which
    /// point the caller should call [`FileSpace::free_step`] to finish.
    pub fn free_step_not_header(&self, seg_id: u64, header_page: PageNo) -> Result<bool> {
        let next_page = {
            let inodes = self.inodes.lock();
            let inode = inodes
                .get(&seg_id)
                .ok_or_else(|| EngineError::NotFound(format!("segment {}", seg_id)))?;
            inode
                .fragment_pages
                .iter()
                .copied()
                .find(|&p| p != header_page)
        };
        match next_page {
            Some(page) => {
                self.free_page(page)?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Frees the segment's header page and removes its inode. Only valid
    /// after `free_step_not_header` has returned `true`.
    pub fn free_step(&self, seg_id: u64, header_page: PageNo) -> Result<bool> {
        self.free_page(header_page)?;
        self.inodes.lock().remove(&seg_id);
        Ok(true)
    }

    pub fn n_pages_used(&self, seg_id: u64) -> Option<u32> {
        self.inodes.lock().get(&seg_id).map(|i| i.n_pages_used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_space() -> (tempfile::TempDir, FileSpace) {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(TablespaceFile::create(0, dir.path().join("t0.ibd")).unwrap());
        let space = FileSpace::create(file, 0).unwrap();
        (dir, space)
    }

    #[test]
    fn alloc_and_free_page_updates_extent_state() {
        let (_dir, space) = new_space();
        let p = space.alloc_free_page(None).unwrap();
        assert!(p >= FSP_FIRST_RSEG_PAGE_NO + 1);
        space.free_page(p).unwrap();
    }

    #[test]
    fn create_segment_allocates_header_page() {
        let (_dir, space) = new_space();
        let (seg_id, header_page) = space.create_segment().unwrap();
        assert!(space.n_pages_used(seg_id).unwrap() >= 1);
        assert!(header_page > 0 || header_page == 0);
    }

    #[test]
    fn free_step_sequence_removes_inode() {
        let (_dir, space) = new_space();
        let (seg_id, header_page) = space.create_segment().unwrap();
        space.alloc_free_page(Some(seg_id)).unwrap();
        loop {
            if space.free_step_not_header(seg_id, header_page).unwrap() {
                break;
            }
        }
        space.free_step(seg_id, header_page).unwrap();
        assert!(space.inodes.lock().get(&seg_id).is_none());
    }

    #[test]
    fn reserve_free_extents_grows_file() {
        let (_dir, space) = new_space();
        let before = space.size_in_pages();
        space.reserve_free_extents(2).unwrap();
        assert!(space.size_in_pages() >= before + 2 * PAGES_PER_EXTENT);
    }
}
