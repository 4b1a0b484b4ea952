//! Externally stored ("BLOB") columns: an off-page chain of pages holding
//! the overflow of a column too large to fit inline, referenced from the
//! record by a 20-byte `BlobRef` plus a local prefix (spec §4.6 "Externally
//! stored columns").

use crate::common::{mach, PageId, PageNo, SpaceId};
use crate::error::{EngineError, Result};
use crate::fsp::space::SpaceManager;
use crate::page::fil::{FilPageType, PageBuf};

use super::dtuple::BlobRef;

/// Bytes of a large column value kept inline in the record even when the
/// rest is pushed off-page, so prefix-only index lookups never need to
/// follow the chain (spec §4.6).
pub const LOCAL_PREFIX_LEN: usize = 768;

const BLOB_HEADER_NEXT: usize = crate::page::fil::FIL_PAGE_DATA;
const BLOB_HEADER_LEN: usize = BLOB_HEADER_NEXT + 4;
const BLOB_HEADER_SIZE: usize = BLOB_HEADER_LEN + 4;
const BLOB_DATA_START: usize = BLOB_HEADER_SIZE;

fn blob_payload_capacity() -> usize {
    crate::common::PAGE_SIZE - BLOB_DATA_START - 8
}

/// Writes `value` across a freshly allocated chain of BLOB pages, keeping
/// only `LOCAL_PREFIX_LEN` bytes inline. Returns the inline prefix and the
/// reference to the chain head.
pub fn store_external(
    spaces: &SpaceManager,
    space_id: SpaceId,
    alloc_page: &mut dyn FnMut() -> Result<PageNo>,
    value: &[u8],
) -> Result<(Vec<u8>, BlobRef)> {
    let prefix_len = value.len().min(LOCAL_PREFIX_LEN);
    let prefix = value[..prefix_len].to_vec();
    let overflow = &value[prefix_len..];

    let space = spaces.get(space_id)?;
    let cap = blob_payload_capacity();
    let mut chunks: Vec<&[u8]> = overflow.chunks(cap).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let mut page_nos = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        page_nos.push(alloc_page()?);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let page_no = page_nos[i];
        let next = page_nos.get(i + 1).copied().unwrap_or(crate::common::FIL_NULL);
        let mut page = PageBuf::zeroed();
        page.init_fil_header(space_id, page_no, FilPageType::Blob);
        let buf = page.as_mut_slice();
        mach::write_u32(&mut buf[BLOB_HEADER_NEXT..], next);
        mach::write_u32(&mut buf[BLOB_HEADER_LEN..], chunk.len() as u32);
        buf[BLOB_DATA_START..BLOB_DATA_START + chunk.len()].copy_from_slice(chunk);
        page.stamp_checksum();
        space.write_page(page_no, &page)?;
    }

    let head = page_nos[0];
    let reference = BlobRef {
        space: space_id,
        page_no: head,
        offset: BLOB_DATA_START as u32,
        length: value.len() as u32,
    };
    Ok((prefix, reference))
}

/// Reads the full value back: the caller's local prefix followed by the
/// chain's bytes (spec §4.6 "read path").
pub fn read_external(spaces: &SpaceManager, reference: &BlobRef) -> Result<Vec<u8>> {
    let space = spaces.get(reference.space)?;
    let mut out = Vec::with_capacity(reference.length as usize);
    let mut page_no = reference.page_no;
    while page_no != crate::common::FIL_NULL && out.len() < reference.length as usize {
        let page = space.read_page(page_no)?;
        let buf = page.as_slice();
        let len = mach::read_u32(&buf[BLOB_HEADER_LEN..]) as usize;
        out.extend_from_slice(&buf[BLOB_DATA_START..BLOB_DATA_START + len]);
        page_no = mach::read_u32(&buf[BLOB_HEADER_NEXT..]);
    }
    if out.len() != reference.length as usize {
        return Err(EngineError::Corruption(format!(
            "blob chain at {} yielded {} bytes, expected {}",
            PageId::new(reference.space, reference.page_no),
            out.len(),
            reference.length
        )));
    }
    Ok(out)
}

/// Frees every page in the chain headed at `reference`, used by purge and
/// rollback when an externally stored column's owning record is removed
/// (spec §4.6, §4.7 "purge").
pub fn free_external(
    spaces: &SpaceManager,
    mut free_page: impl FnMut(PageNo) -> Result<()>,
    reference: &BlobRef,
) -> Result<()> {
    let space = spaces.get(reference.space)?;
    let mut page_no = reference.page_no;
    while page_no != crate::common::FIL_NULL {
        let page = space.read_page(page_no)?;
        let next = mach::read_u32(&page.as_slice()[BLOB_HEADER_NEXT..]);
        free_page(page_no)?;
        page_no = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsp::space::TablespaceFile;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn setup_space() -> (tempfile::TempDir, Arc<SpaceManager>) {
        let dir = tempfile::tempdir().unwrap();
        let spaces = Arc::new(SpaceManager::new());
        let ts = TablespaceFile::create(7, dir.path().join("t7.ibd")).unwrap();
        ts.extend(64).unwrap();
        spaces.register(ts);
        (dir, spaces)
    }

    #[test]
    fn small_value_round_trips_through_one_page() {
        let (_dir, spaces) = setup_space();
        let next_page = AtomicU32::new(1);
        let mut alloc = || -> Result<PageNo> { Ok(next_page.fetch_add(1, Ordering::SeqCst)) };
        let value = vec![0xAB; 2000];
        let (prefix, reference) = store_external(&spaces, 7, &mut alloc, &value).unwrap();
        assert_eq!(prefix.len(), LOCAL_PREFIX_LEN);
        let restored = read_external(&spaces, &reference).unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn large_value_spans_multiple_pages() {
        let (_dir, spaces) = setup_space();
        let next_page = AtomicU32::new(1);
        let mut alloc = || -> Result<PageNo> { Ok(next_page.fetch_add(1, Ordering::SeqCst)) };
        let value: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let (_prefix, reference) = store_external(&spaces, 7, &mut alloc, &value).unwrap();
        let restored = read_external(&spaces, &reference).unwrap();
        assert_eq!(restored, value);
        assert!(next_page.load(Ordering::SeqCst) > 2);
    }
}
