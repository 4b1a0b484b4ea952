//! L3 tablespace/file-node identity and raw page I/O (spec §4.4 "Tablespace
//! and file node"). Grounded on the teacher's `storage::disk` page-file
//! abstraction, generalized to InnoDB's per-space single-file model (spec
//! explicitly scopes out multi-file-per-space "the .ibd split across
//! multiple OS files").

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::common::{PageNo, SpaceId, PAGE_SIZE};
use crate::error::{EngineError, Result};
use crate::page::fil::PageBuf;

/// A single open tablespace file. All reads/writes go through `pread`/
/// `pwrite`-equivalent positioned I/O so concurrent readers don't race a
/// shared file cursor.
pub struct TablespaceFile {
    pub space_id: SpaceId,
    pub path: PathBuf,
    file: Mutex<File>,
    size_pages: AtomicU32,
}

impl TablespaceFile {
    pub fn create(space_id: SpaceId, path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(EngineError::Io)?;
        Ok(TablespaceFile {
            space_id,
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(file),
            size_pages: AtomicU32::new(0),
        })
    }

    pub fn open_existing(space_id: SpaceId, path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(EngineError::Io)?;
        let len = file.seek(SeekFrom::End(0)).map_err(EngineError::Io)?;
        let size_pages = (len / PAGE_SIZE as u64) as u32;
        Ok(TablespaceFile {
            space_id,
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(file),
            size_pages: AtomicU32::new(size_pages),
        })
    }

    pub fn size_in_pages(&self) -> u32 {
        self.size_pages.load(Ordering::Acquire)
    }

    /// Extends the file by `n` zero-filled pages, returning the first new
    /// page number. Growth is append-only; InnoDB never shrinks a
    /// tablespace file in place (spec §4.4 "space is never truncated").
    pub fn extend(&self, n: u32) -> Result<PageNo> {
        let first_new = self.size_pages.fetch_add(n, Ordering::AcqRel);
        let new_len = (first_new + n) as u64 * PAGE_SIZE as u64;
        let file = self.file.lock();
        file.set_len(new_len).map_err(EngineError::Io)?;
        Ok(first_new)
    }

    pub fn read_page(&self, page_no: PageNo) -> Result<PageBuf> {
        let mut file = self.file.lock();
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset)).map_err(EngineError::Io)?;
        let mut bytes = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut bytes).map_err(EngineError::Io)?;
        let buf = PageBuf::from_bytes(bytes);
        if !buf.verify_not_torn() && buf.lsn() != 0 {
            return Err(EngineError::Corruption(format!(
                "torn page {}:{}",
                self.space_id, page_no
            )));
        }
        Ok(buf)
    }

    pub fn write_page(&self, page_no: PageNo, buf: &PageBuf) -> Result<()> {
        let mut file = self.file.lock();
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset)).map_err(EngineError::Io)?;
        file.write_all(buf.as_slice()).map_err(EngineError::Io)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data().map_err(EngineError::Io)
    }
}

/// Process-wide registry of open tablespaces, keyed by space id. Lock-free
/// lookups via `dashmap`, matching the teacher's page-table sharding
/// approach in its buffer manager.
pub struct SpaceManager {
    spaces: DashMap<SpaceId, std::sync::Arc<TablespaceFile>>,
}

impl SpaceManager {
    pub fn new() -> Self {
        SpaceManager {
            spaces: DashMap::new(),
        }
    }

    pub fn register(&self, space: TablespaceFile) -> std::sync::Arc<TablespaceFile> {
        let arc = std::sync::Arc::new(space);
        self.spaces.insert(arc.space_id, arc.clone());
        arc
    }

    pub fn get(&self, space_id: SpaceId) -> Result<std::sync::Arc<TablespaceFile>> {
        self.spaces
            .get(&space_id)
            .map(|e| e.clone())
            .ok_or_else(|| EngineError::NotFound(format!("tablespace {}", space_id)))
    }
}

impl Default for SpaceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_grows_file_and_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let ts = TablespaceFile::create(0, dir.path().join("t0.ibd")).unwrap();
        assert_eq!(ts.size_in_pages(), 0);
        let first = ts.extend(4).unwrap();
        assert_eq!(first, 0);
        assert_eq!(ts.size_in_pages(), 4);
    }

    #[test]
    fn write_then_read_page_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ts = TablespaceFile::create(3, dir.path().join("t3.ibd")).unwrap();
        ts.extend(1).unwrap();
        let mut buf = PageBuf::zeroed();
        buf.init_fil_header(3, 0, crate::page::fil::FilPageType::FspHdr);
        buf.set_lsn(77);
        buf.stamp_checksum();
        ts.write_page(0, &buf).unwrap();
        let back = ts.read_page(0).unwrap();
        assert_eq!(back.space_id(), 3);
        assert_eq!(back.lsn(), 77);
    }
}
