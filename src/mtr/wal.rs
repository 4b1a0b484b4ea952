//! Global write-ahead log: append-only log file, LSN bookkeeping, group
//! commit, and checkpoints (spec §4.3 "Global log").

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::BufferPool;
use crate::common::Lsn;
use crate::error::{EngineError, Result};

pub const LOG_FILE_HEADER_SIZE: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlushMode {
    NoFlush,
    FlushPagesOnly,
    FlushLog,
}

struct LogBuffer {
    bytes: Vec<u8>,
    /// LSN of `bytes[0]`.
    base_lsn: Lsn,
}

/// The process-wide redo log. One instance per engine; `mtr::commit`
/// reserves a contiguous LSN range here and appends bytes under the same
/// critical section (spec's "log-system critical section").
pub struct LogSys {
    file: Mutex<File>,
    path: PathBuf,
    buffer: Mutex<LogBuffer>,
    current_lsn: AtomicU64,
    written_to_file_lsn: AtomicU64,
    flushed_to_disk_lsn: AtomicU64,
    checkpoint_no: AtomicU64,
    checkpoint_lsn: AtomicU64,
    write_cv: Condvar,
    write_lock: Mutex<bool>,
}

impl LogSys {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(EngineError::Io)?;
        file.set_len(LOG_FILE_HEADER_SIZE).map_err(EngineError::Io)?;
        Ok(LogSys {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            buffer: Mutex::new(LogBuffer {
                bytes: Vec::new(),
                base_lsn: LOG_FILE_HEADER_SIZE,
            }),
            current_lsn: AtomicU64::new(LOG_FILE_HEADER_SIZE),
            written_to_file_lsn: AtomicU64::new(LOG_FILE_HEADER_SIZE),
            flushed_to_disk_lsn: AtomicU64::new(LOG_FILE_HEADER_SIZE),
            checkpoint_no: AtomicU64::new(0),
            checkpoint_lsn: AtomicU64::new(LOG_FILE_HEADER_SIZE),
            write_cv: Condvar::new(),
            write_lock: Mutex::new(false),
        })
    }

    pub fn current_lsn(&self) -> Lsn {
        self.current_lsn.load(Ordering::Acquire)
    }

    pub fn flushed_to_disk_lsn(&self) -> Lsn {
        self.flushed_to_disk_lsn.load(Ordering::Acquire)
    }

    /// Reserves `len` bytes of log space, returning `(start_lsn, end_lsn)`,
    /// and appends `bytes` to the in-memory buffer. Called while the mtr
    /// holds the log-system critical section (spec §4.3 `commit`).
    pub fn append(&self, bytes: &[u8]) -> (Lsn, Lsn) {
        let mut buffer = self.buffer.lock();
        let start_lsn = self.current_lsn.fetch_add(bytes.len() as u64, Ordering::AcqRel);
        let end_lsn = start_lsn + bytes.len() as u64;
        buffer.bytes.extend_from_slice(bytes);
        (start_lsn, end_lsn)
    }

    /// Blocks until `flushed_to_disk_lsn >= lsn`, performing the write
    /// (and, for `FlushMode::FlushLog`, the fsync) if no other thread is
    /// already doing so (spec §4.3 "group commit": "writes at most once per
    /// call; concurrent callers coalesce").
    pub fn write_up_to(&self, lsn: Lsn, mode: FlushMode) -> Result<()> {
        if self.flushed_to_disk_lsn() >= lsn || mode == FlushMode::NoFlush {
            return Ok(());
        }
        let mut writer_active = self.write_lock.lock();
        loop {
            if self.flushed_to_disk_lsn() >= lsn {
                return Ok(());
            }
            if !*writer_active {
                *writer_active = true;
                break;
            }
            self.write_cv.wait(&mut writer_active);
        }
        drop(writer_active);

        let result = self.do_write(mode);

        let mut writer_active = self.write_lock.lock();
        *writer_active = false;
        self.write_cv.notify_all();
        result
    }

    fn do_write(&self, mode: FlushMode) -> Result<()> {
        let to_write = {
            let mut buffer = self.buffer.lock();
            let written = self.written_to_file_lsn.load(Ordering::Acquire);
            let already = (written - buffer.base_lsn) as usize;
            let bytes = buffer.bytes[already..].to_vec();
            let new_written = buffer.base_lsn + buffer.bytes.len() as u64;
            self.written_to_file_lsn.store(new_written, Ordering::Release);
            bytes
        };
        if !to_write.is_empty() {
            let mut file = self.file.lock();
            file.seek(SeekFrom::End(0)).map_err(EngineError::Io)?;
            file.write_all(&to_write).map_err(EngineError::Io)?;
            if mode == FlushMode::FlushLog {
                file.sync_data().map_err(EngineError::Io)?;
            }
        }
        self.flushed_to_disk_lsn
            .store(self.written_to_file_lsn.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }

    /// Writes `{checkpoint_no, log_lsn, ...}` to the log header. May only
    /// advance to `min(oldest_modification over flush list, current_lsn)`
    /// (spec §4.3 "Checkpoints").
    pub fn checkpoint(&self, buffer_pool: &BufferPool) -> Result<Lsn> {
        let oldest_dirty = buffer_pool.oldest_modification_lsn().unwrap_or_else(|| self.current_lsn());
        let target = oldest_dirty.min(self.current_lsn());
        if target <= self.checkpoint_lsn.load(Ordering::Acquire) {
            return Ok(self.checkpoint_lsn.load(Ordering::Acquire));
        }
        self.write_up_to(target, FlushMode::FlushLog)?;
        let no = self.checkpoint_no.fetch_add(1, Ordering::AcqRel) + 1;
        self.checkpoint_lsn.store(target, Ordering::Release);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0)).map_err(EngineError::Io)?;
        let mut header = [0u8; LOG_FILE_HEADER_SIZE as usize];
        crate::common::mach::write_u64(&mut header[0..8], no);
        crate::common::mach::write_u64(&mut header[8..16], target);
        file.write_all(&header).map_err(EngineError::Io)?;
        file.sync_data().map_err(EngineError::Io)?;
        Ok(target)
    }

    pub fn last_checkpoint(&self) -> (u64, Lsn) {
        (
            self.checkpoint_no.load(Ordering::Acquire),
            self.checkpoint_lsn.load(Ordering::Acquire),
        )
    }

    /// Returns every log byte from `from_lsn` onward that is still resident
    /// in the in-memory buffer or the file, for recovery's redo scan.
    pub fn read_from(&self, from_lsn: Lsn) -> Result<Vec<u8>> {
        let file_bytes = {
            let mut file = self.file.lock();
            let written = self.written_to_file_lsn.load(Ordering::Acquire);
            if from_lsn >= written {
                Vec::new()
            } else {
                let start = LOG_FILE_HEADER_SIZE + (from_lsn - LOG_FILE_HEADER_SIZE);
                let mut buf = vec![0u8; (written - from_lsn) as usize];
                file.seek(SeekFrom::Start(start)).map_err(EngineError::Io)?;
                std::io::Read::read_exact(&mut *file, &mut buf).map_err(EngineError::Io)?;
                buf
            }
        };
        let buffer = self.buffer.lock();
        let buffered_start = buffer.base_lsn.max(from_lsn);
        let mut out = file_bytes;
        if buffered_start < buffer.base_lsn + buffer.bytes.len() as u64 {
            let skip = (buffered_start - buffer.base_lsn) as usize;
            out.extend_from_slice(&buffer.bytes[skip..]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reserves_contiguous_lsn_range() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSys::create(dir.path().join("redo.log")).unwrap();
        let start0 = log.current_lsn();
        let (s1, e1) = log.append(&[1, 2, 3, 4]);
        assert_eq!(s1, start0);
        assert_eq!(e1, start0 + 4);
        let (s2, _) = log.append(&[5, 6]);
        assert_eq!(s2, e1);
    }

    #[test]
    fn write_up_to_advances_flushed_lsn() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSys::create(dir.path().join("redo.log")).unwrap();
        let (_s, e) = log.append(&[9, 9, 9]);
        assert!(log.flushed_to_disk_lsn() < e);
        log.write_up_to(e, FlushMode::FlushLog).unwrap();
        assert!(log.flushed_to_disk_lsn() >= e);
    }

    #[test]
    fn read_from_returns_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSys::create(dir.path().join("redo.log")).unwrap();
        let (s, _e) = log.append(&[7, 7, 7]);
        log.write_up_to(log.current_lsn(), FlushMode::FlushLog).unwrap();
        let bytes = log.read_from(s).unwrap();
        assert_eq!(bytes, vec![7, 7, 7]);
    }
}
