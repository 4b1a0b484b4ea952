//! Generic file-page header and trailer shared by every page type, whether
//! it holds B-tree records, an extent descriptor, an undo log, or an ibuf
//! bitmap (spec §3 "Page", §6 "Persisted layouts").

use crate::common::{mach, PageNo, SpaceId, FIL_NULL, PAGE_SIZE};

pub const FIL_PAGE_SPACE_OR_CHKSUM: usize = 0;
pub const FIL_PAGE_OFFSET: usize = 4;
pub const FIL_PAGE_PREV: usize = 8;
pub const FIL_PAGE_NEXT: usize = 12;
pub const FIL_PAGE_LSN: usize = 16;
pub const FIL_PAGE_TYPE: usize = 24;
pub const FIL_PAGE_FILE_FLUSH_LSN: usize = 26;
pub const FIL_PAGE_SPACE_ID: usize = 34;
pub const FIL_PAGE_DATA: usize = 38;

pub const FIL_PAGE_END_LSN_OLD_CHKSUM: usize = PAGE_SIZE - 8;
pub const FIL_PAGE_DATA_END: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FilPageType {
    Allocated = 0,
    UndoLog = 2,
    Inode = 3,
    IbufFreeList = 4,
    IbufBitmap = 5,
    Sys = 6,
    TrxSys = 7,
    FspHdr = 8,
    Xdes = 9,
    Blob = 10,
    Index = 17855,
}

impl FilPageType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => FilPageType::Allocated,
            2 => FilPageType::UndoLog,
            3 => FilPageType::Inode,
            4 => FilPageType::IbufFreeList,
            5 => FilPageType::IbufBitmap,
            6 => FilPageType::Sys,
            7 => FilPageType::TrxSys,
            8 => FilPageType::FspHdr,
            9 => FilPageType::Xdes,
            10 => FilPageType::Blob,
            17855 => FilPageType::Index,
            _ => return None,
        })
    }
}

/// A raw fixed-size page buffer. Layout: `[0..38)` file header,
/// `[38..PAGE_SIZE-8)` payload, `[PAGE_SIZE-8..PAGE_SIZE)` file trailer.
pub struct PageBuf(Box<[u8]>);

impl PageBuf {
    pub fn zeroed() -> Self {
        PageBuf(vec![0u8; PAGE_SIZE].into_boxed_slice())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        assert_eq!(bytes.len(), PAGE_SIZE);
        PageBuf(bytes.into_boxed_slice())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[FIL_PAGE_DATA..FIL_PAGE_END_LSN_OLD_CHKSUM]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.0[FIL_PAGE_DATA..FIL_PAGE_END_LSN_OLD_CHKSUM]
    }

    pub fn space_id(&self) -> SpaceId {
        mach::read_u32(&self.0[FIL_PAGE_SPACE_ID..])
    }

    pub fn set_space_id(&mut self, space: SpaceId) {
        mach::write_u32(&mut self.0[FIL_PAGE_SPACE_ID..], space);
    }

    pub fn page_no(&self) -> PageNo {
        mach::read_u32(&self.0[FIL_PAGE_OFFSET..])
    }

    pub fn set_page_no(&mut self, page_no: PageNo) {
        mach::write_u32(&mut self.0[FIL_PAGE_OFFSET..], page_no);
    }

    pub fn prev(&self) -> PageNo {
        mach::read_u32(&self.0[FIL_PAGE_PREV..])
    }

    pub fn set_prev(&mut self, page_no: PageNo) {
        mach::write_u32(&mut self.0[FIL_PAGE_PREV..], page_no);
    }

    pub fn next(&self) -> PageNo {
        mach::read_u32(&self.0[FIL_PAGE_NEXT..])
    }

    pub fn set_next(&mut self, page_no: PageNo) {
        mach::write_u32(&mut self.0[FIL_PAGE_NEXT..], page_no);
    }

    pub fn lsn(&self) -> u64 {
        // FIL_PAGE_LSN is 8 bytes on disk (newest-modification LSN).
        mach::read_u64(&self.0[FIL_PAGE_LSN..])
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        mach::write_u64(&mut self.0[FIL_PAGE_LSN..], lsn);
        // Trailer duplicates the low 32 bits for the torn-page check.
        let low = lsn as u32;
        mach::write_u32(&mut self.0[FIL_PAGE_END_LSN_OLD_CHKSUM + 4..], low);
    }

    pub fn page_type(&self) -> u16 {
        mach::read_u16(&self.0[FIL_PAGE_TYPE..])
    }

    pub fn set_page_type(&mut self, t: FilPageType) {
        mach::write_u16(&mut self.0[FIL_PAGE_TYPE..], t as u16);
    }

    /// Hardware/software CRC32C over the payload, matching the checksum
    /// slot convention used by the torn-page trailer check.
    pub fn compute_checksum(&self) -> u32 {
        crc32c::crc32c(&self.0[FIL_PAGE_OFFSET..FIL_PAGE_END_LSN_OLD_CHKSUM])
    }

    pub fn stamp_checksum(&mut self) {
        let sum = self.compute_checksum();
        mach::write_u32(&mut self.0[FIL_PAGE_SPACE_OR_CHKSUM..], sum);
        mach::write_u32(&mut self.0[FIL_PAGE_END_LSN_OLD_CHKSUM..], sum);
    }

    /// Torn-page detection (spec §3, §6): the trailer's checksum and
    /// low-LSN copies must agree with the header.
    pub fn verify_not_torn(&self) -> bool {
        let header_chk = mach::read_u32(&self.0[FIL_PAGE_SPACE_OR_CHKSUM..]);
        let trailer_chk = mach::read_u32(&self.0[FIL_PAGE_END_LSN_OLD_CHKSUM..]);
        let header_lsn_low = self.lsn() as u32;
        let trailer_lsn_low = mach::read_u32(&self.0[FIL_PAGE_END_LSN_OLD_CHKSUM + 4..]);
        header_chk == trailer_chk && header_lsn_low == trailer_lsn_low
    }

    pub fn init_fil_header(&mut self, space: SpaceId, page_no: PageNo, page_type: FilPageType) {
        self.set_space_id(space);
        self.set_page_no(page_no);
        self.set_prev(FIL_NULL);
        self.set_next(FIL_NULL);
        self.set_lsn(0);
        self.set_page_type(page_type);
    }
}
