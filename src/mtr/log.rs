//! Redo record opcodes and the on-the-wire record encoding (spec §4.3, §6
//! "redo record opcodes").

use crate::common::{mach, Lsn, PageNo, SpaceId};

/// High bit of the opcode byte marks "this is the only record produced by
/// its mini-transaction" (spec §4.3 `commit`); records belonging to a
/// multi-page mtr are followed by a `MultiRecEnd` terminator instead.
pub const SINGLE_REC_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RedoOpcode {
    Write1 = 1,
    Write2 = 2,
    Write4 = 3,
    Write8 = 4,
    WriteString = 5,
    PageInit = 6,
    PageCreate = 7,
    ListEndDelete = 8,
    ListStartDelete = 9,
    ListEndCopyCreated = 10,
    InsertRec = 11,
    DeleteRec = 12,
    MultiRecEnd = 13,
    Checkpoint = 14,
}

impl RedoOpcode {
    pub fn from_u8(v: u8) -> Option<RedoOpcode> {
        Some(match v & !SINGLE_REC_FLAG {
            1 => RedoOpcode::Write1,
            2 => RedoOpcode::Write2,
            3 => RedoOpcode::Write4,
            4 => RedoOpcode::Write8,
            5 => RedoOpcode::WriteString,
            6 => RedoOpcode::PageInit,
            7 => RedoOpcode::PageCreate,
            8 => RedoOpcode::ListEndDelete,
            9 => RedoOpcode::ListStartDelete,
            10 => RedoOpcode::ListEndCopyCreated,
            11 => RedoOpcode::InsertRec,
            12 => RedoOpcode::DeleteRec,
            13 => RedoOpcode::MultiRecEnd,
            14 => RedoOpcode::Checkpoint,
            _ => return None,
        })
    }
}

/// One parsed redo record: enough to either replay it against a page during
/// recovery or to re-serialize it into the log buffer at `mtr::commit`.
#[derive(Debug, Clone)]
pub struct RedoRecord {
    pub opcode: RedoOpcode,
    pub single_rec: bool,
    pub space: SpaceId,
    pub page_no: PageNo,
    pub page_offset: u16,
    pub payload: Vec<u8>,
}

impl RedoRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.payload.len());
        let opcode_byte = self.opcode as u8 | if self.single_rec { SINGLE_REC_FLAG } else { 0 };
        out.push(opcode_byte);
        let mut buf = [0u8; 4];
        mach::write_compressed(&mut buf, self.space);
        out.extend_from_slice(&buf[..mach::compressed_size(self.space)]);
        mach::write_compressed(&mut buf, self.page_no);
        out.extend_from_slice(&buf[..mach::compressed_size(self.page_no)]);
        let mut off_buf = [0u8; 2];
        mach::write_u16(&mut off_buf, self.page_offset);
        out.extend_from_slice(&off_buf);
        let mut len_buf = [0u8; 4];
        mach::write_compressed(&mut len_buf, self.payload.len() as u32);
        out.extend_from_slice(&len_buf[..mach::compressed_size(self.payload.len() as u32)]);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses one record starting at `buf[0]`, returning `(record,
    /// bytes_consumed)`.
    pub fn decode(buf: &[u8]) -> Option<(RedoRecord, usize)> {
        if buf.is_empty() {
            return None;
        }
        let opcode_byte = buf[0];
        let single_rec = opcode_byte & SINGLE_REC_FLAG != 0;
        let opcode = RedoOpcode::from_u8(opcode_byte)?;
        let mut pos = 1;
        let (space, n) = mach::read_compressed(&buf[pos..]);
        pos += n;
        let (page_no, n) = mach::read_compressed(&buf[pos..]);
        pos += n;
        let page_offset = mach::read_u16(&buf[pos..]);
        pos += 2;
        let (len, n) = mach::read_compressed(&buf[pos..]);
        pos += n;
        let len = len as usize;
        if buf.len() < pos + len {
            return None;
        }
        let payload = buf[pos..pos + len].to_vec();
        pos += len;
        Some((
            RedoRecord {
                opcode,
                single_rec,
                space,
                page_no,
                page_offset,
                payload,
            },
            pos,
        ))
    }
}

/// Header written at the start of every log file (spec §4.3 "Global log").
pub struct LogHeader {
    pub checkpoint_no: u64,
    pub checkpoint_lsn: Lsn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redo_record_round_trips() {
        let rec = RedoRecord {
            opcode: RedoOpcode::Write4,
            single_rec: true,
            space: 3,
            page_no: 500,
            page_offset: 40,
            payload: vec![1, 2, 3, 4],
        };
        let encoded = rec.encode();
        let (decoded, consumed) = RedoRecord::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.opcode, RedoOpcode::Write4);
        assert!(decoded.single_rec);
        assert_eq!(decoded.space, 3);
        assert_eq!(decoded.page_no, 500);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn multi_rec_end_has_no_single_flag() {
        let rec = RedoRecord {
            opcode: RedoOpcode::MultiRecEnd,
            single_rec: false,
            space: 0,
            page_no: 0,
            page_offset: 0,
            payload: vec![],
        };
        let encoded = rec.encode();
        assert_eq!(encoded[0] & SINGLE_REC_FLAG, 0);
    }
}
