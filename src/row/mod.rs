//! L9: conversion between the logical row (`dtuple`) and the physical
//! compact record format on a page (spec §4.6 "Record layout and
//! conversion").

pub mod blob;
pub mod dtuple;

use crate::error::{EngineError, Result};
use crate::page::record::{CompactHeader, FieldDirectoryWriter, RecOffsets, RecType};

use dtuple::{BlobRef, ColumnType, DField, DTuple};

/// Static column metadata an index carries for its records: enough to walk
/// the field directory and reconstruct a `DTuple` without any schema
/// lookups at the row layer (spec §4.6, §4.8 "dict cache ties records back
/// to dictionary objects").
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub col_type: ColumnType,
    pub nullable: bool,
    /// `Some(n)` for a fixed-width column (no length byte in the
    /// directory); `None` for variable-length columns.
    pub fixed_len: Option<usize>,
}

/// Parses the field directory immediately preceding `origin` and returns
/// per-field absolute end offsets plus externally-stored flags, mirroring
/// `rec_get_offsets` (spec §4.6).
pub fn rec_get_offsets(page: &[u8], origin: usize, columns: &[ColumnMeta]) -> RecOffsets {
    let nullable_count = columns.iter().filter(|c| c.nullable).count();
    let bitmap_bytes = nullable_count.div_ceil(8);

    let header_end = origin - crate::page::record::REC_COMPACT_HEADER_SIZE;
    let bitmap_start = header_end - bitmap_bytes;
    let null_bitmap = &page[bitmap_start..header_end];

    let mut null_flags = vec![false; columns.len()];
    let mut nullable_idx = 0usize;
    for (i, col) in columns.iter().enumerate() {
        if col.nullable {
            let byte = null_bitmap[nullable_idx / 8];
            let bit_pos = 7 - (nullable_idx % 8);
            null_flags[i] = (byte >> bit_pos) & 1 != 0;
            nullable_idx += 1;
        }
    }

    // Length bytes are stored in reverse column order, immediately before
    // the null bitmap, one (or two, high bit set) per non-null
    // variable-length column.
    let mut len_cursor = bitmap_start;
    let mut field_lens = vec![0usize; columns.len()];
    let mut field_external = vec![false; columns.len()];
    for i in (0..columns.len()).rev() {
        let col = &columns[i];
        if null_flags[i] {
            continue;
        }
        if let Some(fixed) = col.fixed_len {
            field_lens[i] = fixed;
            continue;
        }
        len_cursor -= 1;
        let b0 = page[len_cursor];
        if b0 & 0x80 == 0 {
            field_lens[i] = b0 as usize;
        } else {
            len_cursor -= 1;
            let b1 = page[len_cursor];
            let v = (((b0 as u16) << 8) | b1 as u16) & 0x7FFF;
            field_external[i] = v & 0x4000 != 0;
            field_lens[i] = (v & 0x3FFF) as usize;
        }
    }

    let mut ends = Vec::with_capacity(columns.len());
    let mut external = Vec::with_capacity(columns.len());
    let mut cursor = origin as u32;
    for i in 0..columns.len() {
        if !null_flags[i] {
            cursor += field_lens[i] as u32;
        }
        ends.push(cursor);
        external.push(field_external[i]);
    }

    RecOffsets {
        ends,
        external,
        nulls: null_flags,
    }
}

/// Reconstructs the logical row from a record's bytes and its precomputed
/// offsets. An externally stored field yields a `DField` carrying only its
/// inline local prefix in `data`, with `external` set to the BLOB
/// reference; callers that need the full value call
/// [`blob::read_external`].
pub fn rec_convert_to_dtuple(page: &[u8], origin: usize, offsets: &RecOffsets, columns: &[ColumnMeta]) -> DTuple {
    let mut tuple = DTuple::new();
    for i in 0..columns.len() {
        if offsets.is_null(i) {
            tuple.fields.push(DField::null(columns[i].col_type));
            continue;
        }
        let (start, end) = offsets.field_range(i);
        let bytes = &page[start as usize..end as usize];
        if offsets.external[i] {
            let reference = BlobRef::decode(&bytes[bytes.len() - dtuple::BLOB_REF_SIZE..]);
            let mut field = DField::inline(columns[i].col_type, bytes[..bytes.len() - dtuple::BLOB_REF_SIZE].to_vec());
            field.external = Some(reference);
            tuple.fields.push(field);
        } else {
            tuple.fields.push(DField::inline(columns[i].col_type, bytes.to_vec()));
        }
    }
    tuple
}

/// A fully assembled record ready to be spliced into a page: the header
/// bytes (field directory + compact header) followed by the data bytes,
/// with `origin` marking the boundary between the two (spec §4.6
/// "rec_build_for_insert").
pub struct BuiltRecord {
    pub header: Vec<u8>,
    pub data: Vec<u8>,
    pub heap_no: u16,
    pub rec_type: RecType,
}

impl BuiltRecord {
    pub fn total_len(&self) -> usize {
        self.header.len() + self.data.len()
    }
}

/// Builds the physical bytes for `tuple` against `columns`, pushing any
/// field whose encoded length exceeds `extern_threshold` out to the
/// supplied externaliser (spec §4.6: "fields wider than the configured
/// threshold are stored externally, keeping `blob::LOCAL_PREFIX_LEN` bytes
/// inline"). `heap_no` and `rec_type` are supplied by the caller (the
/// index layer owns heap-number assignment and page-directory ownership).
pub fn rec_build_for_insert(
    tuple: &DTuple,
    columns: &[ColumnMeta],
    heap_no: u16,
    rec_type: RecType,
    mut externalise: impl FnMut(usize, &[u8]) -> Result<(Vec<u8>, BlobRef)>,
) -> Result<BuiltRecord> {
    if tuple.fields.len() != columns.len() {
        return Err(EngineError::InvalidArgument(format!(
            "tuple has {} fields, index expects {}",
            tuple.fields.len(),
            columns.len()
        )));
    }

    let nullable: Vec<bool> = columns.iter().map(|c| c.nullable).collect();
    let mut directory = Vec::new();
    let mut data = Vec::new();

    for (i, (field, col)) in tuple.fields.iter().zip(columns.iter()).enumerate() {
        if field.is_null {
            if !col.nullable {
                return Err(EngineError::InvalidArgument(format!("column {} is not nullable", i)));
            }
            continue;
        }
        if col.fixed_len.is_some() {
            data.extend_from_slice(&field.data);
            continue;
        }
        if field.data.len() > crate::page::record::MAX_INLINE_FIELD_LEN {
            let (prefix, reference) = externalise(i, &field.data)?;
            data.extend_from_slice(&prefix);
            data.extend_from_slice(&reference.encode());
        } else {
            data.extend_from_slice(&field.data);
        }
    }

    // Directory bytes are written in reverse-field order by
    // `FieldDirectoryWriter`, then the whole block is reversed so that
    // walking backwards from `origin` (as `rec_get_offsets` does) recovers
    // forward column order.
    let mut writer_buf = Vec::new();
    {
        let mut writer = FieldDirectoryWriter::new(&mut writer_buf);
        for (i, (field, col)) in tuple.fields.iter().zip(columns.iter()).enumerate().rev() {
            if col.fixed_len.is_some() || field.is_null {
                continue;
            }
            let encoded_len = if field.data.len() > crate::page::record::MAX_INLINE_FIELD_LEN {
                dtuple::BLOB_REF_SIZE + field.data.len().min(crate::row::blob::LOCAL_PREFIX_LEN)
            } else {
                field.data.len()
            };
            writer.push_len(encoded_len, field.data.len() > crate::page::record::MAX_INLINE_FIELD_LEN);
        }
        writer.push_null_bitmap(&nullable);
    }
    directory.extend(writer_buf);

    let mut header = vec![0u8; crate::page::record::REC_COMPACT_HEADER_SIZE];
    let compact = CompactHeader {
        deleted: false,
        min_rec: false,
        n_owned: 0,
        heap_no,
        rec_type,
        next_offset: 0,
    };
    compact.write(&mut header, crate::page::record::REC_COMPACT_HEADER_SIZE);

    let mut full_header = directory;
    full_header.extend(header);

    Ok(BuiltRecord {
        header: full_header,
        data,
        heap_no,
        rec_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::record::REC_COMPACT_HEADER_SIZE;

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta {
                col_type: ColumnType::Int,
                nullable: false,
                fixed_len: Some(4),
            },
            ColumnMeta {
                col_type: ColumnType::Text,
                nullable: true,
                fixed_len: None,
            },
        ]
    }

    #[test]
    fn build_and_parse_round_trip_without_nulls() {
        let cols = columns();
        let tuple = DTuple::new()
            .push(DField::inline(ColumnType::Int, vec![0, 0, 0, 42]))
            .push(DField::inline(ColumnType::Text, b"hello".to_vec()));

        let built = rec_build_for_insert(&tuple, &cols, 2, RecType::Ordinary, |_, _| {
            unreachable!("no field should externalise in this test")
        })
        .unwrap();

        let mut page = vec![0u8; 256];
        let origin = 128;
        let header_start = origin - built.header.len();
        page[header_start..origin].copy_from_slice(&built.header);
        page[origin..origin + built.data.len()].copy_from_slice(&built.data);

        let offsets = rec_get_offsets(&page, origin, &cols);
        let parsed = rec_convert_to_dtuple(&page, origin, &offsets, &cols);
        assert_eq!(parsed.fields[0].data, vec![0, 0, 0, 42]);
        assert_eq!(parsed.fields[1].data, b"hello");

        let read_header = CompactHeader::read(&page, origin);
        assert_eq!(read_header.heap_no, 2);
        let _ = REC_COMPACT_HEADER_SIZE;
    }

    #[test]
    fn null_variable_field_round_trips() {
        let cols = columns();
        let tuple = DTuple::new()
            .push(DField::inline(ColumnType::Int, vec![0, 0, 0, 1]))
            .push(DField::null(ColumnType::Text));

        let built = rec_build_for_insert(&tuple, &cols, 3, RecType::Ordinary, |_, _| unreachable!()).unwrap();
        let mut page = vec![0u8; 128];
        let origin = 64;
        let header_start = origin - built.header.len();
        page[header_start..origin].copy_from_slice(&built.header);
        page[origin..origin + built.data.len()].copy_from_slice(&built.data);

        let offsets = rec_get_offsets(&page, origin, &cols);
        let parsed = rec_convert_to_dtuple(&page, origin, &offsets, &cols);
        assert!(parsed.fields[1].is_null);
    }

    #[test]
    fn oversized_field_is_externalised() {
        let cols = columns();
        let big_value = vec![0x5Au8; crate::page::record::MAX_INLINE_FIELD_LEN + 5000];
        let tuple = DTuple::new()
            .push(DField::inline(ColumnType::Int, vec![0, 0, 0, 7]))
            .push(DField::inline(ColumnType::Text, big_value.clone()));

        let built = rec_build_for_insert(&tuple, &cols, 2, RecType::Ordinary, |_, bytes| {
            let prefix = bytes[..crate::row::blob::LOCAL_PREFIX_LEN].to_vec();
            Ok((
                prefix,
                BlobRef {
                    space: 0,
                    page_no: 9,
                    offset: 38,
                    length: bytes.len() as u32,
                },
            ))
        })
        .unwrap();

        let mut page = vec![0u8; 2048];
        let origin = 1024;
        let header_start = origin - built.header.len();
        page[header_start..origin].copy_from_slice(&built.header);
        page[origin..origin + built.data.len()].copy_from_slice(&built.data);

        let offsets = rec_get_offsets(&page, origin, &cols);
        assert!(offsets.external[1]);
        let parsed = rec_convert_to_dtuple(&page, origin, &offsets, &cols);
        assert!(parsed.fields[1].external.is_some());
        assert_eq!(parsed.fields[1].external.unwrap().length as usize, big_value.len());
    }
}
