//! Page-level cursor search: locates the record matching a search mode
//! against a key within one page's record chain (spec §4.5 "Cursor
//! search"). The page directory is still maintained on every page
//! (`page::header::init_infimum_supremum`/the B-tree layer's rewrite path)
//! for structural fidelity, but search itself walks the record chain
//! directly rather than consulting directory slots — see DESIGN.md "page
//! search without directory-assisted binary search".

use std::cmp::Ordering;

use crate::page::fil::PageBuf;
use crate::row::dtuple::{compare_tuples, CollationComparator, DTuple};
use crate::row::{rec_convert_to_dtuple, rec_get_offsets, ColumnMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Strictly less than the search key.
    L,
    /// Less than or equal to the search key.
    LE,
    /// Strictly greater than the search key.
    G,
    /// Greater than or equal to the search key.
    GE,
}

#[derive(Debug, Clone, Copy)]
pub struct PageSearchResult {
    pub origin: usize,
    pub exact_match: bool,
    /// False when no record on the page satisfies `mode` (e.g. `GE` past
    /// the last record, or `LE` before the first): the caller should fall
    /// back to a page boundary (leftmost child, or the next/prev sibling).
    pub found: bool,
}

/// Reconstructs the logical tuple stored at `origin`, using `columns` to
/// walk its field directory (spec §4.6 `rec_get_offsets` /
/// `rec_convert_to_dtuple`).
pub fn read_record_tuple(page: &[u8], origin: usize, columns: &[ColumnMeta]) -> DTuple {
    let offsets = rec_get_offsets(page, origin, columns);
    rec_convert_to_dtuple(page, origin, &offsets, columns)
}

/// Finds the record on `page` matching `mode` against `key`. Records are
/// always kept in ascending key order by the B-tree layer's
/// rewrite-on-mutation discipline, so a single linear pass suffices.
pub fn search_page(
    page: &PageBuf,
    key: &DTuple,
    columns: &[ColumnMeta],
    mode: SearchMode,
    collation: &dyn CollationComparator,
) -> PageSearchResult {
    let bytes = page.as_slice();
    let mut last_match: Option<(usize, Ordering)> = None;
    for origin in crate::page::iter_records_on(bytes) {
        let tuple = read_record_tuple(bytes, origin, columns);
        let cmp = compare_tuples(&tuple, key, collation).ordering;
        let accept = match mode {
            SearchMode::L => cmp == Ordering::Less,
            SearchMode::LE => cmp != Ordering::Greater,
            SearchMode::G => cmp == Ordering::Greater,
            SearchMode::GE => cmp != Ordering::Less,
        };
        match mode {
            SearchMode::G | SearchMode::GE => {
                if accept {
                    return PageSearchResult {
                        origin,
                        exact_match: cmp == Ordering::Equal,
                        found: true,
                    };
                }
            }
            SearchMode::L | SearchMode::LE => {
                if accept {
                    last_match = Some((origin, cmp));
                } else {
                    // Ascending order: once a record fails L/LE, every
                    // later one does too.
                    break;
                }
            }
        }
    }
    match last_match {
        Some((origin, cmp)) => PageSearchResult {
            origin,
            exact_match: cmp == Ordering::Equal,
            found: true,
        },
        None => PageSearchResult {
            origin: crate::page::PAGE_INFIMUM_OFFSET,
            exact_match: false,
            found: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::header;
    use crate::row::dtuple::{BinaryCollation, ColumnType, DField};
    use crate::row::rec_build_for_insert;

    fn columns() -> Vec<ColumnMeta> {
        vec![ColumnMeta {
            col_type: ColumnType::Int,
            nullable: false,
            fixed_len: Some(4),
        }]
    }

    fn page_with(values: &[u32]) -> PageBuf {
        let mut buf = PageBuf::zeroed();
        header::init_index_page(&mut buf, 0, 1, 55, 0);
        let cols = columns();
        let mut cursor = crate::page::PAGE_DATA;
        let mut prev_origin = crate::page::PAGE_INFIMUM_OFFSET;
        for (i, &v) in values.iter().enumerate() {
            let tuple = DTuple::new().push(DField::inline(ColumnType::Int, v.to_be_bytes().to_vec()));
            let built = rec_build_for_insert(&tuple, &cols, (i + 2) as u16, crate::page::record::RecType::Ordinary, |_, _| {
                unreachable!()
            })
            .unwrap();
            let origin = cursor + built.header.len();
            let bytes = buf.as_mut_slice();
            bytes[cursor..origin].copy_from_slice(&built.header);
            bytes[origin..origin + built.data.len()].copy_from_slice(&built.data);
            let mut prev = crate::page::record::CompactHeader::read(bytes, prev_origin);
            prev.set_next_origin(prev_origin, origin);
            prev.write(bytes, prev_origin);
            prev_origin = origin;
            cursor = origin + built.data.len();
        }
        let bytes = buf.as_mut_slice();
        let mut prev = crate::page::record::CompactHeader::read(bytes, prev_origin);
        prev.set_next_origin(prev_origin, crate::page::PAGE_SUPREMUM_OFFSET);
        prev.write(bytes, prev_origin);
        header::set_n_recs(&mut buf, values.len() as u16);
        buf
    }

    #[test]
    fn ge_finds_first_match() {
        let buf = page_with(&[10, 20, 30]);
        let key = DTuple::new().push(DField::inline(ColumnType::Int, 15u32.to_be_bytes().to_vec()));
        let r = search_page(&buf, &key, &columns(), SearchMode::GE, &BinaryCollation);
        assert!(r.found);
        assert!(!r.exact_match);
        let found = read_record_tuple(buf.as_slice(), r.origin, &columns());
        assert_eq!(found.fields[0].data, 20u32.to_be_bytes().to_vec());
    }

    #[test]
    fn le_before_first_record_reports_not_found() {
        let buf = page_with(&[10, 20, 30]);
        let key = DTuple::new().push(DField::inline(ColumnType::Int, 5u32.to_be_bytes().to_vec()));
        let r = search_page(&buf, &key, &columns(), SearchMode::LE, &BinaryCollation);
        assert!(!r.found);
    }

    #[test]
    fn exact_match_detected() {
        let buf = page_with(&[10, 20, 30]);
        let key = DTuple::new().push(DField::inline(ColumnType::Int, 20u32.to_be_bytes().to_vec()));
        let r = search_page(&buf, &key, &columns(), SearchMode::LE, &BinaryCollation);
        assert!(r.exact_match);
    }
}
