//! Page directory: 4-8 records per slot, binary search entry points, plus
//! the infimum/supremum pseudo-records bounding every index page (spec §3
//! "Page directory", §4.5 cursor search).

use crate::common::mach;

pub const PAGE_DIR_SLOT_SIZE: usize = 2;
pub const PAGE_DIR_SLOT_MIN_N_OWNED: u8 = 4;
pub const PAGE_DIR_SLOT_MAX_N_OWNED: u8 = 8;

pub const INFIMUM_HEAP_NO: u16 = 0;
pub const SUPREMUM_HEAP_NO: u16 = 1;

/// The page directory grows backwards from the page end, one 2-byte slot
/// per entry, each slot holding the byte offset of the record that "owns"
/// a range of up to 8 records.
pub struct PageDirectory;

impl PageDirectory {
    pub fn slot_offset(page_end: usize, slot_index: usize) -> usize {
        page_end - PAGE_DIR_SLOT_SIZE * (slot_index + 1)
    }

    pub fn read_slot(page: &[u8], page_end: usize, slot_index: usize) -> u16 {
        let off = Self::slot_offset(page_end, slot_index);
        mach::read_u16(&page[off..])
    }

    pub fn write_slot(page: &mut [u8], page_end: usize, slot_index: usize, rec_offset: u16) {
        let off = Self::slot_offset(page_end, slot_index);
        mach::write_u16(&mut page[off..], rec_offset);
    }

    /// Binary search over directory slots for the slot whose owned range may
    /// contain `key`'s insertion point; returns the slot index to start a
    /// linear scan from (spec §4.5: "binary search over directory slots,
    /// then a linear scan within the located slot's owned range").
    pub fn search_slot<F>(page: &[u8], page_end: usize, n_slots: usize, mut cmp: F) -> usize
    where
        F: FnMut(u16) -> std::cmp::Ordering,
    {
        use std::cmp::Ordering;
        let (mut lo, mut hi) = (0usize, n_slots);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let rec = Self::read_slot(page, page_end, mid);
            match cmp(rec) {
                Ordering::Less | Ordering::Equal => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        lo.saturating_sub(1)
    }

    /// Number of slots needed to cover `n_records` owned records at the
    /// standard 4-8 fan-out, always including the infimum and supremum
    /// slots.
    pub fn slots_needed(n_user_records: usize) -> usize {
        2 + (n_user_records + PAGE_DIR_SLOT_MAX_N_OWNED as usize - 1)
            / PAGE_DIR_SLOT_MAX_N_OWNED as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_offsets_grow_backwards() {
        let page_end = 1000;
        assert_eq!(PageDirectory::slot_offset(page_end, 0), 998);
        assert_eq!(PageDirectory::slot_offset(page_end, 1), 996);
    }

    #[test]
    fn slots_needed_accounts_for_fanout() {
        assert_eq!(PageDirectory::slots_needed(0), 2);
        assert_eq!(PageDirectory::slots_needed(8), 3);
        assert_eq!(PageDirectory::slots_needed(9), 4);
    }

    #[test]
    fn slot_round_trip() {
        let mut page = vec![0u8; 100];
        PageDirectory::write_slot(&mut page, 100, 0, 42);
        assert_eq!(PageDirectory::read_slot(&page, 100, 0), 42);
    }
}
