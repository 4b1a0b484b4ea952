//! Flush list: dirty blocks ordered by ascending oldest-modification LSN
//! (spec §4.2 "Flush list", invariant "dirty block always on exactly one
//! flush list; clean block never on it").

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::common::Lsn;

/// Keyed by `(oldest_modification_lsn, frame_id)` so ties between pages
/// dirtied in the same mini-transaction still produce a total order.
pub struct FlushList {
    inner: Mutex<BTreeMap<(Lsn, usize), ()>>,
}

impl FlushList {
    pub fn new() -> Self {
        FlushList {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, frame_id: usize, oldest_modification: Lsn) {
        self.inner.lock().insert((oldest_modification, frame_id), ());
    }

    pub fn remove(&self, frame_id: usize, oldest_modification: Lsn) {
        self.inner.lock().remove(&(oldest_modification, frame_id));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn oldest_lsn(&self) -> Option<Lsn> {
        self.inner.lock().keys().next().map(|&(lsn, _)| lsn)
    }

    /// Frame ids whose oldest-modification LSN is strictly below
    /// `lsn_limit`, in ascending-LSN order (spec's LIST-type flush walk).
    pub fn below(&self, lsn_limit: Lsn) -> Vec<usize> {
        self.inner
            .lock()
            .range(..(lsn_limit, usize::MAX))
            .map(|(&(_, frame_id), _)| frame_id)
            .collect()
    }
}

impl Default for FlushList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_by_ascending_lsn() {
        let fl = FlushList::new();
        fl.insert(1, 100);
        fl.insert(2, 50);
        fl.insert(3, 75);
        assert_eq!(fl.oldest_lsn(), Some(50));
    }

    #[test]
    fn below_respects_limit() {
        let fl = FlushList::new();
        fl.insert(1, 100);
        fl.insert(2, 50);
        fl.insert(3, 75);
        let mut below = fl.below(80);
        below.sort();
        assert_eq!(below, vec![2, 3]);
    }

    #[test]
    fn remove_drops_entry() {
        let fl = FlushList::new();
        fl.insert(1, 100);
        fl.remove(1, 100);
        assert!(fl.is_empty());
    }
}
