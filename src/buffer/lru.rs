//! Midpoint-insertion LRU: an "old" sublist and a "young" sublist (spec
//! §4.2 "LRU list"). First reads land at the old sublist's head; a page is
//! promoted to the young head only on a subsequent access after it has
//! aged past `old_sublist_min_age` in the list, which is what gives a
//! sequential scan (every page touched exactly once) no way to evict hot
//! young pages.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Fraction of the LRU reserved for the old sublist (spec leaves the ratio
/// unspecified; this follows the original's well-known 3/8 default).
const OLD_RATIO_NUM: usize = 3;
const OLD_RATIO_DEN: usize = 8;

#[derive(Clone, Copy)]
struct Entry {
    frame_id: usize,
    enqueued_at: Instant,
    in_young: bool,
}

/// The LRU ordering itself: a deque of frame ids partitioned into a young
/// prefix and an old suffix, plus per-frame first-access timestamps used to
/// decide promotion eligibility. Frame contents/pin/dirty state live in
/// `BufferBlock`; this type only orders frame ids.
pub struct Lru {
    inner: Mutex<VecDeque<Entry>>,
    old_sublist_min_age: Duration,
}

impl Lru {
    pub fn new(old_sublist_min_age: Duration) -> Self {
        Lru {
            inner: Mutex::new(VecDeque::new()),
            old_sublist_min_age,
        }
    }

    fn old_target_len(total: usize) -> usize {
        total * OLD_RATIO_NUM / OLD_RATIO_DEN
    }

    /// Inserts a freshly read page at the old sublist's head (spec:
    /// "first-read pages enter at the old-sublist head").
    pub fn insert_at_old_head(&self, frame_id: usize) {
        let mut list = self.inner.lock();
        let old_start = list.len().saturating_sub(Self::old_target_len(list.len() + 1));
        list.insert(
            old_start,
            Entry {
                frame_id,
                enqueued_at: Instant::now(),
                in_young: false,
            },
        );
    }

    /// Records an access: if the frame is in the old sublist and has aged
    /// past the minimum, it is moved to the young head. An access to an
    /// already-young frame also re-promotes it to the head (pure LRU within
    /// the young sublist).
    pub fn touch(&self, frame_id: usize) {
        let mut list = self.inner.lock();
        let Some(pos) = list.iter().position(|e| e.frame_id == frame_id) else {
            return;
        };
        let entry = list[pos];
        let should_promote = !entry.in_young && entry.enqueued_at.elapsed() >= self.old_sublist_min_age;
        if should_promote || entry.in_young {
            list.remove(pos);
            list.push_front(Entry {
                frame_id,
                enqueued_at: Instant::now(),
                in_young: true,
            });
        }
    }

    pub fn remove(&self, frame_id: usize) {
        let mut list = self.inner.lock();
        if let Some(pos) = list.iter().position(|e| e.frame_id == frame_id) {
            list.remove(pos);
        }
    }

    /// Frame id at the LRU tail (the next eviction candidate if
    /// replaceable), without removing it.
    pub fn tail(&self) -> Option<usize> {
        self.inner.lock().back().map(|e| e.frame_id)
    }

    /// Iterates from the tail, used by LRU-type `flush_batch` to find dirty
    /// replaceable blocks without disturbing list order.
    pub fn tail_to_head(&self) -> Vec<usize> {
        self.inner.lock().iter().rev().map(|e| e.frame_id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_read_lands_in_old_sublist() {
        let lru = Lru::new(Duration::from_secs(1000));
        lru.insert_at_old_head(1);
        lru.insert_at_old_head(2);
        // Touching immediately (well under min age) must not promote.
        lru.touch(1);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn touch_after_min_age_promotes_to_young_head() {
        let lru = Lru::new(Duration::from_millis(0));
        lru.insert_at_old_head(1);
        std::thread::sleep(Duration::from_millis(2));
        lru.touch(1);
        // Young entries are pushed to the front.
        let order = lru.tail_to_head();
        assert!(order.contains(&1));
    }

    #[test]
    fn remove_drops_entry() {
        let lru = Lru::new(Duration::from_secs(1));
        lru.insert_at_old_head(1);
        lru.remove(1);
        assert!(lru.is_empty());
    }
}
