//! Record-level lock manager: shared/exclusive locks keyed by the record
//! they guard, with a wait queue and a two-party deadlock check (spec §5
//! "deadlock detection"; also the "any record lock exists" test
//! `ibuf_insert` makes against a page, spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::{PageNo, SpaceId, TrxId};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub space: SpaceId,
    pub page_no: PageNo,
    pub heap_no: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct Grant {
    trx_id: TrxId,
    mode: LockMode,
}

#[derive(Default)]
struct Slot {
    granted: Vec<Grant>,
}

/// Global lock table, one slot per locked record. Mirrors the teacher's
/// mutex-protected hash-table lock manager; waiting acquirers block on a
/// `Condvar` rather than spinning.
pub struct LockManager {
    table: Mutex<HashMap<RecordKey, Slot>>,
    cv: Condvar,
    wait_for: Mutex<HashMap<TrxId, TrxId>>,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Arc::new(LockManager {
            table: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            wait_for: Mutex::new(HashMap::new()),
        })
    }

    fn compatible(a: LockMode, b: LockMode) -> bool {
        matches!((a, b), (LockMode::Shared, LockMode::Shared))
    }

    /// Blocks until `trx_id` holds `mode` on `key`, or `timeout` elapses, or
    /// a direct wait-for cycle with the current holder is detected. On a
    /// detected cycle the caller is chosen as the victim (spec §5: "a
    /// suspended thread ... woken by the latch release", extended here with
    /// an explicit cycle check rather than a global wait-for graph scan).
    pub fn acquire(&self, key: RecordKey, trx_id: TrxId, mode: LockMode, timeout: Duration) -> Result<()> {
        let mut table = self.table.lock();
        loop {
            let slot = table.entry(key).or_default();
            let blocked_by: Vec<TrxId> = slot
                .granted
                .iter()
                .filter(|g| g.trx_id != trx_id && !Self::compatible(g.mode, mode))
                .map(|g| g.trx_id)
                .collect();

            if blocked_by.is_empty() {
                if !slot.granted.iter().any(|g| g.trx_id == trx_id && g.mode == mode) {
                    slot.granted.push(Grant { trx_id, mode });
                }
                self.wait_for.lock().remove(&trx_id);
                return Ok(());
            }

            {
                let mut wf = self.wait_for.lock();
                for holder in &blocked_by {
                    if *holder == trx_id {
                        continue;
                    }
                    if wf.get(holder) == Some(&trx_id) {
                        wf.remove(&trx_id);
                        return Err(EngineError::Deadlock { trx_id });
                    }
                    wf.insert(trx_id, *holder);
                }
            }

            let result = self.cv.wait_for(&mut table, timeout);
            if result.timed_out() {
                self.wait_for.lock().remove(&trx_id);
                return Err(EngineError::LockWaitTimeout);
            }
        }
    }

    /// Releases every lock `trx_id` holds (spec §4.7: locks are held until
    /// commit/rollback, never released early).
    pub fn release_all(&self, trx_id: TrxId) {
        let mut table = self.table.lock();
        for slot in table.values_mut() {
            slot.granted.retain(|g| g.trx_id != trx_id);
        }
        table.retain(|_, slot| !slot.granted.is_empty());
        drop(table);
        self.wait_for.lock().retain(|_, holder| *holder != trx_id);
        self.cv.notify_all();
    }

    /// Used by `ibuf_insert`'s "any record lock exists on it" guard.
    pub fn has_any_lock(&self, key: RecordKey) -> bool {
        self.table.lock().get(&key).map(|s| !s.granted.is_empty()).unwrap_or(false)
    }

    /// Whole-page variant of [`Self::has_any_lock`]: `ibuf_insert`'s guard is
    /// against the target page as a whole, not one record on it, since the
    /// page isn't resident and its heap numbers aren't known yet.
    pub fn has_any_lock_on_page(&self, space: SpaceId, page_no: PageNo) -> bool {
        self.table
            .lock()
            .iter()
            .any(|(key, slot)| key.space == space && key.page_no == page_no && !slot.granted.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RecordKey {
        RecordKey { space: 0, page_no: 7, heap_no: 2 }
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lm = LockManager::new();
        lm.acquire(key(), 1, LockMode::Shared, Duration::from_millis(10)).unwrap();
        lm.acquire(key(), 2, LockMode::Shared, Duration::from_millis(10)).unwrap();
        assert!(lm.has_any_lock(key()));
    }

    #[test]
    fn exclusive_blocks_until_timeout() {
        let lm = LockManager::new();
        lm.acquire(key(), 1, LockMode::Exclusive, Duration::from_millis(10)).unwrap();
        let err = lm.acquire(key(), 2, LockMode::Shared, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, EngineError::LockWaitTimeout));
    }

    #[test]
    fn release_all_frees_the_slot() {
        let lm = LockManager::new();
        lm.acquire(key(), 1, LockMode::Exclusive, Duration::from_millis(10)).unwrap();
        lm.release_all(1);
        assert!(!lm.has_any_lock(key()));
        lm.acquire(key(), 2, LockMode::Exclusive, Duration::from_millis(10)).unwrap();
    }
}
