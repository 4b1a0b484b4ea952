//! Global wait array for diagnostics and deadlock detection (spec §4.1).
//!
//! A blocking latch acquirer reserves a cell describing what it is waiting
//! for; a background monitor scans the array once a second and logs (or, past
//! a fatal threshold, aborts on) waits that have been open too long.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::SpaceId;

/// What kind of object a cell is waiting on; enough to print a diagnostic
/// and, for `Mutex`/`RwLatch`, to walk owner -> blocked-on chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObjectKind {
    Mutex,
    RwLatchShared,
    RwLatchExclusive,
}

#[derive(Debug, Clone)]
pub struct WaitCell {
    pub object_addr: usize,
    pub object_name: &'static str,
    pub kind: WaitObjectKind,
    pub file: &'static str,
    pub line: u32,
    pub thread_id: std::thread::ThreadId,
    pub reserved_at: Instant,
}

struct Inner {
    cells: Vec<Option<WaitCell>>,
}

/// Fixed-size array of wait cells, guarded by its own mutex (spec: "a
/// blocking acquirer reserves a cell ... implemented behind its own
/// internal mutex").
pub struct WaitArray {
    inner: Mutex<Inner>,
    long_wait_secs: u64,
    fatal_wait_secs: Option<u64>,
    stop: Arc<AtomicBool>,
}

pub struct CellHandle {
    index: usize,
}

impl WaitArray {
    pub fn new(n_cells: usize) -> Arc<Self> {
        Arc::new(WaitArray {
            inner: Mutex::new(Inner {
                cells: (0..n_cells).map(|_| None).collect(),
            }),
            long_wait_secs: 240,
            fatal_wait_secs: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_thresholds(n_cells: usize, long_wait_secs: u64, fatal_wait_secs: Option<u64>) -> Arc<Self> {
        Arc::new(WaitArray {
            inner: Mutex::new(Inner {
                cells: (0..n_cells).map(|_| None).collect(),
            }),
            long_wait_secs,
            fatal_wait_secs,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn reserve_cell(
        &self,
        object_addr: usize,
        object_name: &'static str,
        kind: WaitObjectKind,
        file: &'static str,
        line: u32,
    ) -> CellHandle {
        let mut inner = self.inner.lock();
        let idx = inner
            .cells
            .iter()
            .position(|c| c.is_none())
            .unwrap_or_else(|| {
                // The array is sized generously relative to thread count in
                // practice; growing rather than blocking here keeps this a
                // pure diagnostics structure, never itself a bottleneck.
                inner.cells.push(None);
                inner.cells.len() - 1
            });
        inner.cells[idx] = Some(WaitCell {
            object_addr,
            object_name,
            kind,
            file,
            line,
            thread_id: std::thread::current().id(),
            reserved_at: Instant::now(),
        });
        CellHandle { index: idx }
    }

    pub fn free_cell(&self, handle: CellHandle) {
        let mut inner = self.inner.lock();
        inner.cells[handle.index] = None;
    }

    /// Scans for overlong waits. Returns diagnostic lines for waits older
    /// than `long_wait_secs`, and the thread ids of waits past
    /// `fatal_wait_secs` (the caller decides whether to abort).
    pub fn scan_overlong(&self) -> (Vec<String>, Vec<std::thread::ThreadId>) {
        let inner = self.inner.lock();
        let mut warnings = Vec::new();
        let mut fatal = Vec::new();
        for cell in inner.cells.iter().flatten() {
            let age = cell.reserved_at.elapsed();
            if age >= Duration::from_secs(self.long_wait_secs) {
                warnings.push(format!(
                    "thread {:?} waiting {:?} on {} ({:?}) reserved at {}:{}",
                    cell.thread_id, age, cell.object_name, cell.kind, cell.file, cell.line
                ));
            }
            if let Some(fatal_secs) = self.fatal_wait_secs {
                if age >= Duration::from_secs(fatal_secs) {
                    fatal.push(cell.thread_id);
                }
            }
        }
        (warnings, fatal)
    }

    /// Finds a cycle starting from `start`'s wait-on object among cells
    /// currently blocked on the same object address (debug deadlock
    /// detection, spec §4.1). This is a simplified owner->blocked-on walk:
    /// real ownership tracking lives in the mutex/rwlock types, which pass
    /// in the current set of (waiter, holder) edges.
    pub fn has_cycle(edges: &[(std::thread::ThreadId, std::thread::ThreadId)], start: std::thread::ThreadId) -> bool {
        let mut current = start;
        let mut seen = std::collections::HashSet::new();
        seen.insert(current);
        loop {
            match edges.iter().find(|(waiter, _)| *waiter == current) {
                Some((_, holder)) => {
                    if *holder == start {
                        return true;
                    }
                    if !seen.insert(*holder) {
                        return false;
                    }
                    current = *holder;
                }
                None => return false,
            }
        }
    }

    /// Spawns the background long-wait monitor thread (spec §4.1 "a
    /// background monitor scans the wait array every second").
    pub fn spawn_monitor(self: &Arc<Self>) -> MonitorHandle {
        let array = Arc::clone(self);
        let stop = Arc::clone(&self.stop);
        let join = std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_secs(1));
                let (warnings, fatal) = array.scan_overlong();
                for w in warnings {
                    tracing::warn!(target: "rusty_db::latch", "{}", w);
                }
                if !fatal.is_empty() {
                    tracing::error!(target: "rusty_db::latch", "fatal: threads {:?} exceeded the fatal wait threshold", fatal);
                }
            }
        });
        MonitorHandle {
            stop: self.stop.clone(),
            join: Some(join),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.inner.lock().cells.len()
    }
}

pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Monotonically increasing signal counter used by the mutex/rwlock event
/// wakeups: a waiter captures the count before sleeping and only sleeps
/// while the count has not advanced, avoiding the lost-wakeup race.
#[derive(Default)]
pub struct SignalCount(AtomicU64);

impl SignalCount {
    pub fn new() -> Self {
        SignalCount(AtomicU64::new(0))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

pub fn space_tag(space: SpaceId) -> &'static str {
    // Small helper kept for call sites that want a stable object name for a
    // tablespace-scoped latch without allocating.
    match space {
        0 => "system_space",
        _ => "space",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_free_cell() {
        let arr = WaitArray::new(4);
        let handle = arr.reserve_cell(0x1000, "test_mutex", WaitObjectKind::Mutex, file!(), line!());
        let (warnings, fatal) = arr.scan_overlong();
        assert!(warnings.is_empty());
        assert!(fatal.is_empty());
        arr.free_cell(handle);
    }

    #[test]
    fn detects_two_thread_cycle() {
        let t1 = std::thread::current().id();
        // Cannot fabricate distinct real ThreadIds without spawning; use a
        // spawned thread's id to build a genuine 2-cycle.
        let t2 = std::thread::spawn(|| std::thread::current().id()).join().unwrap();
        let edges = vec![(t1, t2), (t2, t1)];
        assert!(WaitArray::has_cycle(&edges, t1));
    }

    #[test]
    fn no_cycle_when_chain_ends() {
        let t1 = std::thread::current().id();
        let t2 = std::thread::spawn(|| std::thread::current().id()).join().unwrap();
        let edges = vec![(t1, t2)];
        assert!(!WaitArray::has_cycle(&edges, t1));
    }
}
