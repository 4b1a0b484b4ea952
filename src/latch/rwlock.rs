//! rw-latch with S/X/X-wait states; X is recursive for the holding thread
//! (spec §4.1 `rw_latch`).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex as RawMutex, RwLock as InnerLock};

use super::levels::{self, LatchLevel};
use super::wait_array::{WaitArray, WaitObjectKind};

/// Lock word: -1 means exclusively held, 0 means free, >0 is the shared
/// reader count. Recursion for X is tracked separately per-thread since the
/// lock word alone can't distinguish "held by me again" from "held by
/// someone else".
pub struct RwLatch<T> {
    name: &'static str,
    level: LatchLevel,
    word: AtomicI64,
    owner: RawMutex<Option<std::thread::ThreadId>>,
    recursion: RawMutex<u32>,
    condvar_mutex: RawMutex<()>,
    condvar: Condvar,
    wait_array: Option<Arc<WaitArray>>,
    data: InnerLock<T>,
}

unsafe impl<T: Send> Send for RwLatch<T> {}
unsafe impl<T: Send> Sync for RwLatch<T> {}

pub enum RwGuard<'a, T> {
    Shared(parking_lot::RwLockReadGuard<'a, T>, &'a RwLatch<T>),
    Exclusive(parking_lot::RwLockWriteGuard<'a, T>, &'a RwLatch<T>),
    /// A recursive X-acquisition by the current holder: no new guard into
    /// the inner lock is taken, it reuses the outstanding write access.
    RecursiveExclusive(&'a RwLatch<T>),
}

impl<T> RwLatch<T> {
    pub fn new(name: &'static str, level: LatchLevel, value: T) -> Self {
        RwLatch {
            name,
            level,
            word: AtomicI64::new(0),
            owner: RawMutex::new(None),
            recursion: RawMutex::new(0),
            condvar_mutex: RawMutex::new(()),
            condvar: Condvar::new(),
            wait_array: None,
            data: InnerLock::new(value),
        }
    }

    pub fn with_wait_array(mut self, wait_array: Arc<WaitArray>) -> Self {
        self.wait_array = Some(wait_array);
        self
    }

    fn is_current_owner(&self) -> bool {
        *self.owner.lock() == Some(std::thread::current().id())
    }

    pub fn try_s_lock(&self) -> Option<RwGuard<'_, T>> {
        loop {
            let cur = self.word.load(Ordering::Acquire);
            if cur < 0 {
                return None;
            }
            if self
                .word
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                levels::push(self.level);
                return Some(RwGuard::Shared(self.data.read(), self));
            }
        }
    }

    pub fn try_x_lock(&self) -> Option<RwGuard<'_, T>> {
        if self.is_current_owner() {
            let mut rec = self.recursion.lock();
            *rec += 1;
            levels::push(self.level);
            return Some(RwGuard::RecursiveExclusive(self));
        }
        if self
            .word
            .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            *self.owner.lock() = Some(std::thread::current().id());
            levels::push(self.level);
            return Some(RwGuard::Exclusive(self.data.write(), self));
        }
        None
    }

    #[track_caller]
    pub fn s_lock(&self) -> RwGuard<'_, T> {
        self.blocking_lock(WaitObjectKind::RwLatchShared, Self::try_s_lock)
    }

    #[track_caller]
    pub fn x_lock(&self) -> RwGuard<'_, T> {
        self.blocking_lock(WaitObjectKind::RwLatchExclusive, Self::try_x_lock)
    }

    #[track_caller]
    fn blocking_lock<'a>(
        &'a self,
        kind: WaitObjectKind,
        try_fn: impl Fn(&'a Self) -> Option<RwGuard<'a, T>>,
    ) -> RwGuard<'a, T> {
        for _ in 0..20 {
            if let Some(g) = try_fn(self) {
                return g;
            }
            std::thread::yield_now();
        }
        let loc = std::panic::Location::caller();
        let cell = self.wait_array.as_ref().map(|wa| {
            wa.reserve_cell(self as *const _ as usize, self.name, kind, loc.file(), loc.line())
        });
        loop {
            if let Some(g) = try_fn(self) {
                if let (Some(wa), Some(cell)) = (&self.wait_array, cell) {
                    wa.free_cell(cell);
                }
                return g;
            }
            let mut guard = self.condvar_mutex.lock();
            self.condvar.wait_for(&mut guard, Duration::from_millis(5));
        }
    }

    fn unlock_shared(&self) {
        self.word.fetch_sub(1, Ordering::AcqRel);
        levels::pop(self.level);
        self.wake();
    }

    fn unlock_exclusive(&self) {
        let mut rec = self.recursion.lock();
        if *rec > 0 {
            *rec -= 1;
            levels::pop(self.level);
            return;
        }
        drop(rec);
        *self.owner.lock() = None;
        self.word.store(0, Ordering::Release);
        levels::pop(self.level);
        self.wake();
    }

    fn wake(&self) {
        let _g = self.condvar_mutex.lock();
        self.condvar.notify_all();
    }
}

impl<'a, T> Drop for RwGuard<'a, T> {
    fn drop(&mut self) {
        match self {
            RwGuard::Shared(_, latch) => latch.unlock_shared(),
            RwGuard::Exclusive(_, latch) => latch.unlock_exclusive(),
            RwGuard::RecursiveExclusive(latch) => latch.unlock_exclusive(),
        }
    }
}

impl<'a, T> std::ops::Deref for RwGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            RwGuard::Shared(g, _) => g,
            RwGuard::Exclusive(g, _) => g,
            RwGuard::RecursiveExclusive(latch) => {
                // SAFETY: only reachable while this thread holds the X latch
                // (recursive acquisition), so no other writer can be active.
                unsafe { &*latch.data.data_ptr() }
            }
        }
    }
}

impl<'a, T> std::ops::DerefMut for RwGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            RwGuard::Shared(_, _) => panic!("cannot mutate through a shared rw-latch guard"),
            RwGuard::Exclusive(g, _) => g,
            RwGuard::RecursiveExclusive(latch) => unsafe { &mut *latch.data.data_ptr() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_readers_coexist() {
        let l = RwLatch::new("t", LatchLevel::IndexTree, 5u64);
        let g1 = l.s_lock();
        let g2 = l.s_lock();
        assert_eq!(*g1, 5);
        assert_eq!(*g2, 5);
    }

    #[test]
    fn exclusive_excludes_shared() {
        let l = RwLatch::new("t", LatchLevel::IndexTree, 5u64);
        let _x = l.x_lock();
        assert!(l.try_s_lock().is_none());
    }

    #[test]
    fn recursive_exclusive_allowed_for_holder() {
        let l = RwLatch::new("t", LatchLevel::IndexTree, 1u64);
        let mut g1 = l.x_lock();
        *g1 += 1;
        {
            let mut g2 = l.x_lock();
            *g2 += 1;
        }
        assert_eq!(*g1, 3);
    }

    #[test]
    fn contended_writers_serialize() {
        let l = Arc::new(RwLatch::new("counter", LatchLevel::IndexTree, 0u64));
        let mut handles = vec![];
        for _ in 0..8 {
            let l = Arc::clone(&l);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    let mut g = l.x_lock();
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*l.x_lock(), 4000);
    }
}
