//! Adaptive mutex (spec §4.1): spins for a bounded number of rounds with
//! randomized backoff, then reserves a wait-array cell and blocks.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Condvar;
use parking_lot::Mutex as RawMutex;
use rand::Rng;

use super::levels::{self, LatchLevel};
use super::wait_array::{WaitArray, WaitObjectKind};

const SPIN_ROUNDS: u32 = 20;

/// A named, leveled mutex. Non-reentrant: re-acquiring from the same thread
/// deadlocks, matching the contract ("release must be performed by the same
/// thread that acquired", with no recursion guarantee implied).
pub struct Mutex<T> {
    name: &'static str,
    level: LatchLevel,
    locked: AtomicBool,
    condvar: Condvar,
    condvar_mutex: RawMutex<()>,
    wait_array: Option<Arc<WaitArray>>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(name: &'static str, level: LatchLevel, value: T) -> Self {
        Mutex {
            name,
            level,
            locked: AtomicBool::new(false),
            condvar: Condvar::new(),
            condvar_mutex: RawMutex::new(()),
            wait_array: None,
            data: UnsafeCell::new(value),
        }
    }

    pub fn with_wait_array(mut self, wait_array: Arc<WaitArray>) -> Self {
        self.wait_array = Some(wait_array);
        self
    }

    pub fn try_acquire(&self) -> Option<MutexGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            levels::push(self.level);
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    #[track_caller]
    pub fn acquire(&self) -> MutexGuard<'_, T> {
        // Spin phase with randomized backoff.
        for _ in 0..SPIN_ROUNDS {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            let backoff = rand::rng().random_range(1..=50);
            std::thread::yield_now();
            if backoff > 40 {
                std::thread::sleep(Duration::from_micros(backoff));
            }
        }

        let loc = std::panic::Location::caller();
        let cell = self.wait_array.as_ref().map(|wa| {
            wa.reserve_cell(
                self as *const _ as usize,
                self.name,
                WaitObjectKind::Mutex,
                loc.file(),
                loc.line(),
            )
        });

        loop {
            if let Some(guard) = self.try_acquire() {
                if let (Some(wa), Some(cell)) = (&self.wait_array, cell) {
                    wa.free_cell(cell);
                }
                return guard;
            }
            // Bounded wait so we re-check `locked` even if a wakeup is missed.
            let mut guard = self.condvar_mutex.lock();
            self.condvar.wait_for(&mut guard, Duration::from_millis(5));
        }
    }

    pub fn release(&self, guard: MutexGuard<'_, T>) {
        drop(guard);
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        levels::pop(self.mutex.level);
        let _guard = self.mutex.condvar_mutex.lock();
        self.mutex.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_access_single_thread() {
        let m = Mutex::new("test", LatchLevel::Kernel, 0u64);
        {
            let mut g = m.acquire();
            *g += 1;
        }
        assert_eq!(*m.acquire(), 1);
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let m = Mutex::new("test", LatchLevel::Kernel, 0u64);
        let _g = m.acquire();
        assert!(m.try_acquire().is_none());
    }

    #[test]
    fn contended_threads_serialize() {
        let m = Arc::new(Mutex::new("counter", LatchLevel::Kernel, 0u64));
        let mut handles = vec![];
        for _ in 0..8 {
            let m = Arc::clone(&m);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let mut g = m.acquire();
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.acquire(), 8000);
    }
}
