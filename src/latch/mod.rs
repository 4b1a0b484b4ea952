//! L1 latching substrate: mutexes, rw-latches, the global wait array, and
//! the debug-only ordering hierarchy (spec §4.1).

pub mod levels;
pub mod mutex;
pub mod rwlock;
pub mod wait_array;

pub use levels::LatchLevel;
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwGuard, RwLatch};
pub use wait_array::{MonitorHandle, WaitArray, WaitObjectKind};
