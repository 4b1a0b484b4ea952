//! Debug-only latching-order enforcement (spec §4.1).
//!
//! Every latch in the engine is tagged with a level from this closed
//! enumeration. A per-thread stack records currently held latches; acquiring
//! one whose level is not strictly above every held latch is a programming
//! error. Non-debug builds skip the bookkeeping entirely — they cannot
//! detect the violation, matching the documented failure semantics.

use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LatchLevel {
    MemPool = 0,
    BufBlock = 1,
    SearchSys = 2,
    Log = 3,
    Kernel = 4,
    TreeNode = 5,
    IndexTree = 6,
    Fsp = 7,
    Dict = 8,
    UserTrxLock = 9,
}

thread_local! {
    static HELD: RefCell<Vec<LatchLevel>> = RefCell::new(Vec::new());
}

/// Records `level` as acquired by the current thread. In debug builds,
/// panics if `level` is not strictly above every currently held latch.
///
/// `fsp` is special-cased per spec §4.1: it may be acquired above a
/// `BufBlock` latch that is already held, via the documented dispensation
/// for the file-space manager's X-latch.
pub fn push(level: LatchLevel) {
    if cfg!(debug_assertions) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(&top) = held.last() {
                let ok = level > top || (level == LatchLevel::Fsp && top == LatchLevel::BufBlock);
                if !ok {
                    panic!(
                        "latch ordering violation: acquiring {:?} while holding {:?}",
                        level, top
                    );
                }
            }
            held.push(level);
        });
    }
}

/// Releases the most recently pushed occurrence of `level`. Latches are
/// released in reverse order by `mtr::commit` and by RAII guards, so this
/// removes from the back, matching that discipline.
pub fn pop(level: LatchLevel) {
    if cfg!(debug_assertions) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&l| l == level) {
                held.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increasing_levels_are_fine() {
        push(LatchLevel::BufBlock);
        push(LatchLevel::Log);
        push(LatchLevel::Kernel);
        pop(LatchLevel::Kernel);
        pop(LatchLevel::Log);
        pop(LatchLevel::BufBlock);
    }

    #[test]
    #[should_panic(expected = "latch ordering violation")]
    #[cfg(debug_assertions)]
    fn decreasing_levels_panic() {
        push(LatchLevel::Kernel);
        push(LatchLevel::BufBlock);
    }

    #[test]
    fn fsp_dispensation_above_buf_block() {
        push(LatchLevel::BufBlock);
        push(LatchLevel::Fsp);
        pop(LatchLevel::Fsp);
        pop(LatchLevel::BufBlock);
    }
}
