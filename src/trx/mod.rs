//! L10 transaction system: transaction lifecycle, undo/rollback segments,
//! MVCC read views, record locking, and purge (spec §4.7 "Transaction
//! system, undo, MVCC").

pub mod lock;
pub mod purge;
pub mod read_view;
pub mod sys;
pub mod trx;
pub mod undo;

pub use lock::{LockManager, LockMode, RecordKey};
pub use purge::run_purge_pass;
pub use read_view::ReadView;
pub use sys::{TrxSys, N_ROLLBACK_SEGMENTS, TRX_SYS_TRX_ID_WRITE_MARGIN};
pub use trx::{Trx, TrxState};
pub use undo::{RollPtr, RollbackSegment, UndoOp, UndoRecord, ROLL_PTR_ENCODED_LEN};
