//! L5 mini-transactions and write-ahead logging (spec §4.3).

pub mod log;
pub mod mtr;
pub mod recovery;
pub mod wal;

pub use log::{RedoOpcode, RedoRecord};
pub use mtr::{LoggingMode, Mtr};
pub use wal::{FlushMode, LogSys};
