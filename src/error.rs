//! Engine-wide error taxonomy (spec §6, §7).
//!
//! The split mirrors the two axes from the error handling design: local
//! retries never reach this type (an optimistic insert that falls back to
//! pessimistic never surfaces an `EngineError`), while logical and fatal
//! conditions are represented as distinct variants so callers can tell
//! "roll back the statement" from "the engine must stop".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Clustered-index unique-key violation (secondary-index uniqueness is
    /// enforced via locking during the original search, not here).
    #[error("duplicate key")]
    DuplicateKey,

    /// A single record exceeds one page minus overhead.
    #[error("record too big for a single page: {size} bytes")]
    TooBigRecord { size: usize },

    /// Checksum mismatch, torn-page trailer mismatch, or a redo chain that
    /// cannot be parsed past a valid checkpoint. Fatal.
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("cannot add constraint: {0}")]
    CannotAddConstraint(String),

    #[error("cannot drop constraint: {0}")]
    CannotDropConstraint(String),

    /// `fsp::reserve_free_extents` could not reserve enough space for the
    /// requested purpose.
    #[error("out of file space in space {space_id}")]
    OutOfFileSpace { space_id: u32 },

    #[error("lock wait timeout")]
    LockWaitTimeout,

    #[error("deadlock detected, transaction {trx_id} chosen as victim")]
    Deadlock { trx_id: u64 },

    #[error("tablespace {0} was discarded")]
    TablespaceDeleted(u32),

    /// Caller should retry pessimistically (optimistic path exhausted).
    #[error("strong failure, retry pessimistically")]
    StrongFail,

    /// Caller should retry (transient condition, e.g. latch contention).
    #[error("failure, retry")]
    Fail,

    /// Latching-order violation caught by the debug-only level stack
    /// (spec §4.1). Always fatal; never raised in release builds.
    #[error("latch ordering violation: {0}")]
    LatchOrder(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal engine error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    /// True for conditions spec §7 classifies as recoverable by rolling back
    /// the current statement rather than stopping the engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateKey
                | EngineError::LockWaitTimeout
                | EngineError::Deadlock { .. }
                | EngineError::CannotAddConstraint(_)
                | EngineError::CannotDropConstraint(_)
                | EngineError::StrongFail
                | EngineError::Fail
        )
    }
}
