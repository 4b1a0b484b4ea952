//! The top-level embeddable engine: wires every layer from the system
//! tablespace up through row-level table access into one handle (spec §9
//! "Putting it together").
//!
//! `Engine::create` always starts a brand-new database. A genuine
//! `Engine::open` that reopens a previously-closed one across process
//! restarts is not provided: it would need `FileSpace` to reload persisted
//! extent/segment-inode state from the FSP header and segment pages rather
//! than starting that bookkeeping empty, and `LogSys` to reopen its log file
//! without truncating it — neither exists yet (see DESIGN.md "recovery
//! scope"). What *is* provided, [`Engine::recover_redo_only`], is the redo
//! half of spec §4.3's recovery procedure, usable once those two pieces
//! exist, and already exercised by this crate's own crash-recovery tests
//! against a freshly-created space within a single process.

pub mod table;

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::buffer::{BufferPool, BufferPoolConfig};
use crate::common::{Lsn, SpaceId, SYSTEM_SPACE_ID};
use crate::dict::boot::{self, Dictionary};
use crate::dict::table::ColumnDef;
use crate::error::{EngineError, Result};
use crate::fsp::space::{SpaceManager, TablespaceFile};
use crate::fsp::FileSpace;
use crate::ibuf::{IbufReadHook, IbufTree};
use crate::mtr::recovery::run_redo_recovery;
use crate::mtr::LogSys;
use crate::row::dtuple::DTuple;
use crate::trx::{LockManager, ReadView, Trx, TrxSys, UndoOp};
use crate::EngineConfig;

use table::{EngineTable, SecondaryIndexSpec};

const SYSTEM_SPACE_FILE: &str = "system.ibd";
const REDO_LOG_FILE: &str = "redo.log";

/// One open database: every process-wide singleton from L2 through L12, and
/// the table handles created on top of them (spec §9).
pub struct Engine {
    pub spaces: Arc<SpaceManager>,
    pub system_space: Arc<FileSpace>,
    pub pool: Arc<BufferPool>,
    pub log: Arc<LogSys>,
    pub dict: Dictionary,
    pub trx_sys: Arc<TrxSys>,
    pub lock_manager: Arc<LockManager>,
    pub ibuf: Arc<IbufTree>,
    tables_by_name: DashMap<String, Arc<EngineTable>>,
    tables_by_id: DashMap<u64, Arc<EngineTable>>,
}

impl Engine {
    /// Initializes a brand-new database under `config.data_dir`: a system
    /// tablespace, redo log, dictionary, transaction system, and insert
    /// buffer, all freshly created (spec §9 step "cold start, empty data
    /// directory").
    pub fn create(config: &EngineConfig) -> Result<Arc<Engine>> {
        std::fs::create_dir_all(&config.data_dir).map_err(EngineError::Io)?;

        let spaces = Arc::new(SpaceManager::new());
        let ts_file = TablespaceFile::create(SYSTEM_SPACE_ID, config.data_dir.join(SYSTEM_SPACE_FILE))?;
        let ts_file = spaces.register(ts_file);
        let system_space = Arc::new(FileSpace::create(ts_file, SYSTEM_SPACE_ID)?);

        let log = Arc::new(LogSys::create(config.data_dir.join(REDO_LOG_FILE))?);

        let pool_config = BufferPoolConfig {
            num_frames: config.buffer_pool_frames,
            ..Default::default()
        };
        let pool = Arc::new(BufferPool::new(pool_config, Arc::clone(&spaces), Arc::clone(&log)));

        let lock_manager = LockManager::new();

        let dict = boot::create_dictionary(Arc::clone(&system_space), Arc::clone(&pool), &log)?;

        let trx_sys = TrxSys::new();

        let ibuf = Arc::new(IbufTree::create(
            SYSTEM_SPACE_ID,
            Arc::clone(&system_space),
            Arc::clone(&pool),
            Arc::clone(&lock_manager),
            &log,
        )?);
        // `set_read_hook` rather than `BufferPool::with_read_hook`: the hook
        // needs an `Arc<BufferPool>` to build the ibuf tree, which the
        // builder-by-value form can't supply before the pool itself exists.
        pool.set_read_hook(Arc::new(IbufReadHook::new(Arc::clone(&ibuf), Arc::clone(&log))));

        info!(data_dir = %config.data_dir.display(), "created new database");

        Ok(Arc::new(Engine {
            spaces,
            system_space,
            pool,
            log,
            dict,
            trx_sys,
            lock_manager,
            ibuf,
            tables_by_name: DashMap::new(),
            tables_by_id: DashMap::new(),
        }))
    }

    /// Redo-only recovery (spec §4.3 "Recovery" phase 1): reapplies every
    /// logged change from `from_lsn` directly to the tablespace files,
    /// skipping any page whose on-disk LSN already dominates the record
    /// (idempotent, so safe to call speculatively). Does not touch pages
    /// already resident in the buffer pool — call this before any caller has
    /// read a page in, e.g. immediately after [`Engine::create`] in a test
    /// that simulates a crash by logging mtrs without checkpointing.
    ///
    /// B-tree structural mtrs (insert/split/delete, which log the page's
    /// whole rebuilt image as a typed `PageCreate` record via
    /// `BtreeIndex::rewrite_page`) are replayed as a single whole-page copy
    /// (see `mtr::recovery::apply_chain_to_page`), alongside the raw
    /// in-place byte writes other mtr callers produce.
    pub fn recover_redo_only(&self, from_lsn: Lsn) -> Result<()> {
        run_redo_recovery(&self.log, &self.spaces, from_lsn)
    }

    pub fn checkpoint(&self) -> Result<Lsn> {
        self.log.checkpoint(&self.pool)
    }

    pub fn begin(self: &Arc<Self>) -> Arc<Trx> {
        self.trx_sys.begin()
    }

    pub fn commit(&self, trx: &Arc<Trx>) {
        trx.commit(&self.trx_sys);
        self.lock_manager.release_all(trx.id);
    }

    /// Rolls back every change `trx` made, most recent first, using each
    /// table's own physical undo-apply primitives (spec §4.7 "Undo page").
    /// An undo record naming a table this `Engine` doesn't have open (e.g. a
    /// table dropped mid-transaction in a fuller DDL story) is skipped
    /// rather than treated as an error, since there is nothing left to
    /// physically undo.
    pub fn rollback(&self, trx: &Arc<Trx>) -> Result<()> {
        let log = Arc::clone(&self.log);
        trx.rollback(&self.trx_sys, |rec| {
            let table = match self.tables_by_id.get(&rec.table_id) {
                Some(t) => Arc::clone(t.value()),
                None => return Ok(()),
            };
            match rec.op {
                UndoOp::Insert => table.rollback_insert(&rec.key_image, &log),
                UndoOp::UpdateInPlace | UndoOp::DeleteMark => table.rollback_update_or_delete(&rec.field_images, &log),
            }
        })?;
        self.lock_manager.release_all(trx.id);
        Ok(())
    }

    /// Opens a read view for MVCC reads, per spec §4.7's "repeatable read
    /// fixes one view for the transaction's lifetime" rule.
    pub fn read_view(&self, trx: &Arc<Trx>) -> ReadView {
        trx.ensure_read_view(&self.trx_sys)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_table(
        &self,
        name: &str,
        user_columns: Vec<ColumnDef>,
        pk_field_count: usize,
        secondary_specs: Vec<SecondaryIndexSpec>,
    ) -> Result<Arc<EngineTable>> {
        let table = EngineTable::create(
            &self.dict,
            Arc::clone(&self.system_space),
            Arc::clone(&self.pool),
            Arc::clone(&self.ibuf),
            &self.log,
            name,
            user_columns,
            pk_field_count,
            secondary_specs,
        )?;
        self.tables_by_name.insert(name.to_string(), Arc::clone(&table));
        self.tables_by_id.insert(table.table.id, Arc::clone(&table));
        Ok(table)
    }

    /// Looks up `table_name` row(s) by a named secondary index's key; a thin
    /// forward to `EngineTable::find_by_secondary` once the table and its
    /// read view are in hand.
    pub fn find_by_secondary(&self, table_name: &str, index_name: &str, read_view: &ReadView, key: &DTuple) -> Result<Option<DTuple>> {
        self.open_table(table_name)?.find_by_secondary(index_name, read_view, &self.trx_sys, key)
    }

    pub fn open_table(&self, name: &str) -> Result<Arc<EngineTable>> {
        self.tables_by_name
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| EngineError::NotFound(format!("table {name}")))
    }

    /// Drains the insert buffer's pending entries, merging each into its
    /// target page (spec §4.9 `ibuf_contract`). Exposed so a host process
    /// can run it on an idle timer rather than only ever merging lazily on
    /// the next read of each page.
    pub fn contract_ibuf(&self) -> Result<usize> {
        self.ibuf.contract(false, &self.log)
    }

    pub fn data_dir(&self) -> &Path {
        self.system_space.file.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn system_space_id(&self) -> SpaceId {
        SYSTEM_SPACE_ID
    }
}

pub use table::{DB_ROLL_PTR_COL, DB_TRX_ID_COL};
