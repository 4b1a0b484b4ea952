//! In-memory table and index descriptors (spec §4.8 "Dictionary cache").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{IndexId, PageNo, SpaceId, TableId};
use crate::row::ColumnMeta;

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub meta: ColumnMeta,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub id: IndexId,
    pub name: String,
    pub root_page: PageNo,
    pub seg_id: u64,
    pub n_key_fields: usize,
    pub unique: bool,
    pub is_clustered: bool,
}

/// A foreign key constraint, kept on both the referencing and the
/// referenced table's descriptor (spec §4.8: "foreign-key lists (both
/// directions)").
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub name: String,
    pub referencing_table: TableId,
    pub referenced_table: TableId,
    pub referencing_columns: Vec<String>,
    pub referenced_columns: Vec<String>,
}

#[derive(Default)]
pub struct TableStats {
    pub n_rows_estimate: AtomicU64,
    pub modified_since_stats: AtomicU64,
}

/// One dictionary table object: its columns, indexes, foreign-key lists in
/// both directions, a handle count that forbids drop/eviction while
/// nonzero, and running statistics (spec §4.8).
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub space_id: SpaceId,
    pub columns: Vec<ColumnDef>,
    indexes: RwLock<Vec<IndexDef>>,
    foreign_keys: RwLock<Vec<ForeignKey>>,
    referenced_by: RwLock<Vec<ForeignKey>>,
    handle_count: AtomicUsize,
    pub stats: TableStats,
}

impl Table {
    pub fn new(id: TableId, name: impl Into<String>, space_id: SpaceId, columns: Vec<ColumnDef>) -> Arc<Self> {
        Arc::new(Table {
            id,
            name: name.into(),
            space_id,
            columns,
            indexes: RwLock::new(Vec::new()),
            foreign_keys: RwLock::new(Vec::new()),
            referenced_by: RwLock::new(Vec::new()),
            handle_count: AtomicUsize::new(0),
            stats: TableStats::default(),
        })
    }

    pub fn add_index(&self, idx: IndexDef) {
        self.indexes.write().push(idx);
    }

    pub fn indexes(&self) -> Vec<IndexDef> {
        self.indexes.read().clone()
    }

    pub fn clustered_index(&self) -> Option<IndexDef> {
        self.indexes.read().iter().find(|i| i.is_clustered).cloned()
    }

    pub fn add_foreign_key(&self, fk: ForeignKey) {
        self.foreign_keys.write().push(fk);
    }

    pub fn add_referenced_by(&self, fk: ForeignKey) {
        self.referenced_by.write().push(fk);
    }

    pub fn foreign_keys(&self) -> Vec<ForeignKey> {
        self.foreign_keys.read().clone()
    }

    pub fn referenced_by(&self) -> Vec<ForeignKey> {
        self.referenced_by.read().clone()
    }

    pub fn acquire_handle(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release_handle(&self) {
        self.handle_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_referenced(&self) -> bool {
        self.handle_count.load(Ordering::Acquire) > 0
    }
}
