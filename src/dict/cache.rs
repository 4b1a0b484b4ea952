//! Name-keyed and id-keyed dictionary cache with LRU eviction of
//! unreferenced tables (spec §4.8 "Dictionary cache").

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::common::TableId;
use crate::error::{EngineError, Result};

use super::table::Table;

pub struct DictCache {
    by_name: DashMap<String, Arc<Table>>,
    by_id: DashMap<TableId, Arc<Table>>,
    /// Most-recently-used last; eviction scans from the front and skips any
    /// table still referenced.
    lru: Mutex<Vec<TableId>>,
}

impl DictCache {
    pub fn new() -> Arc<Self> {
        Arc::new(DictCache {
            by_name: DashMap::new(),
            by_id: DashMap::new(),
            lru: Mutex::new(Vec::new()),
        })
    }

    pub fn insert(&self, table: Arc<Table>) {
        self.by_name.insert(table.name.clone(), Arc::clone(&table));
        let id = table.id;
        self.by_id.insert(id, table);
        self.touch(id);
    }

    fn touch(&self, id: TableId) {
        let mut lru = self.lru.lock();
        lru.retain(|&x| x != id);
        lru.push(id);
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Table>> {
        let found = self.by_name.get(name).map(|e| Arc::clone(e.value()));
        if let Some(t) = &found {
            self.touch(t.id);
        }
        found
    }

    pub fn get_by_id(&self, id: TableId) -> Option<Arc<Table>> {
        let found = self.by_id.get(&id).map(|e| Arc::clone(e.value()));
        if found.is_some() {
            self.touch(id);
        }
        found
    }

    /// Evicts the least-recently-used table with no open handles. Returns
    /// `false` if every cached table is still referenced (spec §4.8: "LRU
    /// list of tables for eviction when unreferenced").
    pub fn evict_one_unreferenced(&self) -> bool {
        let mut lru = self.lru.lock();
        let pos = lru
            .iter()
            .position(|id| self.by_id.get(id).map(|t| !t.is_referenced()).unwrap_or(true));
        match pos {
            Some(pos) => {
                let id = lru.remove(pos);
                if let Some((_, table)) = self.by_id.remove(&id) {
                    self.by_name.remove(&table.name);
                }
                true
            }
            None => false,
        }
    }

    /// Drop forbidden while any handle is outstanding (spec §4.8: "handle
    /// count (drop forbidden while > 0)").
    pub fn drop_table(&self, id: TableId) -> Result<()> {
        let table = self
            .by_id
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| EngineError::NotFound(format!("table id {id}")))?;
        if table.is_referenced() {
            return Err(EngineError::Fail);
        }
        self.by_id.remove(&id);
        self.by_name.remove(&table.name);
        self.lru.lock().retain(|&x| x != id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::table::ColumnDef;
    use crate::row::dtuple::ColumnType;
    use crate::row::ColumnMeta;

    fn table(id: TableId, name: &str) -> Arc<Table> {
        Table::new(
            id,
            name,
            0,
            vec![ColumnDef {
                name: "id".into(),
                meta: ColumnMeta { col_type: ColumnType::Int, nullable: false, fixed_len: Some(4) },
            }],
        )
    }

    #[test]
    fn insert_and_lookup_by_name_and_id() {
        let cache = DictCache::new();
        cache.insert(table(10, "t1"));
        assert!(cache.get_by_name("t1").is_some());
        assert!(cache.get_by_id(10).is_some());
    }

    #[test]
    fn referenced_table_is_not_evicted() {
        let cache = DictCache::new();
        let t = table(10, "t1");
        t.acquire_handle();
        cache.insert(t);
        assert!(!cache.evict_one_unreferenced());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unreferenced_table_evicts() {
        let cache = DictCache::new();
        cache.insert(table(10, "t1"));
        assert!(cache.evict_one_unreferenced());
        assert!(cache.is_empty());
    }

    #[test]
    fn drop_fails_while_referenced() {
        let cache = DictCache::new();
        let t = table(10, "t1");
        t.acquire_handle();
        cache.insert(t);
        assert!(cache.drop_table(10).is_err());
    }
}
