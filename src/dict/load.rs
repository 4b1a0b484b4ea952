//! Loading a table's dictionary entry on demand (spec §4.8
//! `dict_load_table`).

use std::sync::Arc;

use crate::common::{mach, TableId};
use crate::error::{EngineError, Result};
use crate::row::dtuple::{ColumnType, DField, DTuple};

use super::boot::Dictionary;
use super::table::{ColumnDef, IndexDef, Table};
use crate::row::ColumnMeta;

/// Searches `SYS_TABLES` by name, then `SYS_COLUMNS` for each of its
/// columns and `SYS_INDEXES` for each of its indexes, and installs the
/// assembled `Table` into the dictionary cache (spec §4.8
/// `dict_load_table`). Returns the cached entry directly on a cache hit.
pub fn dict_load_table(dict: &Dictionary, name: &str) -> Result<Arc<Table>> {
    if let Some(table) = dict.cache.get_by_name(name) {
        return Ok(table);
    }

    let name_key = DTuple::new().push(DField::inline(ColumnType::Text, name.as_bytes().to_vec()));
    let row = dict
        .sys_tables
        .get(&name_key)?
        .ok_or_else(|| EngineError::NotFound(format!("table {name}")))?;
    let table_id = mach::read_u64(&row.fields[1].data);
    let n_cols = mach::read_u32(&row.fields[2].data);
    let table_space = mach::read_u32(&row.fields[3].data);

    let columns = load_columns(dict, table_id, n_cols)?;
    let table = Table::new(table_id, name, table_space, columns);

    for idx in scan_indexes_for_table(dict, table_id)? {
        table.add_index(idx);
    }

    dict.cache.insert(Arc::clone(&table));
    Ok(table)
}

fn load_columns(dict: &Dictionary, table_id: TableId, n_cols: u32) -> Result<Vec<ColumnDef>> {
    let mut columns = Vec::with_capacity(n_cols as usize);
    for pos in 0..n_cols {
        let key = DTuple::new()
            .push(DField::inline(ColumnType::BigInt, table_id.to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Int, pos.to_be_bytes().to_vec()));
        let rec = dict
            .sys_columns
            .get(&key)?
            .ok_or_else(|| EngineError::Corruption(format!("SYS_COLUMNS missing table {table_id} column {pos}")))?;
        let name = String::from_utf8_lossy(&rec.fields[2].data).into_owned();
        let mtype = mach::read_u32(&rec.fields[3].data);
        columns.push(ColumnDef { name, meta: column_meta_from_stored(mtype) });
    }
    Ok(columns)
}

fn column_meta_from_stored(mtype: u32) -> ColumnMeta {
    match mtype {
        0 => ColumnMeta { col_type: ColumnType::Int, nullable: false, fixed_len: Some(4) },
        1 => ColumnMeta { col_type: ColumnType::BigInt, nullable: false, fixed_len: Some(8) },
        2 => ColumnMeta { col_type: ColumnType::Binary, nullable: false, fixed_len: None },
        3 => ColumnMeta { col_type: ColumnType::VarBinary, nullable: true, fixed_len: None },
        _ => ColumnMeta { col_type: ColumnType::Text, nullable: true, fixed_len: None },
    }
}

/// `SYS_INDEXES` is keyed `(table_id, index_id)` but this engine's B-tree
/// has no range-scan cursor yet (only point `get`, spec §4.5's cursor is
/// single-record), so rather than a true equality range scan this probes
/// every index id assigned so far. Correct for bootstrap-scale catalogs;
/// see DESIGN.md "dictionary range scans".
fn scan_indexes_for_table(dict: &Dictionary, table_id: TableId) -> Result<Vec<IndexDef>> {
    let mut found = Vec::new();
    for index_id in 1..dict.peek_next_index_id() {
        let key = DTuple::new()
            .push(DField::inline(ColumnType::BigInt, table_id.to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::BigInt, index_id.to_be_bytes().to_vec()));
        if let Some(rec) = dict.sys_indexes.get(&key)? {
            let name = String::from_utf8_lossy(&rec.fields[2].data).into_owned();
            let n_fields = mach::read_u32(&rec.fields[3].data) as usize;
            let flags = mach::read_u32(&rec.fields[4].data);
            let root_page = mach::read_u32(&rec.fields[5].data);
            found.push(IndexDef {
                id: index_id,
                name,
                root_page,
                seg_id: 0,
                n_key_fields: n_fields,
                unique: flags & 1 != 0,
                is_clustered: flags & 2 != 0,
            });
        }
    }
    Ok(found)
}
