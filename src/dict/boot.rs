//! Dictionary bootstrap: the four hard-coded system tables and the
//! dictionary header page that anchors them (spec §4.8 "Bootstrap
//! (`dict_boot`)", "Create").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::common::{mach, PageId, PageNo, SYSTEM_SPACE_ID};
use crate::error::Result;
use crate::fsp::FileSpace;
use crate::index::BtreeIndex;
use crate::mtr::{LogSys, Mtr};
use crate::page::PAGE_DATA;
use crate::row::dtuple::{ColumnType, DField, DTuple};
use crate::row::ColumnMeta;

use super::cache::DictCache;
use super::table::{ColumnDef, IndexDef, Table};

pub const SYS_TABLES_ID: u64 = 1;
pub const SYS_COLUMNS_ID: u64 = 2;
pub const SYS_INDEXES_ID: u64 = 3;
pub const SYS_FIELDS_ID: u64 = 4;

/// First id handed to a user-created table or index (spec §4.8 "Create":
/// "write starting IDs (= 10)").
pub const FIRST_USER_ID: u64 = 10;

const OFF_MAX_ROW_ID: u16 = PAGE_DATA as u16;
const OFF_MAX_TABLE_ID: u16 = OFF_MAX_ROW_ID + 8;
const OFF_MAX_INDEX_ID: u16 = OFF_MAX_TABLE_ID + 8;
const OFF_SYS_TABLES_ROOT: u16 = OFF_MAX_INDEX_ID + 8;
const OFF_SYS_COLUMNS_ROOT: u16 = OFF_SYS_TABLES_ROOT + 4;
const OFF_SYS_INDEXES_ROOT: u16 = OFF_SYS_COLUMNS_ROOT + 4;
const OFF_SYS_FIELDS_ROOT: u16 = OFF_SYS_INDEXES_ROOT + 4;

struct DictHeaderLayout {
    max_row_id: u64,
    max_table_id: u64,
    max_index_id: u64,
    sys_tables_root: PageNo,
    sys_columns_root: PageNo,
    sys_indexes_root: PageNo,
    sys_fields_root: PageNo,
}

impl DictHeaderLayout {
    fn read(bytes: &[u8]) -> Self {
        DictHeaderLayout {
            max_row_id: mach::read_u64(&bytes[OFF_MAX_ROW_ID as usize..]),
            max_table_id: mach::read_u64(&bytes[OFF_MAX_TABLE_ID as usize..]),
            max_index_id: mach::read_u64(&bytes[OFF_MAX_INDEX_ID as usize..]),
            sys_tables_root: mach::read_u32(&bytes[OFF_SYS_TABLES_ROOT as usize..]),
            sys_columns_root: mach::read_u32(&bytes[OFF_SYS_COLUMNS_ROOT as usize..]),
            sys_indexes_root: mach::read_u32(&bytes[OFF_SYS_INDEXES_ROOT as usize..]),
            sys_fields_root: mach::read_u32(&bytes[OFF_SYS_FIELDS_ROOT as usize..]),
        }
    }

    fn write(&self, mtr: &mut Mtr, frame_id: usize) {
        mtr.page_modify_8(frame_id, OFF_MAX_ROW_ID, self.max_row_id);
        mtr.page_modify_8(frame_id, OFF_MAX_TABLE_ID, self.max_table_id);
        mtr.page_modify_8(frame_id, OFF_MAX_INDEX_ID, self.max_index_id);
        mtr.page_modify_4(frame_id, OFF_SYS_TABLES_ROOT, self.sys_tables_root);
        mtr.page_modify_4(frame_id, OFF_SYS_COLUMNS_ROOT, self.sys_columns_root);
        mtr.page_modify_4(frame_id, OFF_SYS_INDEXES_ROOT, self.sys_indexes_root);
        mtr.page_modify_4(frame_id, OFF_SYS_FIELDS_ROOT, self.sys_fields_root);
    }
}

/// The four system-table clustered indexes, the dictionary cache, and the
/// id counters they seed, wired together after `dict_boot` (spec §4.8).
pub struct Dictionary {
    pub cache: Arc<DictCache>,
    pub header_page: PageNo,
    pub sys_tables: Arc<BtreeIndex>,
    pub sys_columns: Arc<BtreeIndex>,
    pub sys_indexes: Arc<BtreeIndex>,
    pub sys_fields: Arc<BtreeIndex>,
    next_row_id: AtomicU64,
    next_table_id: AtomicU64,
    next_index_id: AtomicU64,
}

impl Dictionary {
    pub fn next_row_id(&self) -> u64 {
        self.next_row_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_table_id(&self) -> u64 {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_index_id(&self) -> u64 {
        self.next_index_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek_next_index_id(&self) -> u64 {
        self.next_index_id.load(Ordering::Relaxed)
    }
}

fn col(col_type: ColumnType, nullable: bool, fixed_len: Option<usize>) -> ColumnMeta {
    ColumnMeta { col_type, nullable, fixed_len }
}

fn sys_tables_columns() -> Vec<ColumnMeta> {
    vec![
        col(ColumnType::Text, false, None),      // name (key)
        col(ColumnType::BigInt, false, Some(8)), // id
        col(ColumnType::Int, false, Some(4)),    // n_cols
        col(ColumnType::Int, false, Some(4)),    // space
        col(ColumnType::Int, false, Some(4)),    // flags
    ]
}

fn sys_columns_columns() -> Vec<ColumnMeta> {
    vec![
        col(ColumnType::BigInt, false, Some(8)), // table_id (key 1)
        col(ColumnType::Int, false, Some(4)),    // pos (key 2)
        col(ColumnType::Text, false, None),      // name
        col(ColumnType::Int, false, Some(4)),    // mtype
        col(ColumnType::Int, false, Some(4)),    // prtype
        col(ColumnType::Int, false, Some(4)),    // len
    ]
}

fn sys_indexes_columns() -> Vec<ColumnMeta> {
    vec![
        col(ColumnType::BigInt, false, Some(8)), // table_id (key 1)
        col(ColumnType::BigInt, false, Some(8)), // id (key 2)
        col(ColumnType::Text, false, None),      // name
        col(ColumnType::Int, false, Some(4)),    // n_fields
        col(ColumnType::Int, false, Some(4)),    // type (bit 0 unique, bit 1 clustered)
        col(ColumnType::Int, false, Some(4)),    // root_page
        col(ColumnType::Int, false, Some(4)),    // space
    ]
}

fn sys_fields_columns() -> Vec<ColumnMeta> {
    vec![
        col(ColumnType::BigInt, false, Some(8)), // index_id (key 1)
        col(ColumnType::Int, false, Some(4)),     // pos (key 2)
        col(ColumnType::Text, false, None),       // col_name
    ]
}

/// First-time database initialization (spec §4.8 "Create"): allocates the
/// dictionary header page, B-tree-creates each system table's clustered
/// index, records their root page numbers in the header, then runs
/// `dict_boot`.
pub fn create_dictionary(space: Arc<FileSpace>, pool: Arc<BufferPool>, log: &LogSys) -> Result<Dictionary> {
    let (_hdr_seg, header_page) = space.create_segment()?;

    let sys_tables = BtreeIndex::create(
        SYSTEM_SPACE_ID,
        SYS_TABLES_ID,
        sys_tables_columns(),
        1,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
        log,
    )?;
    let sys_columns = BtreeIndex::create(
        SYSTEM_SPACE_ID,
        SYS_COLUMNS_ID,
        sys_columns_columns(),
        2,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
        log,
    )?;
    let sys_indexes = BtreeIndex::create(
        SYSTEM_SPACE_ID,
        SYS_INDEXES_ID,
        sys_indexes_columns(),
        2,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
        log,
    )?;
    let sys_fields = BtreeIndex::create(
        SYSTEM_SPACE_ID,
        SYS_FIELDS_ID,
        sys_fields_columns(),
        2,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
        log,
    )?;

    let layout = DictHeaderLayout {
        max_row_id: 0,
        max_table_id: FIRST_USER_ID,
        max_index_id: FIRST_USER_ID,
        sys_tables_root: sys_tables.root_page,
        sys_columns_root: sys_columns.root_page,
        sys_indexes_root: sys_indexes.root_page,
        sys_fields_root: sys_fields.root_page,
    };
    let mut mtr = Mtr::start(&pool);
    let frame_id = mtr.x_lock(PageId::new(SYSTEM_SPACE_ID, header_page))?;
    layout.write(&mut mtr, frame_id);
    mtr.commit(log)?;

    boot_dictionary(space, pool, header_page)
}

/// Reopens the dictionary cache from an existing dictionary header page
/// (spec §4.8 "Bootstrap (`dict_boot`)" steps 1-3; step 4, insert-buffer
/// init, is the caller's job once `ibuf` exists).
pub fn boot_dictionary(space: Arc<FileSpace>, pool: Arc<BufferPool>, header_page: PageNo) -> Result<Dictionary> {
    let mut mtr = Mtr::start(&pool);
    let frame_id = mtr.s_lock(PageId::new(SYSTEM_SPACE_ID, header_page))?;
    let layout = DictHeaderLayout::read(mtr.page_ref(frame_id).as_slice());
    drop(mtr);

    let sys_tables = Arc::new(BtreeIndex::open(
        SYSTEM_SPACE_ID,
        SYS_TABLES_ID,
        layout.sys_tables_root,
        0,
        sys_tables_columns(),
        1,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
    ));
    let sys_columns = Arc::new(BtreeIndex::open(
        SYSTEM_SPACE_ID,
        SYS_COLUMNS_ID,
        layout.sys_columns_root,
        0,
        sys_columns_columns(),
        2,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
    ));
    let sys_indexes = Arc::new(BtreeIndex::open(
        SYSTEM_SPACE_ID,
        SYS_INDEXES_ID,
        layout.sys_indexes_root,
        0,
        sys_indexes_columns(),
        2,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
    ));
    let sys_fields = Arc::new(BtreeIndex::open(
        SYSTEM_SPACE_ID,
        SYS_FIELDS_ID,
        layout.sys_fields_root,
        0,
        sys_fields_columns(),
        2,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
    ));

    let cache = DictCache::new();
    install_system_table_descriptor(&cache, SYS_TABLES_ID, "SYS_TABLES", &sys_tables);
    install_system_table_descriptor(&cache, SYS_COLUMNS_ID, "SYS_COLUMNS", &sys_columns);
    install_system_table_descriptor(&cache, SYS_INDEXES_ID, "SYS_INDEXES", &sys_indexes);
    install_system_table_descriptor(&cache, SYS_FIELDS_ID, "SYS_FIELDS", &sys_fields);

    Ok(Dictionary {
        cache,
        header_page,
        sys_tables,
        sys_columns,
        sys_indexes,
        sys_fields,
        // `ceil(disk_value / 256) * 256 + 256`: a crash can never hand out
        // an id a previous, undurable run might already have used (spec
        // §4.8 step 3).
        next_row_id: AtomicU64::new(row_id_start(layout.max_row_id)),
        next_table_id: AtomicU64::new(layout.max_table_id.max(FIRST_USER_ID)),
        next_index_id: AtomicU64::new(layout.max_index_id.max(FIRST_USER_ID)),
    })
}

fn row_id_start(disk_value: u64) -> u64 {
    disk_value.div_ceil(256) * 256 + 256
}

/// `SYS_COLUMNS.mtype` tag for each column type, the inverse of
/// `load::column_meta_from_stored`.
fn mtype_of(col_type: ColumnType) -> u32 {
    match col_type {
        ColumnType::Int => 0,
        ColumnType::BigInt => 1,
        ColumnType::Binary => 2,
        ColumnType::VarBinary => 3,
        ColumnType::Text => 4,
    }
}

/// Persists a brand-new user table: a fresh clustered index, plus its
/// `SYS_TABLES`/`SYS_COLUMNS`/`SYS_INDEXES` rows (the inverse of
/// `dict_load_table`), and installs it into the dictionary cache (spec
/// §4.8 "Create"). `columns` is the full leaf schema the caller wants on
/// the clustered index — a row layer adding hidden trx columns passes
/// them here like any other column. Returns the cached table descriptor
/// alongside the clustered index itself, since the dictionary cache only
/// tracks an index's page/segment coordinates, not a live `BtreeIndex`.
pub fn create_user_table(
    dict: &Dictionary,
    space: Arc<FileSpace>,
    pool: Arc<BufferPool>,
    log: &LogSys,
    name: &str,
    columns: Vec<ColumnDef>,
    pk_field_count: usize,
) -> Result<(Arc<Table>, BtreeIndex)> {
    let table_id = dict.next_table_id();
    let index_id = dict.next_index_id();

    let column_metas: Vec<ColumnMeta> = columns.iter().map(|c| c.meta).collect();
    let clustered = BtreeIndex::create(
        SYSTEM_SPACE_ID,
        index_id,
        column_metas,
        pk_field_count,
        true,
        Arc::clone(&space),
        Arc::clone(&pool),
        log,
    )?;

    let tables_row = DTuple::new()
        .push(DField::inline(ColumnType::Text, name.as_bytes().to_vec()))
        .push(DField::inline(ColumnType::BigInt, table_id.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, (columns.len() as u32).to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, SYSTEM_SPACE_ID.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, 0u32.to_be_bytes().to_vec()));
    dict.sys_tables.insert(tables_row, log)?;

    for (pos, col) in columns.iter().enumerate() {
        let row = DTuple::new()
            .push(DField::inline(ColumnType::BigInt, table_id.to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Int, (pos as u32).to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Text, col.name.as_bytes().to_vec()))
            .push(DField::inline(ColumnType::Int, mtype_of(col.meta.col_type).to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Int, 0u32.to_be_bytes().to_vec()))
            .push(DField::inline(
                ColumnType::Int,
                (col.meta.fixed_len.unwrap_or(0) as u32).to_be_bytes().to_vec(),
            ));
        dict.sys_columns.insert(row, log)?;
    }

    // bit 0 unique, bit 1 clustered (matches `scan_indexes_for_table`'s decode).
    let flags: u32 = 0b11;
    let indexes_row = DTuple::new()
        .push(DField::inline(ColumnType::BigInt, table_id.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::BigInt, index_id.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Text, format!("{name}_CLUST").into_bytes()))
        .push(DField::inline(ColumnType::Int, (pk_field_count as u32).to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, flags.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, clustered.root_page.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, SYSTEM_SPACE_ID.to_be_bytes().to_vec()));
    dict.sys_indexes.insert(indexes_row, log)?;

    let table = Table::new(table_id, name, SYSTEM_SPACE_ID, columns);
    table.add_index(IndexDef {
        id: index_id,
        name: format!("{name}_CLUST"),
        root_page: clustered.root_page,
        seg_id: clustered.seg_id(),
        n_key_fields: pk_field_count,
        unique: true,
        is_clustered: true,
    });
    dict.cache.insert(Arc::clone(&table));
    Ok((table, clustered))
}

/// Persists a new secondary index over an already-created user table: its
/// `SYS_INDEXES` row, one `SYS_FIELDS` row per key column, and the index's
/// own B-tree, then registers it on the table descriptor (spec §4.8
/// "Create"). `leaf_columns` is the secondary index's full leaf schema
/// (key columns followed by the clustered index's key columns, which a row
/// layer appends so a secondary lookup can always reach the full row);
/// `key_columns` names only the index's own key prefix for `SYS_FIELDS`.
pub fn create_secondary_index(
    dict: &Dictionary,
    space: Arc<FileSpace>,
    pool: Arc<BufferPool>,
    log: &LogSys,
    table: &Arc<Table>,
    name: &str,
    key_columns: &[ColumnDef],
    leaf_columns: Vec<ColumnMeta>,
    n_key_fields: usize,
    unique: bool,
) -> Result<BtreeIndex> {
    let index_id = dict.next_index_id();
    let index = BtreeIndex::create(
        SYSTEM_SPACE_ID,
        index_id,
        leaf_columns,
        n_key_fields,
        unique,
        Arc::clone(&space),
        Arc::clone(&pool),
        log,
    )?;

    let flags: u32 = if unique { 1 } else { 0 };
    let indexes_row = DTuple::new()
        .push(DField::inline(ColumnType::BigInt, table.id.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::BigInt, index_id.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Text, name.as_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, (n_key_fields as u32).to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, flags.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, index.root_page.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Int, SYSTEM_SPACE_ID.to_be_bytes().to_vec()));
    dict.sys_indexes.insert(indexes_row, log)?;

    for (pos, col) in key_columns.iter().enumerate() {
        let row = DTuple::new()
            .push(DField::inline(ColumnType::BigInt, index_id.to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Int, (pos as u32).to_be_bytes().to_vec()))
            .push(DField::inline(ColumnType::Text, col.name.as_bytes().to_vec()));
        dict.sys_fields.insert(row, log)?;
    }

    table.add_index(IndexDef {
        id: index_id,
        name: name.to_string(),
        root_page: index.root_page,
        seg_id: index.seg_id(),
        n_key_fields,
        unique,
        is_clustered: false,
    });

    Ok(index)
}

fn install_system_table_descriptor(cache: &Arc<DictCache>, id: u64, name: &str, index: &Arc<BtreeIndex>) {
    let (columns, names): (Vec<ColumnMeta>, Vec<&str>) = match id {
        SYS_TABLES_ID => (sys_tables_columns(), vec!["name", "id", "n_cols", "space", "flags"]),
        SYS_COLUMNS_ID => (
            sys_columns_columns(),
            vec!["table_id", "pos", "name", "mtype", "prtype", "len"],
        ),
        SYS_INDEXES_ID => (
            sys_indexes_columns(),
            vec!["table_id", "id", "name", "n_fields", "type", "root_page", "space"],
        ),
        _ => (sys_fields_columns(), vec!["index_id", "pos", "col_name"]),
    };
    let column_defs = columns
        .into_iter()
        .zip(names)
        .map(|(meta, n)| ColumnDef { name: n.to_string(), meta })
        .collect();
    let table = Table::new(id, name, SYSTEM_SPACE_ID, column_defs);
    table.add_index(IndexDef {
        id,
        name: format!("{name}_CLUST"),
        root_page: index.root_page,
        seg_id: index.seg_id(),
        n_key_fields: index.n_key_fields,
        unique: true,
        is_clustered: true,
    });
    cache.insert(table);
}
