// End-to-end exercises of the wired-together engine: table creation,
// MVCC-visible reads, secondary-index lookups routed through the insert
// buffer, rollback, and idempotent redo replay (spec §8 worked examples).

use std::sync::Arc;

use rusty_db::buffer::{BufferPool, BufferPoolConfig};
use rusty_db::dict::table::ColumnDef;
use rusty_db::engine::table::SecondaryIndexSpec;
use rusty_db::index::BtreeIndex;
use rusty_db::row::dtuple::{ColumnType, DField};
use rusty_db::row::ColumnMeta;
use rusty_db::{Engine, EngineConfig};
use tempfile::TempDir;

fn new_engine() -> (std::sync::Arc<Engine>, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        data_dir: dir.path().to_path_buf(),
        buffer_pool_frames: 256,
        ..Default::default()
    };
    (Engine::create(&config).unwrap(), dir)
}

fn users_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef {
            name: "id".into(),
            meta: ColumnMeta { col_type: ColumnType::BigInt, nullable: false, fixed_len: Some(8) },
        },
        ColumnDef {
            name: "email".into(),
            meta: ColumnMeta { col_type: ColumnType::Text, nullable: false, fixed_len: None },
        },
    ]
}

fn id_field(id: u64) -> DField {
    DField::inline(ColumnType::BigInt, id.to_be_bytes().to_vec())
}

fn email_field(email: &str) -> DField {
    DField::inline(ColumnType::Text, email.as_bytes().to_vec())
}

#[test]
fn insert_and_read_back_own_write() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let trx = engine.begin();
    table.insert(&trx, vec![id_field(1), email_field("a@example.com")], &engine.log).unwrap();
    let view = engine.read_view(&trx);
    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(1));
    let row = table.get(&view, &engine.trx_sys, &key).unwrap().unwrap();
    assert_eq!(row.fields[1].data, b"a@example.com");
    engine.commit(&trx);
}

#[test]
fn committed_row_visible_to_later_snapshot() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let writer = engine.begin();
    table.insert(&writer, vec![id_field(2), email_field("b@example.com")], &engine.log).unwrap();
    engine.commit(&writer);

    let reader = engine.begin();
    let view = engine.read_view(&reader);
    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(2));
    let row = table.get(&view, &engine.trx_sys, &key).unwrap();
    assert!(row.is_some());
    engine.commit(&reader);
}

#[test]
fn uncommitted_insert_invisible_to_concurrent_snapshot() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let reader = engine.begin();
    let view = engine.read_view(&reader);

    let writer = engine.begin();
    table.insert(&writer, vec![id_field(3), email_field("c@example.com")], &engine.log).unwrap();

    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(3));
    let row = table.get(&view, &engine.trx_sys, &key).unwrap();
    assert!(row.is_none());

    engine.commit(&writer);
    engine.commit(&reader);
}

#[test]
fn rollback_undoes_insert() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let trx = engine.begin();
    table.insert(&trx, vec![id_field(4), email_field("d@example.com")], &engine.log).unwrap();
    engine.rollback(&trx).unwrap();

    let reader = engine.begin();
    let view = engine.read_view(&reader);
    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(4));
    let row = table.get(&view, &engine.trx_sys, &key).unwrap();
    assert!(row.is_none());
    engine.commit(&reader);
}

#[test]
fn rollback_restores_prior_version_after_update() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let setup = engine.begin();
    table.insert(&setup, vec![id_field(5), email_field("old@example.com")], &engine.log).unwrap();
    engine.commit(&setup);

    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(5));
    let updater = engine.begin();
    table.update(&updater, &key, vec![id_field(5), email_field("new@example.com")], &engine.log).unwrap();
    engine.rollback(&updater).unwrap();

    let reader = engine.begin();
    let view = engine.read_view(&reader);
    let row = table.get(&view, &engine.trx_sys, &key).unwrap().unwrap();
    assert_eq!(row.fields[1].data, b"old@example.com");
    engine.commit(&reader);
}

#[test]
fn rollback_restores_row_after_delete() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let setup = engine.begin();
    table.insert(&setup, vec![id_field(6), email_field("e@example.com")], &engine.log).unwrap();
    engine.commit(&setup);

    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(6));
    let deleter = engine.begin();
    table.delete(&deleter, &key, &engine.log).unwrap();
    engine.rollback(&deleter).unwrap();

    let reader = engine.begin();
    let view = engine.read_view(&reader);
    let row = table.get(&view, &engine.trx_sys, &key).unwrap();
    assert!(row.is_some());
    engine.commit(&reader);
}

#[test]
fn non_unique_secondary_lookup_survives_insert_buffering() {
    let (engine, _dir) = new_engine();
    let table = engine
        .create_table(
            "users",
            users_columns(),
            1,
            vec![SecondaryIndexSpec {
                name: "users_by_email".into(),
                key_columns: vec!["email".into()],
                unique: false,
            }],
        )
        .unwrap();

    let trx = engine.begin();
    table.insert(&trx, vec![id_field(7), email_field("f@example.com")], &engine.log).unwrap();
    engine.commit(&trx);

    // Merging any buffered secondary-index entries is driven by the next
    // read of that page or an explicit contraction; either should leave the
    // clustered row reachable regardless of which path actually applied it.
    engine.contract_ibuf().unwrap();

    let reader = engine.begin();
    let view = engine.read_view(&reader);
    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(7));
    let row = table.get(&view, &engine.trx_sys, &key).unwrap().unwrap();
    assert_eq!(row.fields[1].data, b"f@example.com");

    let sec_key = rusty_db::row::dtuple::DTuple::new().push(email_field("f@example.com"));
    let via_secondary = table.find_by_secondary("users_by_email", &view, &engine.trx_sys, &sec_key).unwrap().unwrap();
    assert_eq!(via_secondary.fields[0].data, 7u64.to_be_bytes());
    engine.commit(&reader);
}

#[test]
fn redo_recovery_is_idempotent_against_committed_changes() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let checkpoint_lsn = engine.log.current_lsn();
    let trx = engine.begin();
    table.insert(&trx, vec![id_field(8), email_field("g@example.com")], &engine.log).unwrap();
    engine.commit(&trx);

    // Replaying from before this insert must not corrupt anything already
    // durable, and must be safe to call more than once.
    engine.recover_redo_only(checkpoint_lsn).unwrap();
    engine.recover_redo_only(checkpoint_lsn).unwrap();

    let reader = engine.begin();
    let view = engine.read_view(&reader);
    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(8));
    let row = table.get(&view, &engine.trx_sys, &key).unwrap().unwrap();
    assert_eq!(row.fields[1].data, b"g@example.com");
    engine.commit(&reader);
}

#[test]
fn redo_recovery_reconstructs_row_from_disk_without_the_original_pool() {
    let (engine, _dir) = new_engine();
    let table = engine.create_table("users", users_columns(), 1, vec![]).unwrap();

    let checkpoint_lsn = engine.log.current_lsn();
    let trx = engine.begin();
    table.insert(&trx, vec![id_field(9), email_field("h@example.com")], &engine.log).unwrap();
    engine.commit(&trx);

    engine.recover_redo_only(checkpoint_lsn).unwrap();

    // A fresh buffer pool over the same on-disk tablespace holds none of the
    // original engine's dirty frames, so reading through it proves the row
    // came from redo replay landing on disk, not from an in-memory frame
    // that recovery never touched.
    let fresh_pool = Arc::new(BufferPool::new(
        BufferPoolConfig::default(),
        Arc::clone(&engine.spaces),
        Arc::clone(&engine.log),
    ));
    let idx_def = table.table.clustered_index().unwrap();
    let columns: Vec<ColumnMeta> = table.table.columns.iter().map(|c| c.meta.clone()).collect();
    let fresh_index = BtreeIndex::open(
        engine.system_space_id(),
        idx_def.id,
        idx_def.root_page,
        idx_def.seg_id,
        columns,
        idx_def.n_key_fields,
        idx_def.unique,
        Arc::clone(&engine.system_space),
        fresh_pool,
    );

    let key = rusty_db::row::dtuple::DTuple::new().push(id_field(9));
    let row = fresh_index.get(&key).unwrap().unwrap();
    assert_eq!(row.fields[1].data, b"h@example.com");
}
