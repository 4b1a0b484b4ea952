// B-tree engine benchmarks: sequential and random insert (forcing splits),
// and point lookup once the tree has grown past a single page.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusty_db::buffer::{BufferPool, BufferPoolConfig};
use rusty_db::common::SYSTEM_SPACE_ID;
use rusty_db::fsp::space::{SpaceManager, TablespaceFile};
use rusty_db::fsp::FileSpace;
use rusty_db::index::BtreeIndex;
use rusty_db::mtr::LogSys;
use rusty_db::row::dtuple::{ColumnType, DField, DTuple};
use rusty_db::row::ColumnMeta;
use tempfile::TempDir;

fn new_index() -> (BtreeIndex, Arc<LogSys>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let ts = TablespaceFile::create(SYSTEM_SPACE_ID, temp_dir.path().join("bench.ibd")).unwrap();
    let spaces = Arc::new(SpaceManager::new());
    let ts = spaces.register(ts);
    let space = Arc::new(FileSpace::create(ts, SYSTEM_SPACE_ID).unwrap());
    let log = Arc::new(LogSys::create(temp_dir.path().join("bench.log")).unwrap());
    let pool = Arc::new(BufferPool::new(BufferPoolConfig::default(), spaces, Arc::clone(&log)));
    let columns = vec![
        ColumnMeta { col_type: ColumnType::BigInt, nullable: false, fixed_len: Some(8) },
        ColumnMeta { col_type: ColumnType::Binary, nullable: false, fixed_len: Some(64) },
    ];
    let index = BtreeIndex::create(SYSTEM_SPACE_ID, 100, columns, 1, true, space, pool, &log).unwrap();
    (index, log, temp_dir)
}

fn row(key: u64) -> DTuple {
    DTuple::new()
        .push(DField::inline(ColumnType::BigInt, key.to_be_bytes().to_vec()))
        .push(DField::inline(ColumnType::Binary, vec![0u8; 64]))
}

fn bench_sequential_insert(c: &mut Criterion) {
    c.bench_function("btree_sequential_insert", |b| {
        b.iter_batched(
            new_index,
            |(index, log, _temp)| {
                for key in 0..2000u64 {
                    index.insert(row(black_box(key)), &log).unwrap();
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_random_insert(c: &mut Criterion) {
    c.bench_function("btree_random_insert", |b| {
        b.iter_batched(
            new_index,
            |(index, log, _temp)| {
                for i in 0..2000u64 {
                    let key = i.wrapping_mul(2654435761) % 100_000;
                    index.insert(row(black_box(key)), &log).unwrap();
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_point_lookup");
    for n_rows in [100u64, 1000, 5000] {
        group.bench_with_input(BenchmarkId::from_parameter(n_rows), &n_rows, |b, &n_rows| {
            let (index, log, _temp) = new_index();
            for key in 0..n_rows {
                index.insert(row(key), &log).unwrap();
            }
            let key = DTuple::new().push(DField::inline(ColumnType::BigInt, (n_rows / 2).to_be_bytes().to_vec()));
            b.iter(|| {
                black_box(index.get(&key).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sequential_insert, bench_random_insert, bench_point_lookup);
criterion_main!(benches);
