// Buffer pool performance benchmarks: page get/release latency, eviction
// pressure once the frame count is exceeded, and concurrent pin contention.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusty_db::buffer::{BufferPool, BufferPoolConfig, LatchMode};
use rusty_db::common::PageId;
use rusty_db::fsp::space::{SpaceManager, TablespaceFile};
use rusty_db::mtr::LogSys;
use tempfile::TempDir;

fn create_pool(num_frames: usize, num_pages: u32) -> (BufferPool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let ts = TablespaceFile::create(0, temp_dir.path().join("bench.ibd")).unwrap();
    ts.extend(num_pages).unwrap();
    let spaces = Arc::new(SpaceManager::new());
    spaces.register(ts);
    let log = Arc::new(LogSys::create(temp_dir.path().join("bench.log")).unwrap());
    let pool = BufferPool::new(
        BufferPoolConfig {
            num_frames,
            ..Default::default()
        },
        spaces,
        log,
    );
    (pool, temp_dir)
}

fn bench_get_release(c: &mut Criterion) {
    let (pool, _temp) = create_pool(1000, 2000);
    c.bench_function("buffer_pool_get_release", |b| {
        b.iter(|| {
            let frame_id = pool.get(PageId::new(0, black_box(1)), LatchMode::Shared).unwrap();
            pool.release(frame_id, LatchMode::Shared);
        });
    });
}

fn bench_eviction_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_pressure");
    for num_frames in [100usize, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(num_frames), &num_frames, |b, &num_frames| {
            let (pool, _temp) = create_pool(num_frames, 2000);
            b.iter(|| {
                for page_no in 0..(num_frames as u32 * 2) {
                    let frame_id = pool.get(PageId::new(0, black_box(page_no)), LatchMode::Shared).unwrap();
                    pool.release(frame_id, LatchMode::Shared);
                }
            });
        });
    }
    group.finish();
}

fn bench_concurrent_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_get");
    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_threads), &num_threads, |b, &num_threads| {
            let (pool, _temp) = create_pool(1000, 2000);
            let pool = Arc::new(pool);
            b.iter(|| {
                let handles: Vec<_> = (0..num_threads)
                    .map(|i| {
                        let pool = Arc::clone(&pool);
                        std::thread::spawn(move || {
                            for j in 0..50u32 {
                                let page_no = (i as u32 * 50 + j) % 1900;
                                let frame_id = pool.get(PageId::new(0, page_no), LatchMode::Shared).unwrap();
                                black_box(pool.block(frame_id));
                                pool.release(frame_id, LatchMode::Shared);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_get_release, bench_eviction_pressure, bench_concurrent_get);
criterion_main!(benches);
