#![forbid(unsafe_code)]

use std::sync::{Arc, Barrier};
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kestrel::primitives::io::MemoryIo;
use kestrel::{
    BufferPool, BufferPoolOptions, HeapFile, LockManager, LockMode, Page, PageId, PageStore,
    Permissions, TableId, TxnId,
};

const TABLE: TableId = TableId(1);
const OPS_PER_THREAD: usize = 256;

fn lock_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/lock");
    group.throughput(Throughput::Elements(64));
    let manager = LockManager::new();
    for mode in [LockMode::Shared, LockMode::Exclusive] {
        group.bench_with_input(
            BenchmarkId::new("acquire_release_all", format!("{mode:?}")),
            &mode,
            |b, &mode| {
                b.iter(|| {
                    let tid = TxnId::new();
                    for page_no in 0..64 {
                        manager
                            .acquire_lock(PageId::new(TABLE, page_no), tid, mode)
                            .expect("acquire");
                    }
                    manager.release_all_locks(tid).expect("release");
                });
            },
        );
    }
    group.finish();
}

fn shared_readers(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended/shared_get_page");
    group.sample_size(20);
    for threads in [1usize, 2, 4, 8] {
        let pool = Arc::new(pool_with_pages(16, 16));
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| run_readers(&pool, threads));
        });
    }
    group.finish();
}

fn pool_with_pages(capacity: usize, pages: u32) -> BufferPool {
    let heap = HeapFile::new(TABLE, Arc::new(MemoryIo::new()), 64).expect("heap");
    for page_no in 0..pages {
        heap.write_page(&Page::empty(PageId::new(TABLE, page_no)))
            .expect("write page");
    }
    let pool = BufferPool::new(
        BufferPoolOptions::default()
            .capacity(capacity)
            .eviction_seed(0),
    )
    .expect("pool");
    pool.catalog().add_table(Arc::new(heap));
    pool
}

fn run_readers(pool: &Arc<BufferPool>, threads: usize) {
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pool = Arc::clone(pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..OPS_PER_THREAD {
                    let tid = TxnId::new();
                    let pid = PageId::new(TABLE, ((t + i) % 16) as u32);
                    pool.get_page(tid, pid, Permissions::ReadOnly)
                        .expect("get_page");
                    pool.commit(tid).expect("commit");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("reader thread");
    }
}

criterion_group!(benches, lock_uncontended, shared_readers);
criterion_main!(benches);
