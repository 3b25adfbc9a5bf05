use kestrel::primitives::io::MemoryIo;
use kestrel::{
    BufferPool, BufferPoolOptions, HeapFile, KestrelError, Page, PageId, PageStore, Permissions,
    Result, TableId, TxnId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Barrier};
use std::thread;

const TABLE: TableId = TableId(7);

fn page(no: u32) -> PageId {
    PageId::new(TABLE, no)
}

fn setup(capacity: usize, pages: u32, seed: u64) -> Result<(BufferPool, Arc<MemoryIo>)> {
    let io = Arc::new(MemoryIo::new());
    let heap = HeapFile::new(TABLE, io.clone(), 16)?;
    for page_no in 0..pages {
        let mut page = Page::empty(page(page_no));
        page.data_mut()[100] = page_no as u8;
        heap.write_page(&page)?;
    }
    let pool = BufferPool::new(
        BufferPoolOptions::default()
            .capacity(capacity)
            .eviction_seed(seed),
    )?;
    pool.catalog().add_table(Arc::new(heap));
    Ok((pool, io))
}

fn dirty(pool: &BufferPool, tid: TxnId, pid: PageId, byte: u8) -> Result<()> {
    let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
    let mut page = handle.write();
    page.data_mut()[0] = byte;
    page.mark_dirty(true, Some(tid));
    Ok(())
}

#[test]
fn one_page_over_capacity_evicts_exactly_one() -> Result<()> {
    let (pool, io) = setup(4, 5, 11)?;
    let writes = io.write_count();
    let tid = TxnId::new();
    for page_no in 0..4 {
        pool.get_page(tid, page(page_no), Permissions::ReadOnly)?;
    }
    assert_eq!(pool.stats().evictions, 0);
    assert_eq!(pool.stats().resident, 4);

    let handle = pool.get_page(tid, page(4), Permissions::ReadOnly)?;
    assert_eq!(handle.read().data()[100], 4);
    let stats = pool.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.resident, 4);
    assert_eq!(stats.misses, 5);
    assert!(pool.is_resident(page(4)));
    assert_eq!(io.write_count(), writes, "clean eviction writes nothing");
    Ok(())
}

#[test]
fn all_dirty_pool_is_exhausted() -> Result<()> {
    let (pool, _io) = setup(3, 4, 1)?;
    let tid = TxnId::new();
    for page_no in 0..3 {
        dirty(&pool, tid, page(page_no), 0xAB)?;
    }
    let err = pool
        .get_page(tid, page(3), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, KestrelError::PoolExhausted(_)));
    assert_eq!(pool.resident_pages(), vec![page(0), page(1), page(2)]);

    // Cached pages stay reachable.
    let handle = pool.get_page(tid, page(1), Permissions::ReadOnly)?;
    assert_eq!(handle.read().data()[0], 0xAB);
    Ok(())
}

#[test]
fn eviction_only_picks_clean_pages() -> Result<()> {
    for seed in 0..8 {
        let (pool, _io) = setup(4, 12, seed)?;
        let writer = TxnId::new();
        for page_no in 0..3 {
            dirty(&pool, writer, page(page_no), 1)?;
        }
        for page_no in 3..12 {
            let reader = TxnId::new();
            pool.get_page(reader, page(page_no), Permissions::ReadOnly)?;
            pool.commit(reader)?;
            for dirty_no in 0..3 {
                assert!(pool.is_resident(page(dirty_no)), "seed {seed} evicted a dirty page");
            }
            assert!(pool.stats().resident <= 4);
        }
        assert_eq!(pool.stats().evictions, 8);
    }
    Ok(())
}

#[test]
fn concurrent_faults_never_exceed_capacity() {
    const THREADS: usize = 8;
    const CAPACITY: usize = 4;
    let (pool, _io) = setup(CAPACITY, 32, 3).unwrap();
    let pool = Arc::new(pool);
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
                barrier.wait();
                for _ in 0..200 {
                    let tid = TxnId::new();
                    let page_no = rng.gen_range(0..32);
                    let handle = pool
                        .get_page(tid, page(page_no), Permissions::ReadOnly)
                        .unwrap();
                    assert_eq!(handle.read().data()[100], page_no as u8);
                    assert!(pool.stats().resident <= CAPACITY);
                    pool.commit(tid).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let stats = pool.stats();
    assert!(stats.resident <= CAPACITY);
    assert_eq!(stats.hits + stats.misses, (THREADS * 200) as u64);
    assert_eq!(stats.commits, (THREADS * 200) as u64);
}

#[test]
fn flush_page_writes_only_dirty_pages() -> Result<()> {
    let (pool, io) = setup(4, 3, 5)?;
    let base = io.write_count();
    let tid = TxnId::new();
    pool.get_page(tid, page(0), Permissions::ReadOnly)?;
    pool.flush_page(page(0))?;
    pool.flush_page(page(2))?;
    assert_eq!(io.write_count(), base);

    dirty(&pool, tid, page(1), 0x5A)?;
    pool.flush_page(page(1))?;
    assert_eq!(io.write_count(), base + 1);
    assert_eq!(io.contents()[page(1).offset() as usize], 0x5A);
    let handle = pool.get_page(tid, page(1), Permissions::ReadOnly)?;
    assert_eq!(handle.read().is_dirty(), None);

    pool.flush_page(page(1))?;
    assert_eq!(io.write_count(), base + 1);
    Ok(())
}

#[test]
fn flush_all_pages_writes_every_dirty_page() -> Result<()> {
    let (pool, io) = setup(4, 4, 5)?;
    let base = io.write_count();
    let (a, b) = (TxnId::new(), TxnId::new());
    dirty(&pool, a, page(0), 1)?;
    dirty(&pool, b, page(2), 2)?;
    pool.get_page(a, page(3), Permissions::ReadOnly)?;
    pool.flush_all_pages()?;
    assert_eq!(io.write_count(), base + 2);
    assert_eq!(pool.stats().dirty_writebacks, 2);
    assert!(pool.resident_pages().len() == 3);
    Ok(())
}

#[test]
fn discarded_page_is_reread_from_store() -> Result<()> {
    let (pool, _io) = setup(4, 2, 5)?;
    let tid = TxnId::new();
    dirty(&pool, tid, page(0), 0xEE)?;
    pool.discard_page(page(0));
    assert!(!pool.is_resident(page(0)));
    let handle = pool.get_page(tid, page(0), Permissions::ReadOnly)?;
    assert_eq!(handle.read().data()[0], 0);
    assert_eq!(handle.read().is_dirty(), None);
    Ok(())
}

#[test]
fn options_load_from_toml_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kestrel.toml");
    std::fs::write(&path, "[buffer_pool]\ncapacity = 2\neviction_seed = 9\n")?;
    let options = BufferPoolOptions::load(&path).expect("valid config");
    assert_eq!(options.capacity, 2);
    assert_eq!(options.eviction_seed, Some(9));
    let pool = BufferPool::new(options)?;
    assert_eq!(pool.capacity(), 2);
    Ok(())
}
