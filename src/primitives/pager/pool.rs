use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::catalog::Catalog;
use super::options::BufferPoolOptions;
use crate::primitives::concurrency::LockManager;
use crate::storage::{PageHandle, Tuple};
use crate::types::{KestrelError, LockMode, PageId, Permissions, Result, TableId, TxnId};

/// Counters describing buffer pool activity.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Requests served from the cache.
    pub hits: u64,
    /// Requests that faulted a page in from its store.
    pub misses: u64,
    /// Clean pages evicted to make room.
    pub evictions: u64,
    /// Dirty pages written back to their store.
    pub dirty_writebacks: u64,
    /// Transactions completed with commit.
    pub commits: u64,
    /// Transactions completed with abort.
    pub aborts: u64,
    /// Pages currently resident.
    pub resident: usize,
}

struct PageCache {
    pages: FxHashMap<PageId, PageHandle>,
    rng: StdRng,
    stats: BufferPoolStats,
}

/// Bounded page cache with page-level locking and no-steal eviction.
///
/// Every page access goes through the [`LockManager`]; a read takes a shared
/// lock and a write an exclusive one, both held until the transaction
/// completes. Dirty pages are never evicted, so aborting only has to restore
/// in-memory before-images and never touches disk.
pub struct BufferPool {
    options: BufferPoolOptions,
    catalog: Arc<Catalog>,
    locks: LockManager,
    cache: Mutex<PageCache>,
}

impl BufferPool {
    /// Creates a pool with an empty catalog.
    pub fn new(options: BufferPoolOptions) -> Result<Self> {
        Self::with_catalog(options, Arc::new(Catalog::new()))
    }

    /// Creates a pool serving the tables registered in `catalog`.
    pub fn with_catalog(options: BufferPoolOptions, catalog: Arc<Catalog>) -> Result<Self> {
        options
            .validate()
            .map_err(|_| KestrelError::Invalid("buffer pool capacity must be at least 1"))?;
        let rng = match options.eviction_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            cache: Mutex::new(PageCache {
                pages: FxHashMap::default(),
                rng,
                stats: BufferPoolStats::default(),
            }),
            locks: LockManager::new(),
            catalog,
            options,
        })
    }

    /// Maximum number of resident pages.
    pub fn capacity(&self) -> usize {
        self.options.capacity
    }

    /// Table registry used to resolve page stores.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Lock manager guarding every page access.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Fetches `pid` for `tid` with `perm`, blocking on the page lock.
    ///
    /// Fails with [`KestrelError::TransactionAborted`] if waiting would
    /// deadlock, and with [`KestrelError::PoolExhausted`] if the page is not
    /// resident and every cached page is dirty.
    pub fn get_page(&self, tid: TxnId, pid: PageId, perm: Permissions) -> Result<PageHandle> {
        self.locks.acquire_lock(pid, tid, perm.into())?;
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.pages.get(&pid).cloned() {
            cache.stats.hits += 1;
            return Ok(handle);
        }
        cache.stats.misses += 1;
        let page = self.catalog.store(pid.table)?.read_page(pid)?;
        self.make_room(&mut cache)?;
        let handle = page.into_handle();
        cache.pages.insert(pid, Arc::clone(&handle));
        debug!(page = %pid, txn = %tid, "pool.fault");
        Ok(handle)
    }

    /// Releases `tid`'s lock on `pid` before the transaction ends.
    ///
    /// Only safe when `tid` has not read anything from the page that its
    /// outcome depends on.
    pub fn release_page(&self, tid: TxnId, pid: PageId) -> Result<()> {
        self.locks.release_lock(pid, tid)
    }

    /// Returns true if `tid` holds a lock on `pid`.
    pub fn holds_lock(&self, tid: TxnId, pid: PageId) -> bool {
        self.locks.holds_lock(pid, tid)
    }

    /// Inserts `tuple` into `table` on behalf of `tid`.
    ///
    /// Each page the store reports as modified is marked dirty by `tid` and
    /// cached independently; a failure part way leaves earlier pages marked.
    pub fn insert_tuple(&self, tid: TxnId, table: TableId, tuple: &mut Tuple) -> Result<()> {
        let store = self.catalog.store(table)?;
        let pages = store.insert_tuple(self, tid, tuple)?;
        self.install_dirty(tid, pages)
    }

    /// Deletes `tuple` from its table on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TxnId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id
            .ok_or(KestrelError::Invalid("tuple has no record id"))?;
        let store = self.catalog.store(rid.page.table)?;
        let pages = store.delete_tuple(self, tid, tuple)?;
        self.install_dirty(tid, pages)
    }

    fn install_dirty(&self, tid: TxnId, pages: Vec<PageHandle>) -> Result<()> {
        for handle in pages {
            let mut cache = self.cache.lock();
            let pid = {
                let mut page = handle.write();
                page.mark_dirty(true, Some(tid));
                page.id()
            };
            let same_instance = cache
                .pages
                .get(&pid)
                .map(|resident| Arc::ptr_eq(resident, &handle));
            match same_instance {
                Some(true) => {}
                Some(false) => {
                    cache.pages.insert(pid, handle);
                }
                None => {
                    self.make_room(&mut cache)?;
                    cache.pages.insert(pid, handle);
                }
            }
        }
        Ok(())
    }

    /// Commits or aborts `tid`, then releases all of its locks.
    ///
    /// Commit writes every dirty page `tid` holds and snapshots the held pages
    /// as their new before-images. Abort restores every page `tid` holds
    /// exclusively from its before-image and writes nothing. Locks are
    /// released even when a commit write fails; that error is returned after.
    pub fn transaction_complete(&self, tid: TxnId, commit: bool) -> Result<()> {
        let outcome = if commit {
            self.flush_pages(tid)
        } else {
            self.restore_pages(tid);
            Ok(())
        };
        let released = self.locks.release_all_locks(tid);
        {
            let mut cache = self.cache.lock();
            if commit {
                cache.stats.commits += 1;
            } else {
                cache.stats.aborts += 1;
            }
        }
        debug!(txn = %tid, commit, "pool.txn_complete");
        outcome.and(released)
    }

    /// Shorthand for `transaction_complete(tid, true)`.
    pub fn commit(&self, tid: TxnId) -> Result<()> {
        self.transaction_complete(tid, true)
    }

    /// Shorthand for `transaction_complete(tid, false)`.
    pub fn abort(&self, tid: TxnId) -> Result<()> {
        self.transaction_complete(tid, false)
    }

    /// Rolls back every resident page `tid` holds exclusively.
    fn restore_pages(&self, tid: TxnId) {
        let cache = self.cache.lock();
        for pid in self.locks.held_pages(tid) {
            if self.locks.lock_mode(pid, tid) != Some(LockMode::Exclusive) {
                continue;
            }
            if let Some(handle) = cache.pages.get(&pid) {
                handle.write().restore_before_image();
                debug!(page = %pid, txn = %tid, "pool.restore");
            }
        }
    }

    /// Writes every dirty page `tid` holds, syncs the touched stores, and
    /// makes each held page's current contents its before-image.
    ///
    /// The before-image is refreshed even for pages that are already clean,
    /// since [`BufferPool::flush_page`] may have written them earlier in the
    /// transaction.
    pub fn flush_pages(&self, tid: TxnId) -> Result<()> {
        let mut cache = self.cache.lock();
        let mut written: Vec<TableId> = Vec::new();
        for pid in self.locks.held_pages(tid) {
            let Some(handle) = cache.pages.get(&pid).cloned() else {
                continue;
            };
            if let Some(owner) = handle.read().is_dirty() {
                if owner != tid {
                    warn!(page = %pid, txn = %tid, %owner, "pool.foreign_dirty_page");
                }
            }
            if self.write_back(&mut cache.stats, &handle)? && !written.contains(&pid.table) {
                written.push(pid.table);
            }
            handle.write().set_before_image();
        }
        for table in written {
            self.catalog.store(table)?.sync()?;
        }
        Ok(())
    }

    /// Writes `pid` to its store if it is resident and dirty.
    ///
    /// Used mid-transaction this writes uncommitted changes, so it breaks
    /// no-steal guarantees the same way [`BufferPool::flush_all_pages`] does.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.pages.get(&pid).cloned() {
            self.write_back(&mut cache.stats, &handle)?;
        }
        Ok(())
    }

    /// Writes every resident dirty page.
    ///
    /// This writes uncommitted changes too, so it breaks no-steal guarantees
    /// if used while transactions are running.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        let handles: Vec<PageHandle> = cache.pages.values().cloned().collect();
        for handle in handles {
            self.write_back(&mut cache.stats, &handle)?;
        }
        Ok(())
    }

    /// Drops `pid` from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        if self.cache.lock().pages.remove(&pid).is_some() {
            debug!(page = %pid, "pool.discard");
        }
    }

    /// Returns true if `pid` is resident.
    pub fn is_resident(&self, pid: PageId) -> bool {
        self.cache.lock().pages.contains_key(&pid)
    }

    /// Resident page ids in ascending order.
    pub fn resident_pages(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self.cache.lock().pages.keys().copied().collect();
        pages.sort();
        pages
    }

    /// Snapshot of pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        let cache = self.cache.lock();
        let mut stats = cache.stats.clone();
        stats.resident = cache.pages.len();
        stats
    }

    /// Writes the page if dirty and clears the marker. Returns whether it wrote.
    fn write_back(&self, stats: &mut BufferPoolStats, handle: &PageHandle) -> Result<bool> {
        let mut page = handle.write();
        if page.is_dirty().is_none() {
            return Ok(false);
        }
        self.catalog.store(page.id().table)?.write_page(&page)?;
        page.mark_dirty(false, None);
        stats.dirty_writebacks += 1;
        Ok(true)
    }

    fn make_room(&self, cache: &mut PageCache) -> Result<()> {
        while cache.pages.len() >= self.options.capacity {
            self.evict_page(cache)?;
        }
        Ok(())
    }

    /// Evicts one clean page, probing from a random start.
    fn evict_page(&self, cache: &mut PageCache) -> Result<()> {
        let mut candidates: Vec<PageId> = cache.pages.keys().copied().collect();
        if candidates.is_empty() {
            return Err(KestrelError::PoolExhausted("no resident pages to evict"));
        }
        candidates.sort();
        let start = cache.rng.gen_range(0..candidates.len());
        for offset in 0..candidates.len() {
            let pid = candidates[(start + offset) % candidates.len()];
            let handle = Arc::clone(&cache.pages[&pid]);
            if handle.read().is_dirty().is_some() {
                continue;
            }
            if let Err(err) = self.write_back(&mut cache.stats, &handle) {
                warn!(page = %pid, error = %err, "pool.evict_flush_failed");
                return Err(KestrelError::PoolExhausted("flush of eviction victim failed"));
            }
            cache.pages.remove(&pid);
            cache.stats.evictions += 1;
            debug!(page = %pid, "pool.evict");
            return Ok(());
        }
        warn!(resident = candidates.len(), "pool.exhausted");
        Err(KestrelError::PoolExhausted("every cached page is dirty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemoryIo;
    use crate::storage::{HeapFile, PageStore};
    use crate::types::TableId;

    fn pool_with_pages(capacity: usize, pages: u32) -> (BufferPool, TableId) {
        let table = TableId(1);
        let heap = HeapFile::new(table, Arc::new(MemoryIo::new()), 8).unwrap();
        for page_no in 0..pages {
            heap.write_page(&crate::storage::Page::empty(PageId::new(table, page_no)))
                .unwrap();
        }
        let pool =
            BufferPool::new(BufferPoolOptions::default().capacity(capacity).eviction_seed(1))
                .unwrap();
        pool.catalog().add_table(Arc::new(heap));
        (pool, table)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(BufferPool::new(BufferPoolOptions::default().capacity(0)).is_err());
    }

    #[test]
    fn resident_page_is_shared() -> Result<()> {
        let (pool, table) = pool_with_pages(2, 1);
        let pid = PageId::new(table, 0);
        let (a, b) = (TxnId::new(), TxnId::new());
        let first = pool.get_page(a, pid, Permissions::ReadOnly)?;
        let second = pool.get_page(b, pid, Permissions::ReadOnly)?;
        assert!(Arc::ptr_eq(&first, &second));
        let stats = pool.stats();
        assert_eq!((stats.hits, stats.misses, stats.resident), (1, 1, 1));
        Ok(())
    }

    #[test]
    fn unknown_table_is_reported() {
        let (pool, _) = pool_with_pages(2, 1);
        let err = pool
            .get_page(TxnId::new(), PageId::new(TableId(9), 0), Permissions::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, KestrelError::NoSuchTable(TableId(9))));
    }

    #[test]
    fn discard_drops_without_writing() -> Result<()> {
        let (pool, table) = pool_with_pages(2, 1);
        let pid = PageId::new(table, 0);
        let tid = TxnId::new();
        let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        handle.write().data_mut()[0] = 1;
        handle.write().mark_dirty(true, Some(tid));
        pool.discard_page(pid);
        assert!(!pool.is_resident(pid));
        assert_eq!(pool.stats().dirty_writebacks, 0);
        Ok(())
    }
}
