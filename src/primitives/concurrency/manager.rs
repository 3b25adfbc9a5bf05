use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::graph::WaitForGraph;
use super::lock::Lock;
use crate::types::{KestrelError, LockMode, PageId, Result, TxnId};

/// Page-level lock manager implementing blocking two-phase locking.
///
/// Acquisition blocks until the lock is granted or until the requester
/// detects that waiting would close a cycle in the wait-for graph, in which
/// case the requester is aborted. There are no timeouts.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
}

#[derive(Default)]
struct LockTable {
    locks: FxHashMap<PageId, Lock>,
    held: FxHashMap<TxnId, FxHashSet<PageId>>,
    waiting_on: FxHashMap<TxnId, PageId>,
    graph: WaitForGraph,
}

/// Point-in-time counters describing the lock table.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTableSnapshot {
    /// Pages with a live lock record.
    pub locks: usize,
    /// Transactions currently blocked in `acquire_lock`.
    pub waiting: usize,
    /// Transactions holding at least one lock.
    pub holders: usize,
}

impl LockTable {
    /// Rebuilds every waiter's outgoing edges from current holders.
    fn refresh_edges(&mut self) {
        for (&waiter, pid) in &self.waiting_on {
            let holders = self
                .locks
                .get(pid)
                .map(Lock::holders)
                .unwrap_or_default();
            self.graph.set_waits(waiter, holders);
        }
    }

    fn stop_waiting(&mut self, tid: TxnId) {
        self.waiting_on.remove(&tid);
        self.graph.clear(tid);
    }

    fn release(&mut self, pid: PageId, tid: TxnId) -> Result<()> {
        let lock = self
            .locks
            .get_mut(&pid)
            .ok_or(KestrelError::LockNotHeld { page: pid, txn: tid })?;
        lock.release(tid)?;
        if lock.is_free() {
            // Waiters re-resolve the record on wake-up.
            self.locks.remove(&pid);
        }
        Ok(())
    }
}

impl LockManager {
    /// Creates an empty lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `tid` holds `pid` in `mode`.
    ///
    /// Returns [`KestrelError::TransactionAborted`] if waiting would deadlock;
    /// the caller must then abort the whole transaction. A shared holder
    /// asking for exclusive while other readers hold the page waits on
    /// itself, so that request aborts at once.
    pub fn acquire_lock(&self, pid: PageId, tid: TxnId, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock();
        loop {
            let lock = table.locks.entry(pid).or_insert_with(|| Lock::new(pid));
            if lock.try_acquire(tid, mode) {
                table.stop_waiting(tid);
                table.held.entry(tid).or_default().insert(pid);
                debug!(page = %pid, txn = %tid, ?mode, "lock.granted");
                return Ok(());
            }
            let waiters = lock.waiters();
            table.waiting_on.insert(tid, pid);
            table.refresh_edges();
            if table.graph.has_cycle_from(tid) {
                table.stop_waiting(tid);
                warn!(page = %pid, txn = %tid, ?mode, "lock.deadlock");
                return Err(KestrelError::TransactionAborted(tid));
            }
            debug!(page = %pid, txn = %tid, ?mode, "lock.wait");
            waiters.wait(&mut table);
        }
    }

    /// Releases `tid`'s lock on `pid`.
    pub fn release_lock(&self, pid: PageId, tid: TxnId) -> Result<()> {
        let mut table = self.table.lock();
        let held = table
            .held
            .get_mut(&tid)
            .filter(|pages| pages.contains(&pid))
            .ok_or(KestrelError::LockNotHeld { page: pid, txn: tid })?;
        held.remove(&pid);
        if held.is_empty() {
            table.held.remove(&tid);
        }
        table.release(pid, tid)?;
        debug!(page = %pid, txn = %tid, "lock.released");
        Ok(())
    }

    /// Releases every lock `tid` holds. A no-op if it holds none.
    pub fn release_all_locks(&self, tid: TxnId) -> Result<()> {
        let mut table = self.table.lock();
        table.stop_waiting(tid);
        let Some(pages) = table.held.remove(&tid) else {
            return Ok(());
        };
        let count = pages.len();
        for pid in pages {
            table.release(pid, tid)?;
        }
        debug!(txn = %tid, count, "lock.released_all");
        Ok(())
    }

    /// Returns true if `tid` currently holds `pid` in any mode.
    pub fn holds_lock(&self, pid: PageId, tid: TxnId) -> bool {
        let table = self.table.lock();
        table.locks.get(&pid).is_some_and(|lock| lock.holds(tid))
    }

    /// Mode in which `tid` holds `pid`, if any.
    pub fn lock_mode(&self, pid: PageId, tid: TxnId) -> Option<LockMode> {
        let table = self.table.lock();
        table.locks.get(&pid).and_then(|lock| lock.mode_of(tid))
    }

    /// Pages `tid` holds, in ascending order.
    pub fn held_pages(&self, tid: TxnId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<PageId> = table
            .held
            .get(&tid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    /// Current wait-for edges as `(waiter, holder)` pairs.
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let mut table = self.table.lock();
        table.refresh_edges();
        table.graph.edges()
    }

    /// Returns a snapshot of lock table counters.
    pub fn snapshot(&self) -> LockTableSnapshot {
        let table = self.table.lock();
        LockTableSnapshot {
            locks: table.locks.len(),
            waiting: table.waiting_on.len(),
            holders: table.held.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn page(no: u32) -> PageId {
        PageId::new(TableId(1), no)
    }

    #[test]
    fn acquire_records_and_release_all_clears() -> Result<()> {
        let manager = LockManager::new();
        let tid = TxnId::new();
        manager.acquire_lock(page(0), tid, LockMode::Shared)?;
        manager.acquire_lock(page(1), tid, LockMode::Exclusive)?;
        assert_eq!(manager.held_pages(tid), vec![page(0), page(1)]);
        assert_eq!(manager.lock_mode(page(1), tid), Some(LockMode::Exclusive));
        manager.release_all_locks(tid)?;
        assert!(manager.held_pages(tid).is_empty());
        assert_eq!(manager.snapshot(), LockTableSnapshot::default());
        Ok(())
    }

    #[test]
    fn release_unheld_is_error() {
        let manager = LockManager::new();
        let err = manager.release_lock(page(3), TxnId::new()).unwrap_err();
        assert!(matches!(err, KestrelError::LockNotHeld { .. }));
    }

    #[test]
    fn holds_lock_does_not_create_records() {
        let manager = LockManager::new();
        assert!(!manager.holds_lock(page(9), TxnId::new()));
        assert_eq!(manager.snapshot().locks, 0);
    }

    #[test]
    fn waiter_edges_are_visible_then_cleared() -> Result<()> {
        let manager = Arc::new(LockManager::new());
        let (a, b) = (TxnId::new(), TxnId::new());
        manager.acquire_lock(page(0), a, LockMode::Exclusive)?;
        let worker = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.acquire_lock(page(0), b, LockMode::Shared))
        };
        while manager.snapshot().waiting == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(manager.wait_for_edges(), vec![(b, a)]);
        manager.release_lock(page(0), a)?;
        worker.join().unwrap()?;
        assert!(manager.wait_for_edges().is_empty());
        assert!(manager.holds_lock(page(0), b));
        Ok(())
    }
}
