use std::sync::Arc;

use parking_lot::Condvar;
use rustc_hash::FxHashSet;

use crate::types::{KestrelError, LockMode, PageId, Result, TxnId};

/// Shared/exclusive lock state for a single page.
///
/// `try_acquire` never blocks; waiting is the lock manager's job. Callers
/// serialize access through the lock manager's table mutex, and wait on
/// [`Lock::waiters`] with that same mutex.
pub struct Lock {
    page: PageId,
    shared: FxHashSet<TxnId>,
    exclusive: Option<TxnId>,
    waiters: Arc<Condvar>,
}

impl Lock {
    /// Creates an unheld lock for `page`.
    pub fn new(page: PageId) -> Self {
        Self {
            page,
            shared: FxHashSet::default(),
            exclusive: None,
            waiters: Arc::new(Condvar::new()),
        }
    }

    /// Attempts to grant `mode` to `tid` without blocking.
    ///
    /// An exclusive request from the sole shared holder upgrades in place.
    pub fn try_acquire(&mut self, tid: TxnId, mode: LockMode) -> bool {
        if let Some(holder) = self.exclusive {
            return holder == tid;
        }
        match mode {
            LockMode::Shared => {
                self.shared.insert(tid);
                true
            }
            LockMode::Exclusive => {
                if self.shared.is_empty() {
                    self.exclusive = Some(tid);
                    true
                } else if self.shared.len() == 1 && self.shared.contains(&tid) {
                    self.shared.clear();
                    self.exclusive = Some(tid);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drops `tid`'s hold and wakes every waiter on this page.
    pub fn release(&mut self, tid: TxnId) -> Result<()> {
        if self.exclusive == Some(tid) {
            self.exclusive = None;
        } else if !self.shared.remove(&tid) {
            return Err(KestrelError::LockNotHeld {
                page: self.page,
                txn: tid,
            });
        }
        self.waiters.notify_all();
        Ok(())
    }

    /// Current holders: the exclusive holder alone, or every shared holder.
    pub fn holders(&self) -> Vec<TxnId> {
        match self.exclusive {
            Some(holder) => vec![holder],
            None => self.shared.iter().copied().collect(),
        }
    }

    /// Returns true if `tid` holds this lock in any mode.
    pub fn holds(&self, tid: TxnId) -> bool {
        self.mode_of(tid).is_some()
    }

    /// Mode in which `tid` holds this lock, if any.
    pub fn mode_of(&self, tid: TxnId) -> Option<LockMode> {
        match self.exclusive {
            Some(holder) if holder == tid => Some(LockMode::Exclusive),
            Some(_) => None,
            None if self.shared.contains(&tid) => Some(LockMode::Shared),
            None => None,
        }
    }

    /// Returns true if nobody holds the lock.
    pub fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }

    /// Condition variable signalled on every release.
    pub fn waiters(&self) -> Arc<Condvar> {
        Arc::clone(&self.waiters)
    }
}
