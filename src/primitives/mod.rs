//! Low-level building blocks of the storage engine core.
//!
//! Includes positioned I/O, page locking with deadlock detection, and the
//! buffer pool that ties them together.

/// Page locks and the blocking lock manager.
///
/// Shared/exclusive page locks, the wait-for graph used for deadlock
/// detection, and the lock manager that blocks callers until granted.
pub mod concurrency;

/// Positioned file I/O.
pub mod io;

/// Buffer pool, its options and the table catalog.
///
/// Caches pages under a fixed capacity, funnels every access through the lock
/// manager, and implements commit and abort.
pub mod pager;
