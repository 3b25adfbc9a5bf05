//! Kestrel: the concurrency-control and caching core of a page-oriented
//! relational storage engine.
//!
//! A bounded [`BufferPool`] caches pages of tables registered in a
//! [`Catalog`], funnelling every access through a page-level [`LockManager`]
//! that blocks conflicting requests and aborts the requester when waiting
//! would deadlock. Commit flushes a transaction's dirty pages; abort restores
//! their before-images in memory. Dirty pages are never evicted.

pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::concurrency::{LockManager, LockTableSnapshot};
pub use primitives::pager::{BufferPool, BufferPoolOptions, BufferPoolStats, Catalog};
pub use storage::{HeapFile, Page, PageHandle, PageStore, RecordId, Tuple};
pub use types::{
    KestrelError, LockMode, PageId, Permissions, Result, TableId, TxnId, PAGE_SIZE,
};
