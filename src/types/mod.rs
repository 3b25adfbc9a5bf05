//! Identifiers, permission levels and the crate error type.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes per page, header included.
pub const PAGE_SIZE: usize = 4096;

/// Identifies a table (one backing [`crate::storage::PageStore`]).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableId(pub u32);

/// Identifies one page of one table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId {
    /// Table the page belongs to.
    pub table: TableId,
    /// Zero-based page number inside the table.
    pub page_no: u32,
}

impl PageId {
    /// Creates a page id for `page_no` of `table`.
    pub const fn new(table: TableId, page_no: u32) -> Self {
        Self { table, page_no }
    }

    /// Byte offset of this page inside its table file.
    pub fn offset(&self) -> u64 {
        self.page_no as u64 * PAGE_SIZE as u64
    }
}

static NEXT_TXN: AtomicU64 = AtomicU64::new(1);

/// Opaque transaction identity.
///
/// Carries no state beyond identity; it keys lock ownership and dirty-page
/// ownership.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxnId(u64);

impl TxnId {
    /// Allocates a fresh, process-unique transaction id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        TxnId(NEXT_TXN.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id. Callers are responsible for uniqueness.
    pub const fn from_raw(raw: u64) -> Self {
        TxnId(raw)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Access level requested for a page.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Permissions {
    /// Read access; taken under a shared lock.
    ReadOnly,
    /// Read/write access; taken under an exclusive lock.
    ReadWrite,
}

/// Lock mode held on a page.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LockMode {
    /// Compatible with other shared holders.
    Shared,
    /// Excludes every other holder.
    Exclusive,
}

impl From<Permissions> for LockMode {
    fn from(perm: Permissions) -> Self {
        match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.page_no)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Errors raised by the lock manager, buffer pool and page stores.
#[derive(thiserror::Error, Debug)]
pub enum KestrelError {
    /// The transaction was chosen as a deadlock victim and must abort.
    #[error("transaction {0} aborted: deadlock detected")]
    TransactionAborted(TxnId),
    /// No clean page could be evicted to make room.
    #[error("buffer pool exhausted: {0}")]
    PoolExhausted(&'static str),
    /// A release named a lock the transaction does not hold.
    #[error("{txn} does not hold a lock on page {page}")]
    LockNotHeld {
        /// Page named by the release.
        page: PageId,
        /// Transaction that attempted the release.
        txn: TxnId,
    },
    /// The page id is not backed by its store.
    #[error("invalid page {0}")]
    InvalidPage(PageId),
    /// No store is registered for the table.
    #[error("no such table {0}")]
    NoSuchTable(TableId),
    /// Malformed argument or state.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A looked-up entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// I/O failure from the backing store.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl KestrelError {
    /// Returns true if the caller must run the abort path.
    pub fn is_abort(&self) -> bool {
        matches!(self, KestrelError::TransactionAborted(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, KestrelError>;
