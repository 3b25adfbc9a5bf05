use crate::primitives::pager::BufferPool;
use crate::types::{PageId, Result, TableId, TxnId};

use super::page::{Page, PageHandle};

/// Location of a tuple: page plus slot number.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId {
    /// Page holding the tuple.
    pub page: PageId,
    /// Slot inside the page.
    pub slot: u16,
}

/// Opaque tuple bytes with an optional location once stored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tuple {
    /// Where the tuple lives, set by the store on insert.
    pub record_id: Option<RecordId>,
    /// Encoded tuple payload.
    pub data: Vec<u8>,
}

impl Tuple {
    /// Creates an unplaced tuple.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            record_id: None,
            data,
        }
    }
}

/// Page-addressable backing store for one table.
///
/// A table is a flat sequence of fixed-size pages; page number is the byte
/// offset divided by the page size.
///
/// # Locking contract
///
/// `insert_tuple` and `delete_tuple` must hold the exclusive lock on every
/// page they modify and return, normally by fetching those pages through
/// [`BufferPool::get_page`] with `ReadWrite` under the same transaction. The
/// buffer pool marks and caches the returned pages without taking any lock
/// itself.
pub trait PageStore: Send + Sync {
    /// Table this store backs.
    fn table_id(&self) -> TableId;

    /// Reads a page from storage. `InvalidPage` if `pid` is not backed.
    fn read_page(&self, pid: PageId) -> Result<Page>;

    /// Writes the full page at its page-number offset.
    fn write_page(&self, page: &Page) -> Result<()>;

    /// Number of pages currently backing the table.
    fn num_pages(&self) -> Result<u32>;

    /// Makes every completed `write_page` durable.
    fn sync(&self) -> Result<()>;

    /// Inserts `tuple` on behalf of `tid`, returning the pages it modified.
    /// Sets `tuple.record_id` to the new location.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TxnId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageHandle>>;

    /// Deletes `tuple` on behalf of `tid`, returning the pages it modified.
    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TxnId,
        tuple: &Tuple,
    ) -> Result<Vec<PageHandle>>;
}
