//! Heap table file: unordered fixed-width tuples in fixed-size pages.
//!
//! Each page starts with an occupancy bitmap (one bit per slot, slot 0 in the
//! least significant bit of byte 0) followed by the slots themselves. A page
//! holds `floor(PAGE_SIZE * 8 / (width * 8 + 1))` slots.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::pager::BufferPool;
use crate::types::{KestrelError, PageId, Permissions, Result, TableId, TxnId, PAGE_SIZE};

use super::page::{Page, PageHandle};
use super::store::{PageStore, RecordId, Tuple};

/// Slot geometry shared by every page of a heap file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlotLayout {
    width: usize,
    slots: usize,
    header_len: usize,
}

impl SlotLayout {
    /// Computes the layout for tuples of `width` bytes.
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(KestrelError::Invalid("tuple width must be non-zero"));
        }
        let slots = (PAGE_SIZE * 8) / (width * 8 + 1);
        if slots == 0 || slots > u16::MAX as usize {
            return Err(KestrelError::Invalid("tuple width does not fit a page"));
        }
        Ok(Self {
            width,
            slots,
            header_len: slots.div_ceil(8),
        })
    }

    /// Tuple width in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Slots per page.
    pub fn slots(&self) -> usize {
        self.slots
    }

    fn is_used(&self, data: &[u8], slot: usize) -> bool {
        data[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_used(&self, data: &mut [u8], slot: usize, used: bool) {
        if used {
            data[slot / 8] |= 1 << (slot % 8);
        } else {
            data[slot / 8] &= !(1 << (slot % 8));
        }
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = self.header_len + slot * self.width;
        start..start + self.width
    }

    fn free_slot(&self, data: &[u8]) -> Option<usize> {
        (0..self.slots).find(|&slot| !self.is_used(data, slot))
    }
}

/// [`PageStore`] over a flat file of heap pages.
pub struct HeapFile {
    table: TableId,
    io: Arc<dyn FileIo>,
    layout: SlotLayout,
    append: Mutex<()>,
}

impl HeapFile {
    /// Creates a heap file over `io` for tuples of `width` bytes.
    pub fn new(table: TableId, io: Arc<dyn FileIo>, width: usize) -> Result<Self> {
        let layout = SlotLayout::new(width)?;
        if io.len()? % PAGE_SIZE as u64 != 0 {
            return Err(KestrelError::Invalid("heap file length is not page aligned"));
        }
        Ok(Self {
            table,
            io,
            layout,
            append: Mutex::new(()),
        })
    }

    /// Opens or creates the heap file at `path`.
    pub fn open(table: TableId, path: impl AsRef<Path>, width: usize) -> Result<Self> {
        Self::new(table, Arc::new(StdFileIo::open(path)?), width)
    }

    /// Slot geometry of this file.
    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    /// Reads every live tuple under shared locks held by `tid`.
    pub fn scan(&self, pool: &BufferPool, tid: TxnId) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.table, page_no);
            let handle = pool.get_page(tid, pid, Permissions::ReadOnly)?;
            let page = handle.read();
            for slot in 0..self.layout.slots {
                if self.layout.is_used(page.data(), slot) {
                    out.push(Tuple {
                        record_id: Some(RecordId {
                            page: pid,
                            slot: slot as u16,
                        }),
                        data: page.data()[self.layout.slot_range(slot)].to_vec(),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Appends a zeroed page unless another inserter already grew the file
    /// past `seen` pages.
    fn append_page(&self, seen: u32) -> Result<()> {
        let _append = self.append.lock();
        let pages = self.num_pages()?;
        if pages > seen {
            return Ok(());
        }
        let page = Page::empty(PageId::new(self.table, pages));
        self.write_page(&page)?;
        debug!(table = %self.table, page_no = pages, "heap.append_page");
        Ok(())
    }

    /// Claims a free slot on `pid` for `tuple` under an exclusive lock.
    ///
    /// A full page's lock is dropped again if this call was the one that took
    /// it; nothing was read from the page that the outcome depends on.
    fn try_place(
        &self,
        pool: &BufferPool,
        tid: TxnId,
        pid: PageId,
        tuple: &mut Tuple,
    ) -> Result<Option<PageHandle>> {
        let held_before = pool.holds_lock(tid, pid);
        let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        let placed = {
            let mut page = handle.write();
            match self.layout.free_slot(page.data()) {
                Some(slot) => {
                    let range = self.layout.slot_range(slot);
                    let data = page.data_mut();
                    self.layout.set_used(data, slot, true);
                    data[range].copy_from_slice(&tuple.data);
                    tuple.record_id = Some(RecordId {
                        page: pid,
                        slot: slot as u16,
                    });
                    true
                }
                None => false,
            }
        };
        if placed {
            return Ok(Some(handle));
        }
        if !held_before {
            pool.release_page(tid, pid)?;
        }
        Ok(None)
    }
}

impl PageStore for HeapFile {
    fn table_id(&self) -> TableId {
        self.table
    }

    fn read_page(&self, pid: PageId) -> Result<Page> {
        if pid.table != self.table || pid.page_no >= self.num_pages()? {
            return Err(KestrelError::InvalidPage(pid));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        self.io.read_at(pid.offset(), &mut buf)?;
        Page::new(pid, buf)
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let pid = page.id();
        if pid.table != self.table {
            return Err(KestrelError::InvalidPage(pid));
        }
        self.io.write_at(pid.offset(), page.data())
    }

    fn num_pages(&self) -> Result<u32> {
        let pages = self.io.len()? / PAGE_SIZE as u64;
        u32::try_from(pages).map_err(|_| KestrelError::Invalid("heap file too large"))
    }

    fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TxnId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageHandle>> {
        if tuple.data.len() != self.layout.width {
            return Err(KestrelError::Invalid("tuple width does not match table"));
        }
        let mut page_no = 0;
        loop {
            let pages = self.num_pages()?;
            while page_no < pages {
                let pid = PageId::new(self.table, page_no);
                if let Some(handle) = self.try_place(pool, tid, pid, tuple)? {
                    return Ok(vec![handle]);
                }
                page_no += 1;
            }
            self.append_page(pages)?;
        }
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TxnId,
        tuple: &Tuple,
    ) -> Result<Vec<PageHandle>> {
        let rid = tuple
            .record_id
            .ok_or(KestrelError::Invalid("tuple has no record id"))?;
        if rid.page.table != self.table {
            return Err(KestrelError::Invalid("tuple belongs to another table"));
        }
        let slot = rid.slot as usize;
        if slot >= self.layout.slots {
            return Err(KestrelError::Invalid("slot out of range"));
        }
        let handle = pool.get_page(tid, rid.page, Permissions::ReadWrite)?;
        {
            let mut page = handle.write();
            if !self.layout.is_used(page.data(), slot) {
                return Err(KestrelError::NotFound("tuple"));
            }
            self.layout.set_used(page.data_mut(), slot, false);
        }
        Ok(vec![handle])
    }
}
