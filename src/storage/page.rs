use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{KestrelError, PageId, Result, TxnId, PAGE_SIZE};

/// Cached page shared by every caller while it stays resident.
pub type PageHandle = Arc<RwLock<Page>>;

/// One fixed-size page image plus its dirty marker and before-image.
///
/// The byte layout of `data` belongs to the page store; the buffer pool only
/// tracks ownership of modifications.
#[derive(Clone)]
pub struct Page {
    id: PageId,
    data: Box<[u8]>,
    dirty: Option<TxnId>,
    before_image: Box<[u8]>,
}

impl Page {
    /// Builds a clean page from `data`, which also becomes its before-image.
    pub fn new(id: PageId, data: Vec<u8>) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(KestrelError::Invalid("page buffer must be PAGE_SIZE bytes"));
        }
        let data = data.into_boxed_slice();
        Ok(Self {
            id,
            before_image: data.clone(),
            data,
            dirty: None,
        })
    }

    /// Builds a zero-filled clean page.
    pub fn empty(id: PageId) -> Self {
        let data = vec![0u8; PAGE_SIZE].into_boxed_slice();
        Self {
            id,
            before_image: data.clone(),
            data,
            dirty: None,
        }
    }

    /// Wraps the page in a shareable handle.
    pub fn into_handle(self) -> PageHandle {
        Arc::new(RwLock::new(self))
    }

    /// Page identity.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Current contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable contents. Callers must hold the page's exclusive lock.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Transaction that last dirtied the page, if it is dirty.
    pub fn is_dirty(&self) -> Option<TxnId> {
        self.dirty
    }

    /// Sets or clears the dirty marker.
    pub fn mark_dirty(&mut self, dirty: bool, tid: Option<TxnId>) {
        self.dirty = if dirty { tid } else { None };
    }

    /// Clean copy of the page as of its last before-image.
    pub fn before_image(&self) -> Page {
        Page {
            id: self.id,
            data: self.before_image.clone(),
            dirty: None,
            before_image: self.before_image.clone(),
        }
    }

    /// Captures the current contents as the new before-image.
    pub fn set_before_image(&mut self) {
        self.before_image.copy_from_slice(&self.data);
    }

    /// Discards in-memory changes, restoring the before-image in place.
    pub fn restore_before_image(&mut self) {
        self.data.copy_from_slice(&self.before_image);
        self.dirty = None;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
