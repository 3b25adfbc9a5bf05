use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::storage::PageStore;
use crate::types::{KestrelError, Result, TableId};

/// Registry mapping table ids to their backing stores.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<FxHashMap<TableId, Arc<dyn PageStore>>>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` under its table id, returning any store it replaced.
    pub fn add_table(&self, store: Arc<dyn PageStore>) -> Option<Arc<dyn PageStore>> {
        self.tables.write().insert(store.table_id(), store)
    }

    /// Store backing `table`.
    pub fn store(&self, table: TableId) -> Result<Arc<dyn PageStore>> {
        self.tables
            .read()
            .get(&table)
            .cloned()
            .ok_or(KestrelError::NoSuchTable(table))
    }
}
