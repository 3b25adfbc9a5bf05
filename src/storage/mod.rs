//! Page objects and the page stores that back tables.

mod heap;
mod page;
mod store;

pub use heap::{HeapFile, SlotLayout};
pub use page::{Page, PageHandle};
pub use store::{PageStore, RecordId, Tuple};
