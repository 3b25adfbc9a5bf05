//! Page locks, the wait-for graph and the blocking lock manager.

mod graph;
mod lock;
mod manager;

pub use graph::WaitForGraph;
pub use lock::Lock;
pub use manager::{LockManager, LockTableSnapshot};
