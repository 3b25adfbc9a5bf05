#![forbid(unsafe_code)]

mod catalog;
mod options;
mod pool;

pub use catalog::Catalog;
pub use options::{BufferPoolOptions, ConfigError, DEFAULT_CACHE_PAGES};
pub use pool::{BufferPool, BufferPoolStats};
