use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of cached pages.
pub const DEFAULT_CACHE_PAGES: usize = 50;

/// Configuration for a [`super::BufferPool`].
///
/// Loadable from the `[buffer_pool]` table of a TOML file:
///
/// ```toml
/// [buffer_pool]
/// capacity = 128
/// eviction_seed = 7
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferPoolOptions {
    /// Maximum number of resident pages.
    pub capacity: usize,
    /// Seed for eviction victim selection; `None` seeds from entropy.
    pub eviction_seed: Option<u64>,
}

impl Default for BufferPoolOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_PAGES,
            eviction_seed: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    buffer_pool: BufferPoolOptions,
}

/// Errors raised while loading or validating [`BufferPoolOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config text is not valid TOML for these options.
    #[error("failed to parse config: {source}")]
    Parse {
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// The pool must be able to hold at least one page.
    #[error("buffer pool capacity must be at least 1")]
    ZeroCapacity,
}

impl BufferPoolOptions {
    /// Sets the page capacity.
    pub fn capacity(mut self, pages: usize) -> Self {
        self.capacity = pages;
        self
    }

    /// Fixes the eviction seed so victim choice is reproducible.
    pub fn eviction_seed(mut self, seed: u64) -> Self {
        self.eviction_seed = Some(seed);
        self
    }

    /// Checks the options are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Parses options from TOML text; a missing table yields defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|source| ConfigError::Parse { source })?;
        raw.buffer_pool.validate()?;
        Ok(raw.buffer_pool)
    }

    /// Reads options from the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
