//! Core configuration.
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! threads = 8
//! max_cache_size_mb = 2048
//! cache_enabled = true
//! ```

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default frame cache budget in megabytes.
pub const DEFAULT_MAX_CACHE_SIZE_MB: usize = 1024;

/// Settings used to build a [`Core`](crate::execution::engine::Core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Worker threads. `None` uses the available parallelism.
    pub threads: Option<usize>,
    /// Frame cache budget in megabytes.
    pub max_cache_size_mb: usize,
    /// Whether produced frames are cached at all.
    pub cache_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            threads: None,
            max_cache_size_mb: DEFAULT_MAX_CACHE_SIZE_MB,
            cache_enabled: true,
        }
    }
}

impl CoreConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_toml_str(&source)
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the cache budget.
    pub fn with_max_cache_size_mb(mut self, mb: usize) -> Self {
        self.max_cache_size_mb = mb;
        self
    }

    /// Enable or disable the frame cache.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Thread count after applying the default.
    pub fn resolved_threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Reject settings no core can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }
        Ok(())
    }
}
