//! Kernel configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! [cache]
//! meta_ttl_secs = 3600
//! sort_debounce_secs = 60
//!
//! [tasks]
//! upload_workers = 3
//! copy_workers = 3
//! max_done = 100
//!
//! [[storages]]
//! mount_path = "/scratch"
//! driver = "memory"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use strata_types::Storage;

use crate::vfs::{FsError, FsResult};

/// Cache tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a metadata lookup stays cached.
    pub meta_ttl_secs: u64,
    /// Seconds to wait before re-sorting a patched listing.
    pub sort_debounce_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            meta_ttl_secs: 3600,
            sort_debounce_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn meta_ttl(&self) -> Duration {
        Duration::from_secs(self.meta_ttl_secs)
    }

    pub fn sort_debounce(&self) -> Duration {
        Duration::from_secs(self.sort_debounce_secs)
    }
}

/// Background task limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub upload_workers: usize,
    pub copy_workers: usize,
    /// Finished tasks kept per manager.
    pub max_done: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            upload_workers: 3,
            copy_workers: 3,
            max_done: 100,
        }
    }
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub cache: CacheConfig,
    pub tasks: TaskConfig,
    /// Storages mounted at bootstrap, in order.
    pub storages: Vec<Storage>,
}

impl KernelConfig {
    pub fn from_toml_str(text: &str) -> FsResult<Self> {
        toml::from_str(text).map_err(|e| FsError::config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> FsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FsError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
