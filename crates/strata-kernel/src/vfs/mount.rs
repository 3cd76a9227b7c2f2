//! Mount table with longest-prefix routing and replica balancing.
//!
//! Routes a virtual path to the storage mounted at its most specific
//! prefix. Storages whose mount path ends in `.balance` (optionally followed
//! by a suffix) are replicas of the storage at the stripped path; requests
//! landing on such a group rotate across its members.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use strata_types::path::{self, actual_mount_path, fix_and_clean_path, is_balance};
use strata_types::{Obj, Storage, StorageStatus};

use super::driver::{Capabilities, Driver, DriverConfig, Root};
use super::error::{FsError, FsResult};

/// A storage record bound to its live driver instance.
///
/// Capabilities and config are read from the driver once, at mount time.
pub struct MountedStorage {
    mount_path: String,
    storage: RwLock<Storage>,
    driver: Arc<dyn Driver>,
    config: DriverConfig,
    caps: Capabilities,
    root: Root,
}

impl fmt::Debug for MountedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedStorage")
            .field("mount_path", &self.mount_path)
            .field("driver", &self.config.name)
            .field("caps", &self.caps)
            .finish()
    }
}

impl MountedStorage {
    pub fn new(storage: Storage, driver: Arc<dyn Driver>) -> Self {
        Self {
            mount_path: storage.mount_path.clone(),
            config: driver.config(),
            caps: driver.capabilities(),
            root: driver.root(),
            storage: RwLock::new(storage),
            driver,
        }
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    /// Mount path with any balance marker stripped.
    pub fn actual_mount_path(&self) -> &str {
        actual_mount_path(&self.mount_path)
    }

    /// Snapshot of the storage record.
    pub fn storage(&self) -> Storage {
        self.storage.read().clone()
    }

    pub fn id(&self) -> u64 {
        self.storage.read().id
    }

    pub fn order(&self) -> i32 {
        self.storage.read().order
    }

    pub fn modified(&self) -> SystemTime {
        self.storage.read().modified
    }

    pub fn status(&self) -> StorageStatus {
        self.storage.read().status.clone()
    }

    pub fn set_status(&self, status: StorageStatus) {
        self.storage.write().status = status;
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Fail fast when the driver asks for status checks and init failed.
    pub fn check_ready(&self) -> FsResult<()> {
        if !self.config.check_status {
            return Ok(());
        }
        let status = self.status();
        if status.is_work() {
            Ok(())
        } else {
            Err(FsError::StorageNotReady {
                mount_path: self.mount_path.clone(),
                status: status.to_string(),
            })
        }
    }

    /// Translate a virtual path under this mount into the backend path.
    pub fn actual_path(&self, virtual_path: &str) -> String {
        let clean = fix_and_clean_path(virtual_path);
        let prefix = self.actual_mount_path();
        let rest = if prefix == "/" {
            clean.as_str()
        } else {
            clean.strip_prefix(prefix).unwrap_or(clean.as_str())
        };
        let rel = fix_and_clean_path(rest);
        match &self.root {
            Root::Path(root) if !root.is_empty() && root != "/" => path::join(root, &rel),
            _ => rel,
        }
    }
}

/// Routes virtual paths to mounted storages.
///
/// At most one storage per mount path. Lookups are lock-free reads over a
/// concurrent map; balance counters live alongside, keyed by the group's
/// actual mount path.
pub struct MountTable {
    storages: DashMap<String, Arc<MountedStorage>>,
    balance: DashMap<String, usize>,
}

impl fmt::Debug for MountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.storages.len())
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    /// Create a new empty mount table.
    pub fn new() -> Self {
        Self {
            storages: DashMap::new(),
            balance: DashMap::new(),
        }
    }

    /// Insert a storage, replacing and returning any previous occupant.
    pub fn insert(&self, storage: Arc<MountedStorage>) -> Option<Arc<MountedStorage>> {
        self.storages
            .insert(storage.mount_path().to_string(), storage)
    }

    pub fn remove(&self, mount_path: &str) -> Option<Arc<MountedStorage>> {
        let removed = self.storages.remove(mount_path).map(|(_, s)| s);
        if removed.is_some() {
            self.balance.remove(actual_mount_path(mount_path));
        }
        removed
    }

    pub fn get(&self, mount_path: &str) -> Option<Arc<MountedStorage>> {
        self.storages.get(mount_path).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, mount_path: &str) -> bool {
        self.storages.contains_key(mount_path)
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// All storages sorted by `(order, mount_path)`.
    pub fn storages(&self) -> Vec<Arc<MountedStorage>> {
        let mut all: Vec<_> = self.storages.iter().map(|s| Arc::clone(s.value())).collect();
        all.sort_by(|a, b| {
            a.order()
                .cmp(&b.order())
                .then_with(|| a.mount_path().cmp(b.mount_path()))
        });
        all
    }

    /// Storages whose mount path is the deepest prefix of `path`.
    ///
    /// Balance replicas share depth with their primary, so a group comes
    /// back together. The result is sorted by mount path, primary first.
    pub fn storages_by_path(&self, path: &str) -> Vec<Arc<MountedStorage>> {
        let target = fix_and_clean_path(path);
        let mut best_depth = 0;
        let mut matches: Vec<Arc<MountedStorage>> = Vec::new();

        for entry in self.storages.iter() {
            let storage = entry.value();
            let mount = storage.actual_mount_path();
            let is_match = mount == "/"
                || target == mount
                || target
                    .strip_prefix(mount)
                    .is_some_and(|rest| rest.starts_with('/'));
            if !is_match {
                continue;
            }
            let depth = path::depth(mount);
            if matches.is_empty() || depth > best_depth {
                best_depth = depth;
                matches.clear();
                matches.push(Arc::clone(storage));
            } else if depth == best_depth {
                matches.push(Arc::clone(storage));
            }
        }

        matches.sort_by(|a, b| a.mount_path().cmp(b.mount_path()));
        matches
    }

    /// Pick one storage for `path`, rotating across balance replicas.
    ///
    /// The first request for a group returns its primary and records index
    /// 0; later requests advance the counter modulo the group size.
    pub fn balanced_storage(&self, path: &str) -> FsResult<Arc<MountedStorage>> {
        let mut group = self.storages_by_path(path);
        match group.len() {
            0 => Err(FsError::no_storage(fix_and_clean_path(path))),
            1 => Ok(group.swap_remove(0)),
            n => {
                let key = group[0].actual_mount_path().to_string();
                let idx = match self.balance.entry(key) {
                    Entry::Occupied(mut e) => {
                        let next = (*e.get() + 1) % n;
                        *e.get_mut() = next;
                        next
                    }
                    Entry::Vacant(e) => {
                        e.insert(0);
                        0
                    }
                };
                Ok(group.swap_remove(idx))
            }
        }
    }

    /// Resolve a virtual path to a storage and the path inside it.
    pub fn storage_and_actual_path(&self, raw: &str) -> FsResult<(Arc<MountedStorage>, String)> {
        let path = fix_and_clean_path(raw);
        let storage = self.balanced_storage(&path)?;
        let actual = storage.actual_path(&path);
        Ok((storage, actual))
    }

    /// Synthetic directory entries for mount points beneath `prefix`.
    ///
    /// For every non-replica mount strictly below `prefix`, the next path
    /// segment becomes a directory entry. Earlier storages in
    /// `(order, mount_path)` order win name collisions.
    pub fn virtual_files(&self, prefix: &str) -> Vec<Obj> {
        let prefix = fix_and_clean_path(prefix);
        let prefix = if prefix == "/" {
            prefix
        } else {
            format!("{prefix}/")
        };

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for storage in self.storages() {
            let mount = storage.mount_path();
            if is_balance(mount) {
                continue;
            }
            let Some(rest) = mount.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let Some(name) = rest.split('/').next().filter(|n| !n.is_empty()) else {
                continue;
            };
            if seen.insert(name.to_string()) {
                files.push(Obj::dir(name).with_modified(storage.modified()));
            }
        }
        files
    }
}
