//! The kernel: storage lifecycle plus every operation over virtual paths.
//!
//! A [`Kernel`] owns one mount table, one dispatcher (with its caches), the
//! metadata cache, and the upload and copy task managers. Nothing is
//! global, so independent kernels can coexist in one process.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strata_types::path::{self, fix_and_clean_path, standardize_mount_path};
use strata_types::{LinkArgs, ListArgs, Meta, Obj, Storage, StorageStatus, wrap_obj_names};

use crate::cache::FsCache;
use crate::config::KernelConfig;
use crate::meta::{MemoryMetaStore, MetaCache, MetaStore};
use crate::op::Dispatcher;
use crate::registry::{DriverConstructor, DriverRegistry};
use crate::task::TaskManager;
use crate::transfer::Transfer;
use crate::vfs::{
    FileStream, FsError, FsResult, Link, MountTable, MountedStorage, UpdateProgress, no_progress,
};

pub struct Kernel {
    registry: DriverRegistry,
    mounts: Arc<MountTable>,
    ops: Arc<Dispatcher>,
    metas: MetaCache,
    uploads: TaskManager,
    copies: TaskManager,
    transfer: Transfer,
    records: DashMap<u64, Storage>,
    next_storage_id: AtomicU64,
    /// Serializes storage lifecycle changes so mount-path checks and
    /// record inserts happen as one step.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Kernel {
    /// A kernel with an in-memory metadata store.
    pub fn new(registry: DriverRegistry, config: &KernelConfig) -> Self {
        Self::with_meta_store(registry, config, Arc::new(MemoryMetaStore::new()))
    }

    pub fn with_meta_store(
        registry: DriverRegistry,
        config: &KernelConfig,
        store: Arc<dyn MetaStore>,
    ) -> Self {
        let ops = Arc::new(Dispatcher::new(FsCache::new(config.cache.sort_debounce())));
        let tasks = &config.tasks;
        let uploads = TaskManager::new("upload", tasks.upload_workers, tasks.max_done);
        let copies = TaskManager::new("copy", tasks.copy_workers, tasks.max_done);
        Self {
            registry,
            mounts: Arc::new(MountTable::new()),
            transfer: Transfer::new(Arc::clone(&ops), copies.clone()),
            ops,
            metas: MetaCache::new(store, config.cache.meta_ttl()),
            uploads,
            copies,
            records: DashMap::new(),
            next_storage_id: AtomicU64::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Mount the storages listed in a configuration.
    ///
    /// Keeps going past failures; every failure is logged and returned.
    pub async fn bootstrap(&self, config: &KernelConfig) -> Vec<FsError> {
        let mut failures = Vec::new();
        for storage in &config.storages {
            let mount_path = storage.mount_path.clone();
            if let Err(e) = self.load_storage(storage.clone()).await {
                warn!(mount_path = %mount_path, error = %e, "failed to load storage");
                failures.push(e);
            }
        }
        info!(mounted = self.mounts.len(), failed = failures.len(), "bootstrap complete");
        failures
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.ops
    }

    pub fn metas(&self) -> &MetaCache {
        &self.metas
    }

    pub fn uploads(&self) -> &TaskManager {
        &self.uploads
    }

    pub fn copies(&self) -> &TaskManager {
        &self.copies
    }

    // ========================================================================
    // Storage lifecycle
    // ========================================================================

    /// Create and mount a new storage, returning its id.
    ///
    /// A driver that fails to initialise stays mounted with an error
    /// status; the init error is returned.
    pub async fn create_storage(&self, mut storage: Storage) -> FsResult<u64> {
        let _lifecycle = self.lifecycle.lock().await;
        storage.mount_path = standardize_mount_path(&storage.mount_path)?;
        self.ensure_mount_path_free(&storage.mount_path, None)?;
        let constructor = self.registry.constructor(&storage.driver)?;

        storage.id = self.next_storage_id.fetch_add(1, Ordering::Relaxed) + 1;
        storage.modified = SystemTime::now();
        let id = storage.id;
        info!(id, mount_path = %storage.mount_path, driver = %storage.driver, "creating storage");
        self.mount_record(storage, constructor).await?;
        Ok(id)
    }

    /// Mount a stored record, keeping its id when it has one.
    pub async fn load_storage(&self, mut storage: Storage) -> FsResult<u64> {
        let _lifecycle = self.lifecycle.lock().await;
        storage.mount_path = standardize_mount_path(&storage.mount_path)?;
        if storage.id == 0 {
            storage.id = self.next_storage_id.fetch_add(1, Ordering::Relaxed) + 1;
        } else {
            if self.records.contains_key(&storage.id) {
                return Err(FsError::config(format!("duplicate storage id {}", storage.id)));
            }
            self.next_storage_id.fetch_max(storage.id, Ordering::Relaxed);
        }
        self.ensure_mount_path_free(&storage.mount_path, None)?;
        let constructor = self.registry.constructor(&storage.driver)?;
        if storage.modified == SystemTime::UNIX_EPOCH {
            storage.modified = SystemTime::now();
        }
        let id = storage.id;
        self.mount_record(storage, constructor).await?;
        Ok(id)
    }

    /// Replace a storage's configuration and remount it.
    ///
    /// The driver type cannot change. A new mount path moves the storage.
    pub async fn update_storage(&self, mut storage: Storage) -> FsResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let old = self.record(storage.id)?;
        if old.driver != storage.driver {
            return Err(FsError::config(format!(
                "cannot change driver of storage {} from {} to {}",
                storage.id, old.driver, storage.driver
            )));
        }
        storage.mount_path = standardize_mount_path(&storage.mount_path)?;
        self.ensure_mount_path_free(&storage.mount_path, Some(storage.id))?;
        let constructor = self.registry.constructor(&storage.driver)?;

        storage.modified = SystemTime::now();
        info!(id = storage.id, from = %old.mount_path, to = %storage.mount_path, "updating storage");
        self.unmount(&old.mount_path).await;
        self.mount_record(storage, constructor).await
    }

    /// Unmount a storage and forget its record.
    pub async fn delete_storage(&self, id: u64) -> FsResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let (_, old) = self
            .records
            .remove(&id)
            .ok_or(FsError::StorageNotFound(id))?;
        self.unmount(&old.mount_path).await;
        info!(id, mount_path = %old.mount_path, "deleted storage");
        Ok(())
    }

    pub async fn enable_storage(&self, id: u64) -> FsResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut storage = self.record(id)?;
        if !storage.disabled {
            return Ok(());
        }
        storage.disabled = false;
        let constructor = self.registry.constructor(&storage.driver)?;
        info!(id, mount_path = %storage.mount_path, "enabling storage");
        self.mount_record(storage, constructor).await
    }

    /// Drop a storage from routing while keeping its record.
    pub async fn disable_storage(&self, id: u64) -> FsResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut storage = self.record(id)?;
        if storage.disabled {
            return Ok(());
        }
        storage.disabled = true;
        storage.status = StorageStatus::Disabled;
        self.unmount(&storage.mount_path).await;
        info!(id, mount_path = %storage.mount_path, "disabled storage");
        self.records.insert(id, storage);
        Ok(())
    }

    pub fn get_storage_by_mount_path(&self, mount_path: &str) -> FsResult<Arc<MountedStorage>> {
        let mount_path = standardize_mount_path(mount_path)?;
        self.mounts
            .get(&mount_path)
            .ok_or_else(|| FsError::no_storage(mount_path))
    }

    /// Every storage record, sorted by `(order, mount_path)`.
    pub fn storages(&self) -> Vec<Storage> {
        let mut all: Vec<Storage> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.mount_path.cmp(&b.mount_path)));
        all
    }

    pub fn get_storage_and_actual_path(&self, path: &str) -> FsResult<(Arc<MountedStorage>, String)> {
        self.mounts.storage_and_actual_path(path)
    }

    fn record(&self, id: u64) -> FsResult<Storage> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(FsError::StorageNotFound(id))
    }

    fn ensure_mount_path_free(&self, mount_path: &str, owner: Option<u64>) -> FsResult<()> {
        let taken = self
            .records
            .iter()
            .any(|r| r.mount_path == mount_path && Some(r.id) != owner);
        if taken {
            Err(FsError::MountPathTaken(mount_path.to_string()))
        } else {
            Ok(())
        }
    }

    /// Record `storage` and, unless disabled, build, init, and mount its
    /// driver.
    async fn mount_record(&self, mut storage: Storage, constructor: DriverConstructor) -> FsResult<()> {
        if storage.disabled {
            storage.status = StorageStatus::Disabled;
            debug!(mount_path = %storage.mount_path, "storage is disabled, not mounting");
            self.records.insert(storage.id, storage);
            return Ok(());
        }

        let mut driver = constructor();
        let result = driver.init(&storage).await;
        storage.status = match &result {
            Ok(()) => StorageStatus::Work,
            Err(e) => {
                warn!(mount_path = %storage.mount_path, error = %e, "storage init failed");
                StorageStatus::Error(e.to_string())
            }
        };
        self.records.insert(storage.id, storage.clone());

        let mount_path = storage.mount_path.clone();
        let mounted = Arc::new(MountedStorage::new(storage, Arc::from(driver)));
        if let Some(previous) = self.mounts.insert(Arc::clone(&mounted)) {
            self.retire(&previous).await;
        }
        info!(mount_path = %mount_path, driver = %mounted.config().name, status = %mounted.status(), "mounted storage");
        result.map_err(|e| e.wrap("init", mount_path))
    }

    async fn unmount(&self, mount_path: &str) {
        if let Some(storage) = self.mounts.remove(mount_path) {
            self.retire(&storage).await;
            info!(mount_path = %mount_path, "unmounted storage");
        }
    }

    async fn retire(&self, storage: &MountedStorage) {
        self.ops.cache().clear_storage(storage);
        if let Err(e) = storage.driver().teardown().await {
            warn!(mount_path = %storage.mount_path(), error = %e, "driver teardown failed");
        }
    }

    // ========================================================================
    // Operations on virtual paths
    // ========================================================================

    /// List a virtual directory, merged with mount points beneath it.
    pub async fn list(&self, path: &str, args: &ListArgs) -> FsResult<Vec<Obj>> {
        let path = fix_and_clean_path(path);
        let virtual_files = self.mounts.virtual_files(&path);

        let mut objs = match self.mounts.storage_and_actual_path(&path) {
            Ok((storage, actual)) => match self.ops.list(&storage, &actual, args).await {
                Ok(objs) => objs,
                Err(e) if !virtual_files.is_empty() => {
                    warn!(path = %path, error = %e, "listing failed, showing mount points only");
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
            Err(_) if !virtual_files.is_empty() || path == "/" => Vec::new(),
            Err(e) => return Err(e),
        };

        let real: HashSet<String> = objs.iter().map(|o| o.name.clone()).collect();
        objs.extend(virtual_files.into_iter().filter(|v| !real.contains(&v.name)));
        wrap_obj_names(&mut objs);
        Ok(objs)
    }

    /// Look up one object by virtual path.
    pub async fn get(&self, path: &str) -> FsResult<Obj> {
        let path = fix_and_clean_path(path);
        if path != "/" {
            let (dir, name) = path::split(&path);
            if let Some(obj) = self
                .mounts
                .virtual_files(&dir)
                .into_iter()
                .find(|o| o.name == name)
            {
                return Ok(obj.with_path(path));
            }
        }
        match self.mounts.storage_and_actual_path(&path) {
            Ok((storage, actual)) => self.ops.get(&storage, &actual).await,
            Err(_) if path == "/" => Ok(Obj::dir("root").with_path("/")),
            Err(e) => Err(e),
        }
    }

    pub async fn link(&self, path: &str, args: &LinkArgs) -> FsResult<(Link, Obj)> {
        let (storage, actual) = self.mounts.storage_and_actual_path(path)?;
        self.ops.link(&storage, &actual, args).await
    }

    pub async fn make_dir(&self, path: &str, lazy: bool) -> FsResult<()> {
        let (storage, actual) = self.mounts.storage_and_actual_path(path)?;
        self.ops.make_dir(&storage, &actual, lazy).await
    }

    /// Move within one storage. Moves across storages are refused.
    pub async fn move_obj(&self, src: &str, dst_dir: &str, lazy: bool) -> FsResult<()> {
        let (src_storage, src_actual) = self.mounts.storage_and_actual_path(src)?;
        let (dst_storage, dst_actual) = self.mounts.storage_and_actual_path(dst_dir)?;
        if !Arc::ptr_eq(&src_storage, &dst_storage) {
            return Err(FsError::CrossStorage {
                src: fix_and_clean_path(src),
                dst: fix_and_clean_path(dst_dir),
            });
        }
        self.ops.move_obj(&src_storage, &src_actual, &dst_actual, lazy).await
    }

    pub async fn rename(&self, src: &str, new_name: &str, lazy: bool) -> FsResult<()> {
        let (storage, actual) = self.mounts.storage_and_actual_path(src)?;
        self.ops.rename(&storage, &actual, new_name, lazy).await
    }

    /// Copy `src` into `dst_dir`.
    ///
    /// Within one storage the driver copies directly and `None` is
    /// returned. Across storages a copy task is queued and its id returned.
    pub async fn copy(&self, src: &str, dst_dir: &str, lazy: bool) -> FsResult<Option<u64>> {
        let (src_storage, src_actual) = self.mounts.storage_and_actual_path(src)?;
        let (dst_storage, dst_actual) = self.mounts.storage_and_actual_path(dst_dir)?;
        if Arc::ptr_eq(&src_storage, &dst_storage) {
            self.ops.copy(&src_storage, &src_actual, &dst_actual, lazy).await?;
            return Ok(None);
        }
        let id = self
            .transfer
            .submit(src_storage, src_actual, dst_storage, dst_actual)?;
        Ok(Some(id))
    }

    pub async fn remove(&self, path: &str) -> FsResult<()> {
        let (storage, actual) = self.mounts.storage_and_actual_path(path)?;
        self.ops.remove(&storage, &actual).await
    }

    /// Upload into `dst_dir` and wait for it to finish.
    pub async fn put(
        &self,
        dst_dir: &str,
        stream: FileStream,
        progress: Option<UpdateProgress>,
        lazy: bool,
    ) -> FsResult<()> {
        let (storage, actual) = self.mounts.storage_and_actual_path(dst_dir)?;
        let progress = progress.unwrap_or_else(no_progress);
        self.ops
            .put(&storage, &actual, stream, progress, lazy, &CancellationToken::new())
            .await
    }

    /// Queue an upload on the upload task manager, returning its task id.
    pub fn put_as_task(&self, dst_dir: &str, stream: FileStream) -> FsResult<u64> {
        let (storage, actual) = self.mounts.storage_and_actual_path(dst_dir)?;
        let name = format!(
            "upload {} to [{}]({})",
            stream.name(),
            storage.mount_path(),
            actual
        );
        let ops = Arc::clone(&self.ops);
        self.uploads.submit(name, move |ctx| {
            async move {
                ops.put(&storage, &actual, stream, ctx.progress_fn(), false, ctx.token())
                    .await
            }
            .boxed()
        })
    }

    pub async fn get_nearest_meta(&self, path: &str) -> FsResult<Meta> {
        self.metas.get_nearest_meta(path).await
    }

    /// Cancel all tasks and timers and tear down every driver.
    pub async fn shutdown(&self) {
        self.uploads.shutdown();
        self.copies.shutdown();
        self.ops.cache().shutdown();
        for storage in self.mounts.storages() {
            self.unmount(storage.mount_path()).await;
        }
        info!("kernel shut down");
    }
}
