//! Operation dispatcher.
//!
//! Every operation here takes a mounted storage plus a path *inside* it
//! (see [`MountTable::storage_and_actual_path`](crate::vfs::MountTable::storage_and_actual_path)).
//! The dispatcher consults the listing and link caches, coalesces
//! concurrent backend calls, invokes the driver through its declared
//! capabilities, and keeps the caches coherent afterwards.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use strata_types::path::{self, fix_and_clean_path};
use strata_types::{LinkArgs, ListArgs, Obj, extract_folder, sort_objs};

use crate::cache::{self, FsCache, MemoCache};
use crate::vfs::{
    FileStream, FsError, FsResult, Link, MountedStorage, OpShape, Root, UpdateProgress,
};

/// Suffix given to a file moved aside while its replacement uploads.
pub const TO_DELETE_SUFFIX: &str = ".to_delete";

/// Dispatches operations to drivers through the caches.
pub struct Dispatcher {
    cache: FsCache,
    mkdir_flight: MemoCache<String, ()>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(FsCache::default())
    }
}

impl Dispatcher {
    pub fn new(cache: FsCache) -> Self {
        Self {
            cache,
            mkdir_flight: MemoCache::new(),
        }
    }

    pub fn cache(&self) -> &FsCache {
        &self.cache
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// List a directory.
    ///
    /// Served from cache unless `args.refresh` is set or the driver opts out
    /// of caching. Misses are coalesced per key; driver results are sorted
    /// (for local-sort drivers) and folder-extracted before being stored.
    #[instrument(skip(self, storage, args), fields(mount = %storage.mount_path()), name = "op.list")]
    pub async fn list(
        &self,
        storage: &MountedStorage,
        path: &str,
        args: &ListArgs,
    ) -> FsResult<Vec<Obj>> {
        storage.check_ready()?;
        let path = fix_and_clean_path(path);
        let key = cache::key(storage, &path);
        let no_cache = storage.config().no_cache;

        if !args.refresh && !no_cache {
            if let Some(objs) = self.cache.lists().get(&key) {
                trace!(key = %key, "list cache hit");
                return Ok(objs);
            }
        }

        let dir = self
            .get(storage, &path)
            .await
            .map_err(|e| e.wrap("list", path.clone()))?;
        if !dir.is_dir {
            return Err(FsError::not_a_folder(path));
        }

        let load = || async {
            let mut objs = storage
                .driver()
                .list(&dir, args)
                .await
                .map_err(|e| e.wrap("list", path.clone()))?;
            let sort = storage.storage().sort;
            if storage.config().local_sort {
                sort_objs(&mut objs, sort.order_by, sort.order_direction);
            }
            extract_folder(&mut objs, sort.extract_folder);
            if !no_cache {
                self.cache.set_list(storage, &path, objs.clone());
            }
            debug!(path = %path, entries = objs.len(), "listed");
            Ok(objs)
        };

        if no_cache {
            load().await
        } else {
            self.cache.lists().single_flight(key, load).await
        }
    }

    /// Look up one object.
    ///
    /// Tries the driver's direct lookup when it has one, synthesizes the
    /// root from the driver's declared root identity, and otherwise lists
    /// the parent and picks the entry by name.
    pub fn get<'a>(
        &'a self,
        storage: &'a MountedStorage,
        path: &'a str,
    ) -> BoxFuture<'a, FsResult<Obj>> {
        async move {
            storage.check_ready()?;
            let path = fix_and_clean_path(path);

            if storage.capabilities().get {
                match storage.driver().get(&path).await {
                    Ok(mut obj) => {
                        if obj.path.is_empty() {
                            obj.path = path;
                        }
                        return Ok(obj);
                    }
                    Err(e) => trace!(path = %path, error = %e, "direct get failed, listing parent"),
                }
            }

            if let Some(root) = self.root_obj(storage, &path).await? {
                return Ok(root);
            }

            let (dir, name) = path::split(&path);
            let objs = self
                .list(storage, &dir, &ListArgs::default())
                .await
                .map_err(|e| e.wrap("get", path.clone()))?;
            match objs.into_iter().find(|o| o.name == name) {
                Some(mut obj) => {
                    if obj.path.is_empty() {
                        obj.path = path;
                    }
                    Ok(obj)
                }
                None => Err(FsError::object_not_found(path)),
            }
        }
        .boxed()
    }

    async fn root_obj(&self, storage: &MountedStorage, path: &str) -> FsResult<Option<Obj>> {
        let root = match storage.root() {
            Root::Path(root) if path::is_root(path, root) => Obj::dir("root").with_path(root.as_str()),
            Root::Id(id) if path == "/" => Obj::dir("root").with_id(id.as_str()).with_path("/"),
            Root::Custom if path == "/" => {
                let mut obj = storage.driver().get_root().await?;
                if obj.path.is_empty() {
                    obj.path = "/".to_string();
                }
                return Ok(Some(obj));
            }
            Root::None if path == "/" => Obj::dir("root").with_path("/"),
            _ => return Ok(None),
        };
        Ok(Some(root.with_modified(storage.modified())))
    }

    /// Resolve a download link for a file.
    ///
    /// Links that carry an expiration are cached for that long, keyed by
    /// client address when the link is address-bound.
    #[instrument(skip(self, storage, args), fields(mount = %storage.mount_path()), name = "op.link")]
    pub async fn link(
        &self,
        storage: &MountedStorage,
        path: &str,
        args: &LinkArgs,
    ) -> FsResult<(Link, Obj)> {
        storage.check_ready()?;
        let path = fix_and_clean_path(path);
        let file = self
            .get(storage, &path)
            .await
            .map_err(|e| e.wrap("link", path.clone()))?;
        if file.is_dir {
            return Err(FsError::not_a_file(path));
        }

        let plain = FsCache::link_key(storage, &path, None);
        let scoped = FsCache::link_key(storage, &path, Some(&args.ip));
        for key in [&plain, &scoped] {
            if let Some(link) = self.cache.links().get(key) {
                trace!(key = %key, "link cache hit");
                return Ok((link, file));
            }
        }

        let link = self
            .cache
            .links()
            .single_flight(scoped, || async {
                let link = storage
                    .driver()
                    .link(&file, args)
                    .await
                    .map_err(|e| e.wrap("link", path.clone()))?;
                if let Some(expiration) = link.expiration {
                    let ip = link.ip_cache_key.then_some(args.ip.as_str());
                    let key = FsCache::link_key(storage, &path, ip);
                    self.cache.links().set(key, link.clone(), Some(expiration));
                }
                Ok(link)
            })
            .await?;
        Ok((link, file))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create a directory and any missing ancestors.
    ///
    /// Idempotent for existing directories; fails with
    /// [`FsError::FileExists`] when a file occupies the path. `lazy` skips
    /// invalidating the parent listing when the driver does not report the
    /// new directory; ancestors created on the way are always made visible.
    pub fn make_dir<'a>(
        &'a self,
        storage: &'a MountedStorage,
        path: &'a str,
        lazy: bool,
    ) -> BoxFuture<'a, FsResult<()>> {
        async move {
            storage.check_ready()?;
            let path = fix_and_clean_path(path);
            let key = cache::key(storage, &path);
            self.mkdir_flight
                .single_flight(key, || async {
                    match self.get(storage, &path).await {
                        Ok(obj) if obj.is_dir => return Ok(()),
                        Ok(_) => return Err(FsError::file_exists(path.clone())),
                        Err(e) if e.is_object_not_found() => {}
                        Err(e) => return Err(e.wrap("make_dir", path.clone())),
                    }

                    let shape = storage.capabilities().make_dir;
                    if !shape.is_supported() {
                        return Err(FsError::NotImplemented("make_dir"));
                    }
                    let (parent, name) = path::split(&path);
                    self.make_dir(storage, &parent, false).await?;
                    let parent_dir = self
                        .get(storage, &parent)
                        .await
                        .map_err(|e| e.wrap("make_dir", path.clone()))?;
                    let made = storage
                        .driver()
                        .make_dir(&parent_dir, &name)
                        .await
                        .map_err(|e| e.wrap("make_dir", path.clone()))?;
                    debug!(path = %path, "made dir");
                    self.record_result(storage, &parent, shape, made, lazy);
                    Ok(())
                })
                .await
        }
        .boxed()
    }

    /// Move `src` into the directory `dst_dir` on the same storage.
    #[instrument(skip(self, storage), fields(mount = %storage.mount_path()), name = "op.move")]
    pub async fn move_obj(
        &self,
        storage: &MountedStorage,
        src: &str,
        dst_dir: &str,
        lazy: bool,
    ) -> FsResult<()> {
        storage.check_ready()?;
        let shape = storage.capabilities().move_obj;
        if !shape.is_supported() {
            return Err(FsError::NotImplemented("move"));
        }
        let src = fix_and_clean_path(src);
        let dst_dir = fix_and_clean_path(dst_dir);
        if path::is_sub_path(&src, &dst_dir) {
            return Err(FsError::invalid_path(format!("cannot move {src} into {dst_dir}")));
        }

        let src_obj = self
            .get(storage, &src)
            .await
            .map_err(|e| e.wrap("move", src.clone()))?;
        let dst = self.target_dir(storage, &dst_dir, "move").await?;
        let moved = storage
            .driver()
            .move_obj(&src_obj, &dst)
            .await
            .map_err(|e| e.wrap("move", src.clone()))?;

        self.cache.delete_entry(storage, &path::parent(&src), &src_obj);
        self.cache.del_link(storage, &src);
        self.record_result(storage, &dst_dir, shape, moved, lazy);
        Ok(())
    }

    /// Rename `src` in place.
    #[instrument(skip(self, storage), fields(mount = %storage.mount_path()), name = "op.rename")]
    pub async fn rename(
        &self,
        storage: &MountedStorage,
        src: &str,
        new_name: &str,
        lazy: bool,
    ) -> FsResult<()> {
        storage.check_ready()?;
        let shape = storage.capabilities().rename;
        if !shape.is_supported() {
            return Err(FsError::NotImplemented("rename"));
        }
        validate_name(new_name)?;
        let src = fix_and_clean_path(src);
        let src_obj = self
            .get(storage, &src)
            .await
            .map_err(|e| e.wrap("rename", src.clone()))?;
        if src_obj.name == new_name {
            return Ok(());
        }

        let renamed = storage
            .driver()
            .rename(&src_obj, new_name)
            .await
            .map_err(|e| e.wrap("rename", src.clone()))?;

        let dir = path::parent(&src);
        match (shape, renamed) {
            (OpShape::WithObj, Some(obj)) => {
                self.cache.update_entry(storage, &dir, &src_obj.name, obj);
                if src_obj.is_dir {
                    self.cache.clear(storage, &src);
                }
            }
            _ if !lazy => self.cache.clear(storage, &dir),
            _ => {}
        }
        self.cache.del_link(storage, &src);
        Ok(())
    }

    /// Copy `src` into the directory `dst_dir` on the same storage.
    #[instrument(skip(self, storage), fields(mount = %storage.mount_path()), name = "op.copy")]
    pub async fn copy(
        &self,
        storage: &MountedStorage,
        src: &str,
        dst_dir: &str,
        lazy: bool,
    ) -> FsResult<()> {
        storage.check_ready()?;
        let shape = storage.capabilities().copy;
        if !shape.is_supported() {
            return Err(FsError::NotImplemented("copy"));
        }
        let src = fix_and_clean_path(src);
        let dst_dir = fix_and_clean_path(dst_dir);

        let src_obj = self
            .get(storage, &src)
            .await
            .map_err(|e| e.wrap("copy", src.clone()))?;
        let dst = self.target_dir(storage, &dst_dir, "copy").await?;
        let copied = storage
            .driver()
            .copy(&src_obj, &dst)
            .await
            .map_err(|e| e.wrap("copy", src.clone()))?;
        self.record_result(storage, &dst_dir, shape, copied, lazy);
        Ok(())
    }

    /// Remove an object. Removing something already gone succeeds.
    #[instrument(skip(self, storage), fields(mount = %storage.mount_path()), name = "op.remove")]
    pub async fn remove(&self, storage: &MountedStorage, path: &str) -> FsResult<()> {
        storage.check_ready()?;
        if !storage.capabilities().remove {
            return Err(FsError::NotImplemented("remove"));
        }
        let path = fix_and_clean_path(path);
        if self.root_obj(storage, &path).await?.is_some() {
            return Err(FsError::invalid_path("cannot remove the storage root"));
        }

        let obj = match self.get(storage, &path).await {
            Ok(obj) => obj,
            Err(e) if e.is_object_not_found() => {
                debug!(path = %path, "remove: already gone");
                return Ok(());
            }
            Err(e) => return Err(e.wrap("remove", path)),
        };
        storage
            .driver()
            .remove(&obj)
            .await
            .map_err(|e| e.wrap("remove", path.clone()))?;

        self.cache.delete_entry(storage, &path::parent(&path), &obj);
        self.cache.del_link(storage, &path);
        Ok(())
    }

    /// Upload a stream into `dst_dir`.
    ///
    /// An existing empty file is removed first. Drivers that cannot
    /// overwrite get the existing file renamed to `<name>.to_delete`; it is
    /// removed after a successful upload and renamed back if the upload
    /// fails or is cancelled.
    #[instrument(
        skip(self, storage, stream, progress, cancel),
        fields(mount = %storage.mount_path(), file = %stream.name()),
        name = "op.put"
    )]
    pub async fn put(
        &self,
        storage: &MountedStorage,
        dst_dir: &str,
        mut stream: FileStream,
        progress: UpdateProgress,
        lazy: bool,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        storage.check_ready()?;
        let shape = storage.capabilities().put;
        if !shape.is_supported() {
            return Err(FsError::NotImplemented("put"));
        }
        if storage.config().no_upload {
            return Err(FsError::UploadNotSupported(storage.mount_path().to_string()));
        }
        let name = stream.name().to_string();
        validate_name(&name)?;
        let dst_dir = fix_and_clean_path(dst_dir);
        let dst_path = path::join(&dst_dir, &name);

        let mut aside: Option<String> = None;
        match self.get(storage, &dst_path).await {
            Ok(existing) if existing.is_dir => return Err(FsError::not_a_file(dst_path)),
            Ok(existing) if existing.size == 0 => {
                self.remove(storage, &dst_path)
                    .await
                    .map_err(|e| e.wrap("put", dst_path.clone()))?;
            }
            Ok(_) if storage.config().no_overwrite_upload => {
                let temp_name = format!("{name}{TO_DELETE_SUFFIX}");
                self.rename(storage, &dst_path, &temp_name, false)
                    .await
                    .map_err(|e| e.wrap("put", dst_path.clone()))?;
                aside = Some(path::join(&dst_dir, &temp_name));
            }
            Ok(existing) => stream.exist = Some(existing),
            Err(e) if e.is_object_not_found() => {}
            Err(e) => debug!(path = %dst_path, error = %e, "put: probe for existing file failed"),
        }

        match self.upload(storage, &dst_dir, stream, progress, cancel).await {
            Ok(uploaded) => {
                if let Some(temp) = aside {
                    if let Err(e) = self.remove(storage, &temp).await {
                        warn!(path = %temp, error = %e, "put: failed to remove replaced file");
                    }
                }
                self.cache.del_link(storage, &dst_path);
                self.record_result(storage, &dst_dir, shape, uploaded, lazy);
                debug!(path = %dst_path, "uploaded");
                Ok(())
            }
            Err(e) => {
                if let Some(temp) = aside {
                    if let Err(re) = self.rename(storage, &temp, &name, false).await {
                        error!(path = %temp, error = %re, "put: failed to restore replaced file");
                    }
                }
                Err(e.wrap("put", dst_path))
            }
        }
    }

    async fn upload(
        &self,
        storage: &MountedStorage,
        dst_dir: &str,
        stream: FileStream,
        progress: UpdateProgress,
        cancel: &CancellationToken,
    ) -> FsResult<Option<Obj>> {
        if cancel.is_cancelled() {
            return Err(FsError::Canceled);
        }
        self.make_dir(storage, dst_dir, false).await?;
        let parent = self.get(storage, dst_dir).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FsError::Canceled),
            res = storage.driver().put(&parent, stream, progress) => res,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn target_dir(&self, storage: &MountedStorage, dir: &str, op: &'static str) -> FsResult<Obj> {
        let obj = self
            .get(storage, dir)
            .await
            .map_err(|e| e.wrap(op, dir.to_string()))?;
        if obj.is_dir {
            Ok(obj)
        } else {
            Err(FsError::not_a_folder(dir))
        }
    }

    /// Bring the cached listing of `dir` in line with a mutation.
    fn record_result(
        &self,
        storage: &MountedStorage,
        dir: &str,
        shape: OpShape,
        obj: Option<Obj>,
        lazy: bool,
    ) {
        match (shape, obj) {
            (OpShape::WithObj, Some(obj)) => self.cache.add_entry(storage, dir, obj),
            _ if !lazy => self.cache.clear(storage, dir),
            _ => {}
        }
    }
}

fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        Err(FsError::invalid_path(format!("invalid name: {name:?}")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_types::{Storage, StorageStatus};
    use tokio::io::AsyncReadExt;

    use crate::vfs::{Driver, MemoryDriver, no_progress};

    async fn mounted(addition: serde_json::Value) -> MountedStorage {
        let storage = Storage::new("/m", "memory").with_addition(addition);
        let mut driver = MemoryDriver::new();
        driver.init(&storage).await.unwrap();
        MountedStorage::new(storage, Arc::new(driver))
    }

    fn names(objs: &[Obj]) -> Vec<&str> {
        objs.iter().map(|o| o.name.as_str()).collect()
    }

    async fn put_bytes(d: &Dispatcher, s: &MountedStorage, dir: &str, name: &str, data: &[u8]) {
        d.put(s, dir, FileStream::from_bytes(name, data.to_vec()), no_progress(), false, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_make_dir_recursive_and_idempotent() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({})).await;
        d.make_dir(&s, "/a/b/c", false).await.unwrap();
        d.make_dir(&s, "/a/b/c", false).await.unwrap();
        assert!(d.get(&s, "/a/b/c").await.unwrap().is_dir);

        put_bytes(&d, &s, "/a", "file", b"x").await;
        let err = d.make_dir(&s, "/a/file", false).await.unwrap_err();
        assert!(matches!(err, FsError::FileExists(_)));
    }

    #[tokio::test]
    async fn test_list_not_a_folder() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({})).await;
        put_bytes(&d, &s, "/", "f", b"x").await;
        let err = d.list(&s, "/f", &ListArgs::default()).await.unwrap_err();
        assert!(matches!(err, FsError::NotAFolder(_)));
    }

    #[tokio::test]
    async fn test_get_root_is_synthesized() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({})).await;
        let root = d.get(&s, "/").await.unwrap();
        assert!(root.is_dir);
        assert_eq!(root.name, "root");
        assert!(d.get(&s, "/missing").await.unwrap_err().is_object_not_found());
    }

    #[tokio::test]
    async fn test_plain_mutations_invalidate_unless_lazy() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({})).await;
        d.make_dir(&s, "/dst", false).await.unwrap();
        put_bytes(&d, &s, "/", "f", b"x").await;
        d.list(&s, "/dst", &ListArgs::default()).await.unwrap();
        assert!(d.cache().get_list(&s, "/dst").is_none(), "empty listing is not cached");

        put_bytes(&d, &s, "/dst", "seed", b"x").await;
        d.list(&s, "/dst", &ListArgs::default()).await.unwrap();
        assert!(d.cache().get_list(&s, "/dst").is_some());

        d.copy(&s, "/f", "/dst", true).await.unwrap();
        let cached = d.cache().get_list(&s, "/dst").unwrap();
        assert_eq!(names(&cached), ["seed"], "lazy copy leaves the stale listing");

        put_bytes(&d, &s, "/", "g", b"x").await;
        d.move_obj(&s, "/g", "/dst", false).await.unwrap();
        assert!(d.cache().get_list(&s, "/dst").is_none());
        let listed = d.list(&s, "/dst", &ListArgs::default()).await.unwrap();
        assert_eq!(names(&listed), ["f", "g", "seed"]);
        let root = d.list(&s, "/", &ListArgs::default()).await.unwrap();
        assert_eq!(names(&root), ["dst", "f"]);

        let err = d.move_obj(&s, "/dst", "/dst/seed", false).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_with_obj_mutations_patch_cache() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({"return_objects": true})).await;
        put_bytes(&d, &s, "/", "seed", b"x").await;
        d.list(&s, "/", &ListArgs::default()).await.unwrap();

        d.make_dir(&s, "/docs", false).await.unwrap();
        let cached = d.cache().get_list(&s, "/").unwrap();
        assert_eq!(names(&cached), ["docs", "seed"]);

        d.rename(&s, "/seed", "renamed", false).await.unwrap();
        let cached = d.cache().get_list(&s, "/").unwrap();
        assert_eq!(names(&cached), ["docs", "renamed"]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({})).await;
        put_bytes(&d, &s, "/", "f", b"x").await;
        d.remove(&s, "/f").await.unwrap();
        d.remove(&s, "/f").await.unwrap();
        assert!(d.remove(&s, "/").await.is_err());
    }

    #[tokio::test]
    async fn test_put_replaces_empty_file() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({"no_overwrite_upload": true})).await;
        put_bytes(&d, &s, "/", "f", b"").await;
        put_bytes(&d, &s, "/", "f", b"content").await;
        let listed = d.list(&s, "/", &ListArgs::default()).await.unwrap();
        assert_eq!(names(&listed), ["f"]);
        assert_eq!(listed[0].size, 7);
    }

    #[tokio::test]
    async fn test_put_cancelled_before_start_restores() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({"no_overwrite_upload": true})).await;
        put_bytes(&d, &s, "/", "f", b"original").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = d
            .put(&s, "/", FileStream::from_bytes("f", b"new".to_vec()), no_progress(), false, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());

        let listed = d.list(&s, "/", &ListArgs::default()).await.unwrap();
        assert_eq!(names(&listed), ["f"]);
        assert_eq!(listed[0].size, 8);
    }

    /// Sends a few bytes, then never produces more.
    struct StallingReader {
        sent: bool,
    }

    impl tokio::io::AsyncRead for StallingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.sent {
                return std::task::Poll::Pending;
            }
            self.sent = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_put_cancelled_mid_transfer_restores() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({"no_overwrite_upload": true})).await;
        put_bytes(&d, &s, "/", "f", b"original").await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let stream = FileStream::new(Obj::file("f", 64), StallingReader { sent: false });
        let err = d
            .put(&s, "/", stream, no_progress(), false, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());

        let listed = d.list(&s, "/", &ListArgs::default()).await.unwrap();
        assert_eq!(names(&listed), ["f"]);
        assert_eq!(listed[0].size, 8);

        let (link, _) = d.link(&s, "/f", &LinkArgs::default()).await.unwrap();
        let mut out = Vec::new();
        link.reader
            .unwrap()
            .range_read(crate::vfs::HttpRange::full())
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"original");
    }

    #[tokio::test]
    async fn test_broken_storage_fails_fast() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({"check_status": true})).await;
        put_bytes(&d, &s, "/", "f", b"x").await;
        s.set_status(StorageStatus::Error("expired".into()));

        for path in ["/", "/f"] {
            let err = d.get(&s, path).await.unwrap_err();
            assert!(matches!(err, FsError::StorageNotReady { .. }), "{path}: {err}");
        }
        let err = d.list(&s, "/", &ListArgs::default()).await.unwrap_err();
        assert!(matches!(err, FsError::StorageNotReady { .. }));
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let d = Dispatcher::default();
        let s = mounted(serde_json::json!({})).await;
        put_bytes(&d, &s, "/", "f", b"x").await;
        let err = d.rename(&s, "/f", "a/b", false).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));
    }
}
