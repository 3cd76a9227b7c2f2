//! In-memory storage driver.
//!
//! Used for scratch mounts and testing. All data is ephemeral. The
//! addition lets a mount choose how it reports mutations and whether it
//! can overwrite on upload, so every dispatcher path can be exercised
//! without a real backend.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::debug;

use strata_types::path::{self, fix_and_clean_path, is_sub_path};
use strata_types::{LinkArgs, ListArgs, Obj, Storage};

use crate::registry::DriverFactory;
use crate::vfs::driver::{
    Capabilities, Driver, DriverConfig, OpShape, Root, UpdateProgress,
};
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::link::{BytesRangeReader, FileStream, Link};

/// Driver-specific configuration for memory mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MemoryAddition {
    /// Return the resulting object from mutating operations.
    pub return_objects: bool,
    /// Refuse to replace an existing file on upload.
    pub no_overwrite_upload: bool,
    /// Leave listings unsorted and let the kernel sort them.
    pub local_sort: bool,
    /// Refuse operations while the storage is unhealthy.
    pub check_status: bool,
    /// Reject every upload.
    pub no_upload: bool,
    /// Seconds a download link stays valid. Zero issues uncacheable links.
    pub link_expiration_secs: u64,
    /// Fail initialization with this message.
    pub fail_init: Option<String>,
}

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Arc<[u8]>, modified: SystemTime },
    Directory { modified: SystemTime },
}

impl Entry {
    fn to_obj(&self, path: &str) -> Obj {
        let name = path::base_name(path);
        match self {
            Entry::File { data, modified } => Obj::file(name, data.len() as u64)
                .with_modified(*modified)
                .with_id(path)
                .with_path(path),
            Entry::Directory { modified } => Obj::dir(name)
                .with_modified(*modified)
                .with_id(path)
                .with_path(path),
        }
    }
}

/// In-memory storage driver.
///
/// Thread-safe via internal `RwLock`. Keys are clean absolute paths; the
/// root directory always exists.
#[derive(Debug)]
pub struct MemoryDriver {
    addition: MemoryAddition,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            Entry::Directory {
                modified: SystemTime::now(),
            },
        );
        Self {
            addition: MemoryAddition::default(),
            entries: RwLock::new(entries),
        }
    }

    fn shape(&self) -> OpShape {
        if self.addition.return_objects {
            OpShape::WithObj
        } else {
            OpShape::Plain
        }
    }

    fn reply(&self, obj: Obj) -> Option<Obj> {
        self.addition.return_objects.then_some(obj)
    }

    fn lock_err() -> FsError {
        FsError::other("lock poisoned")
    }

    fn obj_path(obj: &Obj) -> String {
        fix_and_clean_path(&obj.path)
    }

    /// Move every entry at or beneath `from` to the same place beneath `to`.
    fn relocate(&self, from: &str, to: &str, keep_source: bool) -> FsResult<Obj> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        if !entries.contains_key(from) {
            return Err(FsError::object_not_found(from));
        }
        if entries.contains_key(to) {
            return Err(FsError::file_exists(to));
        }
        if is_sub_path(from, to) {
            return Err(FsError::invalid_path(format!("{to} is inside {from}")));
        }

        let moving: Vec<(String, Entry)> = entries
            .iter()
            .filter(|(p, _)| is_sub_path(from, p))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();
        for (old, entry) in moving {
            if !keep_source {
                entries.remove(&old);
            }
            let new = format!("{to}{}", &old[from.len()..]);
            entries.insert(new, entry);
        }

        entries
            .get(to)
            .map(|e| e.to_obj(to))
            .ok_or_else(|| FsError::object_not_found(to))
    }
}

impl DriverFactory for MemoryDriver {
    type Addition = MemoryAddition;

    fn driver_config() -> DriverConfig {
        DriverConfig::new("memory")
    }

    fn create() -> Box<dyn Driver> {
        Box::new(MemoryDriver::new())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            local_sort: self.addition.local_sort,
            check_status: self.addition.check_status,
            no_overwrite_upload: self.addition.no_overwrite_upload,
            no_upload: self.addition.no_upload,
            ..Self::driver_config()
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all(self.shape())
    }

    fn root(&self) -> Root {
        Root::Path("/".to_string())
    }

    fn addition(&self) -> serde_json::Value {
        serde_json::to_value(&self.addition).unwrap_or_default()
    }

    async fn init(&mut self, storage: &Storage) -> FsResult<()> {
        self.addition = serde_json::from_value(storage.addition.clone())?;
        if let Some(msg) = &self.addition.fail_init {
            return Err(FsError::other(msg.clone()));
        }
        Ok(())
    }

    async fn list(&self, dir: &Obj, _args: &ListArgs) -> FsResult<Vec<Obj>> {
        let dir_path = Self::obj_path(dir);
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        match entries.get(&dir_path) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(FsError::not_a_folder(dir_path)),
            None => return Err(FsError::object_not_found(dir_path)),
        }

        let mut objs: Vec<Obj> = entries
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && path::parent(p) == dir_path)
            .map(|(p, e)| e.to_obj(p))
            .collect();
        if !self.addition.local_sort {
            objs.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(objs)
    }

    async fn link(&self, file: &Obj, _args: &LinkArgs) -> FsResult<Link> {
        let file_path = Self::obj_path(file);
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        let data = match entries.get(&file_path) {
            Some(Entry::File { data, .. }) => Arc::clone(data),
            Some(Entry::Directory { .. }) => return Err(FsError::not_a_file(file_path)),
            None => return Err(FsError::object_not_found(file_path)),
        };
        let link = Link::reader(Arc::new(BytesRangeReader::new(data)));
        Ok(match self.addition.link_expiration_secs {
            0 => link,
            secs => link.with_expiration(Duration::from_secs(secs)),
        })
    }

    async fn make_dir(&self, parent: &Obj, name: &str) -> FsResult<Option<Obj>> {
        let target = path::join(&Self::obj_path(parent), name);
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        if entries.contains_key(&target) {
            return Err(FsError::file_exists(target));
        }
        let entry = Entry::Directory {
            modified: SystemTime::now(),
        };
        let obj = entry.to_obj(&target);
        entries.insert(target, entry);
        Ok(self.reply(obj))
    }

    async fn move_obj(&self, src: &Obj, dst_dir: &Obj) -> FsResult<Option<Obj>> {
        let from = Self::obj_path(src);
        let to = path::join(&Self::obj_path(dst_dir), &src.name);
        let obj = self.relocate(&from, &to, false)?;
        Ok(self.reply(obj))
    }

    async fn rename(&self, src: &Obj, new_name: &str) -> FsResult<Option<Obj>> {
        let from = Self::obj_path(src);
        let to = path::join(&path::parent(&from), new_name);
        let obj = self.relocate(&from, &to, false)?;
        Ok(self.reply(obj))
    }

    async fn copy(&self, src: &Obj, dst_dir: &Obj) -> FsResult<Option<Obj>> {
        let from = Self::obj_path(src);
        let to = path::join(&Self::obj_path(dst_dir), &src.name);
        let obj = self.relocate(&from, &to, true)?;
        Ok(self.reply(obj))
    }

    async fn remove(&self, obj: &Obj) -> FsResult<()> {
        let target = Self::obj_path(obj);
        if target == "/" {
            return Err(FsError::invalid_path("cannot remove root"));
        }
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        if entries.remove(&target).is_none() {
            return Err(FsError::object_not_found(target));
        }
        entries.retain(|p, _| !is_sub_path(&target, p));
        Ok(())
    }

    async fn put(
        &self,
        dst_dir: &Obj,
        mut stream: FileStream,
        progress: UpdateProgress,
    ) -> FsResult<Option<Obj>> {
        let target = path::join(&Self::obj_path(dst_dir), stream.name());
        if self.addition.no_overwrite_upload {
            let exists = self
                .entries
                .read()
                .map_err(|_| Self::lock_err())?
                .contains_key(&target);
            if exists {
                return Err(FsError::file_exists(target));
            }
        }

        let mut data = Vec::with_capacity(usize::try_from(stream.size()).unwrap_or(0));
        stream.read_to_end(&mut data).await?;
        progress(100.0);
        debug!(path = %target, bytes = data.len(), "memory put");

        let entry = Entry::File {
            data: Arc::from(data),
            modified: SystemTime::now(),
        };
        let obj = entry.to_obj(&target);
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        if !matches!(entries.get(&Self::obj_path(dst_dir)), Some(Entry::Directory { .. })) {
            return Err(FsError::not_a_folder(Self::obj_path(dst_dir)));
        }
        entries.insert(target, entry);
        Ok(self.reply(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::link::HttpRange;

    async fn driver(addition: serde_json::Value) -> MemoryDriver {
        let mut d = MemoryDriver::new();
        d.init(&Storage::new("/mem", "memory").with_addition(addition))
            .await
            .unwrap();
        d
    }

    fn root() -> Obj {
        Obj::dir("root").with_path("/")
    }

    async fn read_link(d: &MemoryDriver, path: &str) -> Vec<u8> {
        let link = d
            .link(&Obj::file("", 0).with_path(path), &LinkArgs::default())
            .await
            .unwrap();
        let mut out = Vec::new();
        link.reader
            .unwrap()
            .range_read(HttpRange::full())
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_put_and_list() {
        let d = driver(serde_json::json!({})).await;
        d.make_dir(&root(), "docs").await.unwrap();
        let docs = Obj::dir("docs").with_path("/docs");
        d.put(&docs, FileStream::from_bytes("a.txt", b"hello".to_vec()), crate::vfs::no_progress())
            .await
            .unwrap();

        let listed = d.list(&docs, &ListArgs::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.txt");
        assert_eq!(listed[0].size, 5);
        assert_eq!(listed[0].path, "/docs/a.txt");
        assert_eq!(read_link(&d, "/docs/a.txt").await, b"hello");
    }

    #[tokio::test]
    async fn test_return_objects_shape() {
        let plain = driver(serde_json::json!({})).await;
        assert_eq!(plain.capabilities().make_dir, OpShape::Plain);
        assert!(plain.make_dir(&root(), "x").await.unwrap().is_none());

        let rich = driver(serde_json::json!({"return_objects": true})).await;
        assert_eq!(rich.capabilities().make_dir, OpShape::WithObj);
        let made = rich.make_dir(&root(), "x").await.unwrap().unwrap();
        assert!(made.is_dir);
        assert_eq!(made.path, "/x");
    }

    #[tokio::test]
    async fn test_rename_moves_children() {
        let d = driver(serde_json::json!({})).await;
        d.make_dir(&root(), "a").await.unwrap();
        let a = Obj::dir("a").with_path("/a");
        d.put(&a, FileStream::from_bytes("f", b"1".to_vec()), crate::vfs::no_progress())
            .await
            .unwrap();
        d.rename(&a, "b").await.unwrap();

        let b = Obj::dir("b").with_path("/b");
        let listed = d.list(&b, &ListArgs::default()).await.unwrap();
        assert_eq!(listed[0].path, "/b/f");
        assert!(d.list(&a, &ListArgs::default()).await.unwrap_err().is_object_not_found());
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let d = driver(serde_json::json!({})).await;
        d.make_dir(&root(), "src").await.unwrap();
        d.make_dir(&root(), "dst").await.unwrap();
        let src = Obj::dir("src").with_path("/src");
        d.put(&src, FileStream::from_bytes("f", b"1".to_vec()), crate::vfs::no_progress())
            .await
            .unwrap();
        d.copy(&Obj::file("f", 1).with_path("/src/f"), &Obj::dir("dst").with_path("/dst"))
            .await
            .unwrap();
        assert_eq!(read_link(&d, "/src/f").await, b"1");
        assert_eq!(read_link(&d, "/dst/f").await, b"1");
    }

    #[tokio::test]
    async fn test_no_overwrite_upload_refuses_existing() {
        let d = driver(serde_json::json!({"no_overwrite_upload": true})).await;
        d.put(&root(), FileStream::from_bytes("f", b"old".to_vec()), crate::vfs::no_progress())
            .await
            .unwrap();
        let err = d
            .put(&root(), FileStream::from_bytes("f", b"new".to_vec()), crate::vfs::no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::FileExists(_)));
        assert_eq!(read_link(&d, "/f").await, b"old");
    }

    #[tokio::test]
    async fn test_remove_subtree() {
        let d = driver(serde_json::json!({})).await;
        d.make_dir(&root(), "a").await.unwrap();
        d.make_dir(&Obj::dir("a").with_path("/a"), "b").await.unwrap();
        d.remove(&Obj::dir("a").with_path("/a")).await.unwrap();
        assert!(d.list(&root(), &ListArgs::default()).await.unwrap().is_empty());
        assert!(d.entries.read().unwrap().get("/a/b").is_none());
    }

    #[tokio::test]
    async fn test_fail_init() {
        let mut d = MemoryDriver::new();
        let err = d
            .init(&Storage::new("/m", "memory").with_addition(serde_json::json!({"fail_init": "boom"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
