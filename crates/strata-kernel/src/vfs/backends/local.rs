//! Local filesystem driver.
//!
//! Serves a directory on this host. The configured root folder is declared
//! as the driver root, so every path the kernel hands in is already an
//! absolute host path beneath it; `resolve` re-checks that nothing escapes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use strata_types::{LinkArgs, ListArgs, Obj, Storage};

use crate::registry::DriverFactory;
use crate::vfs::driver::{
    Capabilities, Driver, DriverConfig, OpShape, Root, UpdateProgress,
};
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::link::{FileStream, Link};

/// Driver-specific configuration for local mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalAddition {
    /// Host directory served at the mount point.
    pub root_folder_path: String,
    /// List dotfiles.
    #[serde(default)]
    pub show_hidden: bool,
}

/// Local filesystem driver.
#[derive(Debug, Clone, Default)]
pub struct LocalDriver {
    addition: LocalAddition,
    root: PathBuf,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the canonical root path.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Map a driver path to a host path, refusing anything outside the root.
    async fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let full = PathBuf::from(path);

        // Canonicalize to resolve symlinks and ..
        // For new files, canonicalize the parent and append the name
        let canonical = if fs::try_exists(&full).await.unwrap_or(false) {
            dunce::canonicalize(&full)?
        } else {
            let parent = full
                .parent()
                .ok_or_else(|| FsError::invalid_path("no parent"))?;
            let name = full
                .file_name()
                .ok_or_else(|| FsError::invalid_path("no file name"))?;
            match dunce::canonicalize(parent) {
                Ok(p) => p.join(name),
                Err(_) => full.clone(),
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(FsError::invalid_path(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }

    fn obj_path(obj: &Obj) -> &str {
        if obj.path.is_empty() { "/" } else { &obj.path }
    }

    fn not_found(e: std::io::Error, path: &Path) -> FsError {
        if e.kind() == std::io::ErrorKind::NotFound {
            FsError::object_not_found(path.display().to_string())
        } else {
            e.into()
        }
    }

    fn metadata_to_obj(path: &Path, meta: &std::fs::Metadata) -> Obj {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let obj = if meta.is_dir() {
            Obj::dir(name)
        } else {
            Obj::file(name, meta.len())
        };
        obj.with_path(path.to_string_lossy())
            .with_modified(meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH))
    }

    async fn copy_recursive(from: PathBuf, to: PathBuf) -> FsResult<()> {
        let mut stack = vec![(from, to)];
        while let Some((src, dst)) = stack.pop() {
            let meta = fs::metadata(&src).await?;
            if meta.is_dir() {
                fs::create_dir(&dst).await?;
                let mut dir = fs::read_dir(&src).await?;
                while let Some(entry) = dir.next_entry().await? {
                    stack.push((entry.path(), dst.join(entry.file_name())));
                }
            } else {
                fs::copy(&src, &dst).await?;
            }
        }
        Ok(())
    }
}

impl DriverFactory for LocalDriver {
    type Addition = LocalAddition;

    fn driver_config() -> DriverConfig {
        DriverConfig {
            local_sort: true,
            only_local: true,
            no_cache: true,
            check_status: true,
            default_root: "/".to_string(),
            ..DriverConfig::new("local")
        }
    }

    fn create() -> Box<dyn Driver> {
        Box::new(LocalDriver::new())
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn config(&self) -> DriverConfig {
        Self::driver_config()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            get: true,
            ..Capabilities::all(OpShape::Plain)
        }
    }

    fn root(&self) -> Root {
        Root::Path(self.root.to_string_lossy().into_owned())
    }

    fn addition(&self) -> serde_json::Value {
        serde_json::to_value(&self.addition).unwrap_or_default()
    }

    async fn init(&mut self, storage: &Storage) -> FsResult<()> {
        self.addition = serde_json::from_value(storage.addition.clone())?;
        let root = PathBuf::from(&self.addition.root_folder_path);
        if !root.is_absolute() {
            return Err(FsError::config(format!(
                "root_folder_path must be absolute: {}",
                root.display()
            )));
        }
        let meta = fs::metadata(&root)
            .await
            .map_err(|e| Self::not_found(e, &root))?;
        if !meta.is_dir() {
            return Err(FsError::not_a_folder(root.display().to_string()));
        }
        // Canonicalized once so symlinked roots (macOS /tmp) compare cleanly.
        self.root = dunce::canonicalize(&root)?;
        Ok(())
    }

    async fn list(&self, dir: &Obj, _args: &ListArgs) -> FsResult<Vec<Obj>> {
        let full = self.resolve(Self::obj_path(dir)).await?;
        let mut dir = fs::read_dir(&full)
            .await
            .map_err(|e| Self::not_found(e, &full))?;

        let mut objs = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.addition.show_hidden && name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            objs.push(Self::metadata_to_obj(&entry.path(), &meta));
        }
        Ok(objs)
    }

    async fn get(&self, path: &str) -> FsResult<Obj> {
        let full = self.resolve(path).await?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(e, &full))?;
        Ok(Self::metadata_to_obj(&full, &meta))
    }

    async fn link(&self, file: &Obj, _args: &LinkArgs) -> FsResult<Link> {
        let full = self.resolve(Self::obj_path(file)).await?;
        Ok(Link::file(full))
    }

    async fn make_dir(&self, parent: &Obj, name: &str) -> FsResult<Option<Obj>> {
        let full = self.resolve(Self::obj_path(parent)).await?.join(name);
        fs::create_dir(&full).await?;
        Ok(None)
    }

    async fn move_obj(&self, src: &Obj, dst_dir: &Obj) -> FsResult<Option<Obj>> {
        let from = self.resolve(Self::obj_path(src)).await?;
        let to = self.resolve(Self::obj_path(dst_dir)).await?.join(&src.name);
        fs::rename(&from, &to).await?;
        Ok(None)
    }

    async fn rename(&self, src: &Obj, new_name: &str) -> FsResult<Option<Obj>> {
        let from = self.resolve(Self::obj_path(src)).await?;
        let to = from
            .parent()
            .ok_or_else(|| FsError::invalid_path("cannot rename root"))?
            .join(new_name);
        fs::rename(&from, &to).await?;
        Ok(None)
    }

    async fn copy(&self, src: &Obj, dst_dir: &Obj) -> FsResult<Option<Obj>> {
        let from = self.resolve(Self::obj_path(src)).await?;
        let to = self.resolve(Self::obj_path(dst_dir)).await?.join(&src.name);
        Self::copy_recursive(from, to).await?;
        Ok(None)
    }

    async fn remove(&self, obj: &Obj) -> FsResult<()> {
        let full = self.resolve(Self::obj_path(obj)).await?;
        if full == self.root {
            return Err(FsError::invalid_path("cannot remove root"));
        }
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(e, &full))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full).await?;
        } else {
            fs::remove_file(&full).await?;
        }
        Ok(())
    }

    async fn put(
        &self,
        dst_dir: &Obj,
        mut stream: FileStream,
        progress: UpdateProgress,
    ) -> FsResult<Option<Obj>> {
        let full = self.resolve(Self::obj_path(dst_dir)).await?.join(stream.name());
        let mut file = fs::File::create(&full).await?;
        let written = tokio::io::copy(&mut stream, &mut file).await;
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&full).await {
                debug!(path = %full.display(), error = %cleanup, "partial upload cleanup failed");
            }
            return Err(e.into());
        }
        progress(100.0);
        Ok(None)
    }
}
