//! The storage driver contract.
//!
//! A driver translates one storage system into the uniform object model.
//! Only `list` and `link` are mandatory; everything else is an optional
//! capability a driver opts into through [`Capabilities`]. The dispatcher
//! reads that table once, when the storage is mounted, and never probes a
//! driver by calling it to see what happens.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use strata_types::{LinkArgs, ListArgs, Obj, Storage};

use super::error::{FsError, FsResult};
use super::link::{FileStream, Link};

/// Upload progress callback, fed a percentage in `0.0..=100.0`.
pub type UpdateProgress = Arc<dyn Fn(f64) + Send + Sync>;

/// A progress callback that discards updates.
pub fn no_progress() -> UpdateProgress {
    Arc::new(|_| {})
}

/// Static behaviour flags a driver declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverConfig {
    pub name: String,
    /// Listings come back unsorted; the kernel sorts them.
    pub local_sort: bool,
    /// Content can only be served from this host.
    pub only_local: bool,
    /// Content must always be proxied.
    pub only_proxy: bool,
    /// Never cache listings.
    pub no_cache: bool,
    pub no_upload: bool,
    /// Default for the `root_folder_id` / `root_folder_path` field.
    pub default_root: String,
    /// Refuse operations unless the storage status is healthy.
    pub check_status: bool,
    /// Uploads cannot replace an existing file; the dispatcher moves the
    /// old file aside first.
    pub no_overwrite_upload: bool,
    pub proxy_range_option: bool,
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// How a driver supports a mutating operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpShape {
    #[default]
    Unsupported,
    /// The operation succeeds without describing the result.
    Plain,
    /// The operation returns the resulting object.
    WithObj,
}

impl OpShape {
    pub fn is_supported(self) -> bool {
        self != OpShape::Unsupported
    }
}

/// Optional operations a driver implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Direct lookup by path. Without it the kernel lists the parent.
    pub get: bool,
    pub make_dir: OpShape,
    pub move_obj: OpShape,
    pub rename: OpShape,
    pub copy: OpShape,
    pub remove: bool,
    pub put: OpShape,
}

impl Capabilities {
    /// Every mutating operation supported, all in the given shape.
    pub fn all(shape: OpShape) -> Self {
        Self {
            get: false,
            make_dir: shape,
            move_obj: shape,
            rename: shape,
            copy: shape,
            remove: true,
            put: shape,
        }
    }
}

/// How a driver identifies its root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// No declared root; the kernel synthesizes one at `/`.
    None,
    /// Root addressed by a native id.
    Id(String),
    /// Root is a path inside the backend; virtual paths are joined onto it.
    Path(String),
    /// The driver builds its own root object via [`Driver::get_root`].
    Custom,
}

/// Storage driver.
///
/// Paths handed to a driver are clean absolute paths inside the backend
/// (the mount prefix is already stripped and any [`Root::Path`] joined in).
/// Mutating methods return `Ok(None)` when the driver's shape is
/// [`OpShape::Plain`] and `Ok(Some(obj))` for [`OpShape::WithObj`].
#[async_trait]
pub trait Driver: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    fn config(&self) -> DriverConfig;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn root(&self) -> Root {
        Root::None
    }

    /// Current driver-specific configuration, for persisting back to the
    /// storage record (drivers may refresh tokens during init).
    fn addition(&self) -> serde_json::Value;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Build connections and parse `storage.addition`.
    async fn init(&mut self, storage: &Storage) -> FsResult<()>;

    /// Release resources. The instance is discarded afterwards.
    async fn teardown(&self) -> FsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Required operations
    // ========================================================================

    async fn list(&self, dir: &Obj, args: &ListArgs) -> FsResult<Vec<Obj>>;

    async fn link(&self, file: &Obj, args: &LinkArgs) -> FsResult<Link>;

    // ========================================================================
    // Optional operations
    // ========================================================================

    async fn get(&self, _path: &str) -> FsResult<Obj> {
        Err(FsError::NotImplemented("get"))
    }

    async fn get_root(&self) -> FsResult<Obj> {
        Err(FsError::NotImplemented("get_root"))
    }

    async fn make_dir(&self, _parent: &Obj, _name: &str) -> FsResult<Option<Obj>> {
        Err(FsError::NotImplemented("make_dir"))
    }

    async fn move_obj(&self, _src: &Obj, _dst_dir: &Obj) -> FsResult<Option<Obj>> {
        Err(FsError::NotImplemented("move"))
    }

    async fn rename(&self, _src: &Obj, _new_name: &str) -> FsResult<Option<Obj>> {
        Err(FsError::NotImplemented("rename"))
    }

    async fn copy(&self, _src: &Obj, _dst_dir: &Obj) -> FsResult<Option<Obj>> {
        Err(FsError::NotImplemented("copy"))
    }

    async fn remove(&self, _obj: &Obj) -> FsResult<()> {
        Err(FsError::NotImplemented("remove"))
    }

    async fn put(
        &self,
        _dst_dir: &Obj,
        _stream: FileStream,
        _progress: UpdateProgress,
    ) -> FsResult<Option<Obj>> {
        Err(FsError::NotImplemented("put"))
    }
}
