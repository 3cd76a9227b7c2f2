//! Shared object, storage, and path types for Strata.
//!
//! This crate is the leaf of the workspace: the uniform object model every
//! storage driver speaks, the persisted record of a mounted storage, the
//! argument types for listing and linking, and the path algebra the router
//! relies on. It has **no async and no internal dependencies**.
//!
//! # Key Types
//!
//! |---------------------|--------------------------------------------------|
//! | Type                | Purpose                                          |
//! |---------------------|--------------------------------------------------|
//! | [`Obj`]             | A file or directory as reported by a driver      |
//! | [`ObjResp`]         | Wire shape of an object for callers              |
//! | [`Storage`]         | Persisted record of one mounted storage          |
//! | [`StorageStatus`]   | Working, disabled, or the last init error        |
//! | [`ListArgs`]        | Arguments for a directory listing                |
//! | [`LinkArgs`]        | Arguments for resolving a download link          |
//! | [`Meta`]            | Per-path access metadata                         |
//! |---------------------|--------------------------------------------------|

pub mod args;
pub mod meta;
pub mod obj;
pub mod path;
pub mod storage;

pub use args::{LinkArgs, ListArgs};
pub use meta::Meta;
pub use obj::{natural_cmp, sort_objs, extract_folder, wrap_obj_names, Obj, ObjResp};
pub use path::PathError;
pub use storage::{
    ExtractFolder, OrderBy, OrderDirection, Proxy, Sort, Storage, StorageStatus, WebdavPolicy,
};
