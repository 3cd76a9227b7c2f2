//! # strata-kernel
//!
//! Storage virtualization kernel.
//!
//! Many heterogeneous storage backends are mounted into one virtual
//! namespace. The kernel:
//! - Routes each virtual path to the storage with the longest matching
//!   mount path, rotating across `.balance` replicas
//! - Synthesizes directories for ancestors of mount points
//! - Caches listings, links, and path metadata with coalesced misses
//! - Dispatches operations through each driver's declared capabilities
//! - Protects overwrites with a rename-aside upload protocol
//! - Runs uploads and cross-storage copies as cancellable background tasks

pub mod cache;
pub mod config;
pub mod kernel;
pub mod meta;
pub mod op;
pub mod registry;
pub mod task;
pub mod transfer;
pub mod vfs;

pub use cache::{Debouncer, FsCache, MemoCache};
pub use config::{CacheConfig, KernelConfig, TaskConfig};
pub use kernel::Kernel;
pub use meta::{MemoryMetaStore, MetaCache, MetaStore};
pub use op::Dispatcher;
pub use registry::{DriverConstructor, DriverFactory, DriverInfo, DriverRegistry, Item, ItemType};
pub use task::{TaskContext, TaskInfo, TaskManager, TaskState};
pub use transfer::{Transfer, stream_from_link};
pub use vfs::{
    backends::{LocalAddition, LocalDriver, MemoryAddition, MemoryDriver},
    ByteReader, Capabilities, Driver, DriverConfig, FileStream, FsError, FsResult, HttpRange,
    Link, MountTable, MountedStorage, OpShape, RangeRead, Root, UpdateProgress, no_progress,
};

pub use strata_types as types;
