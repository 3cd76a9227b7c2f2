//! Storage virtualization layer.
//!
//! Key components:
//!
//! - [`Driver`] - Contract every storage backend implements
//! - [`MountTable`] - Routes virtual paths to mounted storages
//! - [`Link`] / [`FileStream`] - Download and upload plumbing
//! - [`MemoryDriver`] - In-memory storage (scratch mounts, testing)
//! - [`LocalDriver`] - Local filesystem access (with path security)
//!
//! ## Design Decisions
//!
//! - **Capabilities, not probing**: optional operations are declared in a
//!   [`Capabilities`] table read once at mount time.
//! - **Longest-prefix routing**: the most specific mount wins; `.balance`
//!   replicas rotate round-robin.
//! - **Virtual ancestors**: directories that exist only because something
//!   is mounted beneath them are synthesized from the mount table.

pub mod backends;
mod driver;
mod error;
mod link;
mod mount;

pub use backends::{LocalDriver, MemoryDriver};
pub use driver::{
    no_progress, Capabilities, Driver, DriverConfig, OpShape, Root, UpdateProgress,
};
pub use error::{FsError, FsResult};
pub use link::{ByteReader, BytesRangeReader, FileStream, HttpRange, Link, RangeRead};
pub use mount::{MountTable, MountedStorage};
