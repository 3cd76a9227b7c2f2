//! Built-in storage drivers.
//!
//! Drivers implement [`Driver`](crate::vfs::Driver) for different storage
//! systems. Vendor adapters live outside this crate and register through
//! [`DriverRegistry`](crate::registry::DriverRegistry) the same way.

mod local;
mod memory;

pub use local::{LocalAddition, LocalDriver};
pub use memory::{MemoryAddition, MemoryDriver};
