//! Storage backends for fleetwire.
//!
//! - [`MemoryDeviceStore`]: in-process store, used when no database path is configured
//! - [`RedbDeviceStore`]: persistent store on redb
//! - [`AssignmentCache`]: write-through assignment cache

pub mod cache;
pub mod error;
pub mod memory;
pub mod registry;

pub use cache::AssignmentCache;
pub use error::{Error, Result};
pub use memory::MemoryDeviceStore;
pub use registry::RedbDeviceStore;
