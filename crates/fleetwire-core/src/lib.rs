//! Core types and traits for fleetwire.
//!
//! This crate defines the domain model, the store traits and the shared
//! error, configuration and logging facilities used across the workspace.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod storage;

pub use config::FleetwireConfig;
pub use error::{Error, ErrorCode, Result};
pub use storage::{DeviceEventManagement, DeviceManagement};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::FleetwireConfig;
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::model::*;
    pub use crate::storage::{DeviceEventManagement, DeviceManagement};
}
