//! Delver Core - Shared foundation for the research pipeline
//!
//! This crate defines error handling, logging, configuration, and async
//! utilities used by every other crate in the workspace.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;

// Re-export commonly used external types
pub use tokio;
pub use tracing;
