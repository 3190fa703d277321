// Compute → graphics → present frame pipeline on Vulkan timeline semaphores

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod tasks;

pub use error::{SyncError, SyncResult};
