//! Error types for the frame synchronization core.
//!
//! Everything that can go wrong while driving a frame is a [`SyncError`].
//! Swapchain staleness and wait timeouts get their own variants so the
//! frame loop's caller can react to them instead of treating every
//! failure as fatal.

use ash::vk;
use thiserror::Error;

/// Why the swapchain no longer matches the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// The swapchain can no longer be used for presentation.
    OutOfDate,
    /// Presentation still works but the swapchain should be recreated.
    Suboptimal,
}

/// Error type of the frame synchronization core.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A Vulkan call returned a non-success status
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// A CPU-side wait expired before the GPU reached the awaited point
    #[error("Timed out after {timeout_ns}ns waiting for {what}")]
    Timeout { what: &'static str, timeout_ns: u64 },

    /// The swapchain must be recreated before presenting again
    #[error("Swapchain is stale: {0:?}")]
    SwapchainStale(Staleness),

    /// The pipeline is shutting down and accepts no new frames
    #[error("Frame pipeline is shutting down")]
    ShuttingDown,

    /// A signal value at or below one already handed out was requested
    #[error("Stale timeline signal {value} (already scheduled up to {scheduled})")]
    StaleSignal { value: u64, scheduled: u64 },

    /// A wait value that no scheduled signal will ever reach was requested
    #[error("Unreachable timeline wait {value} (only scheduled up to {scheduled})")]
    UnreachableWait { value: u64, scheduled: u64 },

    /// The frame was advanced before its terminal stage was submitted
    #[error("Frame {frame} advanced before its terminal stage was scheduled")]
    IncompleteCycle { frame: u64 },

    /// A stage task failed to record its commands
    #[error("Command recording failed: {0}")]
    Record(String),
}

impl SyncError {
    /// True for errors that are fixed by recreating the swapchain.
    pub fn is_swapchain_stale(&self) -> bool {
        matches!(self, SyncError::SwapchainStale(_))
    }

    /// Map a raw wait result, turning `TIMEOUT` into [`SyncError::Timeout`].
    pub(crate) fn from_wait(result: vk::Result, what: &'static str, timeout_ns: u64) -> Self {
        match result {
            vk::Result::TIMEOUT => SyncError::Timeout { what, timeout_ns },
            vk::Result::ERROR_OUT_OF_DATE_KHR => SyncError::SwapchainStale(Staleness::OutOfDate),
            other => SyncError::Vulkan(other),
        }
    }
}

/// Result type alias for the synchronization core.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
