// Frame module - cross-queue frame synchronization
//
// One timeline semaphore per frame-in-flight slot carries the whole
// compute → graphics → present ordering. Binary semaphores and fences only
// appear where the swapchain requires them, inside the presentation gate.

pub mod frame_loop;
pub mod gpu;
pub mod present;
pub mod slot;
pub mod submit;
pub mod timeline;

#[cfg(test)]
pub(crate) mod mock;

pub use frame_loop::{FrameLoop, FrameLoopSettings, FrameOutcome, StageTask};
pub use gpu::{GpuContext, PresentCopy, QueueRole, QueuesIdle, SemaphoreOp, Submission};
pub use present::{AcquireMode, AcquiredImage, PresentStatus, PresentSurface, PresentationGate};
pub use slot::{FrameSlot, SlotAllocator, StageCommands};
pub use submit::{ShutdownSignal, StageSubmitter, StageSync, SubmitOutcome};
pub use timeline::{timeline_value, FrameTimeline, Stage, TimelinePoint, STAGE_COUNT};
