// Tasks module - the work recorded into each frame
//
// ComputeTask fills the slot's storage image, GraphicsTask samples it into
// the slot's color attachment. Both plug into the frame loop as StageTasks.

pub mod compute;
pub mod graphics;
pub mod shared;

pub use compute::{ComputeTask, MandelbrotParams};
pub use graphics::GraphicsTask;
pub use shared::SharedResources;
