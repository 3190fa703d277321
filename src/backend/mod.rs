// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. The frame core reaches the device only through
// the GpuContext implementation in `sync`.

pub mod debug;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use debug::{DiagnosticsSink, LogSink};
pub use device::VulkanDevice;
pub use image::GpuImage;
pub use surface::Surface;
pub use swapchain::Swapchain;
