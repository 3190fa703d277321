// Full-screen graphics task
//
// Samples the slot's compute output onto a full-screen triangle, rendering
// into a per-slot color attachment with dynamic rendering. The attachment is
// left in COLOR_ATTACHMENT_OPTIMAL; the present copy takes it from there.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::SharedResources;
use crate::backend::pipeline::{create_fullscreen_pipeline, Pipeline};
use crate::backend::shader::load_shader_module;
use crate::backend::{GpuImage, VulkanDevice};
use crate::error::SyncResult;
use crate::frame::{QueuesIdle, StageTask};

const VERTEX_SHADER_PATH: &str = "shaders/fullscreen.vert.spv";
const FRAGMENT_SHADER_PATH: &str = "shaders/sample.frag.spv";

/// Largest square viewport centred in `extent`.
pub fn square_viewport(extent: vk::Extent2D) -> vk::Viewport {
    let width = extent.width as f32;
    let height = extent.height as f32;
    let side = width.min(height);

    vk::Viewport {
        x: 0.5 * (width - side),
        y: 0.5 * (height - side),
        width: side,
        height: side,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub struct GraphicsTask {
    device: Arc<VulkanDevice>,
    shared: Arc<SharedResources>,
    pipeline: Pipeline,
    attachments: Vec<GpuImage>,
    format: vk::Format,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
}

impl GraphicsTask {
    pub fn new(
        shared: Arc<SharedResources>,
        format: vk::Format,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let device = shared.device().clone();

        let vert = load_shader_module(&device, VERTEX_SHADER_PATH)?;
        let frag = match load_shader_module(&device, FRAGMENT_SHADER_PATH) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };
        let pipeline = create_fullscreen_pipeline(&device, vert, frag, shared.sampled_layout(), format);
        unsafe {
            device.device.destroy_shader_module(vert, None);
            device.device.destroy_shader_module(frag, None);
        }

        let mut task = Self {
            device,
            shared,
            pipeline: pipeline?,
            attachments: Vec::new(),
            format,
            extent,
            clear_color,
        };
        task.create_attachments()?;
        Ok(task)
    }

    fn create_attachments(&mut self) -> Result<()> {
        self.attachments = (0..self.shared.slot_count())
            .map(|slot| {
                GpuImage::new(
                    self.device.clone(),
                    &format!("color attachment {}", slot),
                    self.extent,
                    self.format,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Recreate the color attachments for a new swapchain extent.
    pub fn resize(&mut self, extent: vk::Extent2D, _idle: &QueuesIdle) -> Result<()> {
        if extent == self.extent && !self.attachments.is_empty() {
            return Ok(());
        }
        log::debug!("Resizing color attachments to {}x{}", extent.width, extent.height);

        self.attachments.clear();
        self.extent = extent;
        self.create_attachments()
    }
}

impl StageTask for GraphicsTask {
    fn record(&mut self, slot: usize, _frame_index: u64, command_buffer: vk::CommandBuffer) -> SyncResult<()> {
        let device = &self.device.device;
        let attachment = &self.attachments[slot];

        // The previous copy out of this attachment finished before the slot
        // became vacant
        let to_attachment = [VulkanDevice::image_barrier(
            attachment.image(),
            (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED),
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
        )];

        let color_attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(attachment.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
            .build()];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.begin_command_buffer(command_buffer, &begin_info)?;

            let dependency = vk::DependencyInfo::builder().image_memory_barriers(&to_attachment);
            device.cmd_pipeline_barrier2(command_buffer, &dependency);

            device.cmd_begin_rendering(command_buffer, &rendering_info);

            device.cmd_set_viewport(command_buffer, 0, &[square_viewport(self.extent)]);
            device.cmd_set_scissor(command_buffer, 0, &[render_area]);
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.shared.sampled_set(slot)],
                &[],
            );
            // Triangle generated from gl_VertexIndex
            device.cmd_draw(command_buffer, 3, 1, 0, 0);

            device.cmd_end_rendering(command_buffer);
            device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }

    fn output(&self, slot: usize) -> Option<vk::Image> {
        self.attachments.get(slot).map(GpuImage::image)
    }
}

impl Drop for GraphicsTask {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed before destroying graphics resources: {}", e);
        }
        self.attachments.clear();
        self.pipeline.destroy(&self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_viewport_of_square_extent_fills_it() {
        let viewport = square_viewport(vk::Extent2D {
            width: 600,
            height: 600,
        });
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (600.0, 600.0));
    }

    #[test]
    fn wide_extent_is_pillarboxed() {
        let viewport = square_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!((viewport.x, viewport.y), (100.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (600.0, 600.0));
    }

    #[test]
    fn tall_extent_is_letterboxed() {
        let viewport = square_viewport(vk::Extent2D {
            width: 300,
            height: 500,
        });
        assert_eq!((viewport.x, viewport.y), (0.0, 100.0));
        assert_eq!((viewport.width, viewport.height), (300.0, 300.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }
}
