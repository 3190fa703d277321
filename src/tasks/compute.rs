// Mandelbrot compute task
//
// Renders an animated Mandelbrot zoom into the slot's storage image and
// leaves it in SHADER_READ_ONLY_OPTIMAL for the graphics task to sample.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use std::sync::Arc;

use super::SharedResources;
use crate::backend::pipeline::{create_compute_pipeline, Pipeline};
use crate::backend::shader::load_shader_module;
use crate::backend::VulkanDevice;
use crate::error::SyncResult;
use crate::frame::StageTask;

const SHADER_PATH: &str = "shaders/mandelbrot.comp.spv";

/// Matches `local_size_x/y` in mandelbrot.comp
const WORKGROUP_SIZE: u32 = 16;

/// Point the zoom converges on
const ZOOM_TARGET: Vec2 = Vec2::new(-0.743_643_9, 0.131_825_9);

/// Zoom restarts after halving the view this many times
const ZOOM_OCTAVES: f32 = 16.0;

const START_SCALE: f32 = 1.5;

/// Push constant block of mandelbrot.comp.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MandelbrotParams {
    pub center: Vec2,
    pub scale: f32,
    pub phase: f32,
}

impl MandelbrotParams {
    /// Parameters for a frame; `zoom_speed` is octaves per frame.
    pub fn for_frame(frame_index: u64, zoom_speed: f32) -> Self {
        let t = frame_index as f32 * zoom_speed;
        let octaves = t % ZOOM_OCTAVES;
        Self {
            center: ZOOM_TARGET,
            scale: START_SCALE * (-octaves).exp2(),
            phase: t.fract(),
        }
    }
}

/// Workgroup counts covering `extent`.
pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

pub struct ComputeTask {
    device: Arc<VulkanDevice>,
    shared: Arc<SharedResources>,
    pipeline: Pipeline,
    zoom_speed: f32,
}

impl ComputeTask {
    pub fn new(shared: Arc<SharedResources>, zoom_speed: f32) -> Result<Self> {
        let device = shared.device().clone();

        let shader = load_shader_module(&device, SHADER_PATH)?;
        let pipeline = create_compute_pipeline(
            &device,
            shader,
            shared.storage_layout(),
            std::mem::size_of::<MandelbrotParams>() as u32,
        );
        // The module is baked into the pipeline
        unsafe { device.device.destroy_shader_module(shader, None) };

        Ok(Self {
            device,
            shared,
            pipeline: pipeline?,
            zoom_speed,
        })
    }
}

impl StageTask for ComputeTask {
    fn record(&mut self, slot: usize, frame_index: u64, command_buffer: vk::CommandBuffer) -> SyncResult<()> {
        let device = &self.device.device;
        let target = self.shared.image(slot);
        let params = MandelbrotParams::for_frame(frame_index, self.zoom_speed);
        let (groups_x, groups_y) = dispatch_size(target.extent());

        // Previous contents are never read, so the old layout is discarded
        let to_general = [VulkanDevice::image_barrier(
            target.image(),
            (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED),
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
                vk::ImageLayout::GENERAL,
            ),
        )];
        // Stays inside the COMPUTE_SHADER scope of the ComputeFinished signal
        let to_sampled = [VulkanDevice::image_barrier(
            target.image(),
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
                vk::ImageLayout::GENERAL,
            ),
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::NONE,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
        )];

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.begin_command_buffer(command_buffer, &begin_info)?;

            let dependency = vk::DependencyInfo::builder().image_memory_barriers(&to_general);
            device.cmd_pipeline_barrier2(command_buffer, &dependency);

            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, self.pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline.layout,
                0,
                &[self.shared.storage_set(slot)],
                &[],
            );
            device.cmd_push_constants(
                command_buffer,
                self.pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&params),
            );
            device.cmd_dispatch(command_buffer, groups_x, groups_y, 1);

            let dependency = vk::DependencyInfo::builder().image_memory_barriers(&to_sampled);
            device.cmd_pipeline_barrier2(command_buffer, &dependency);

            device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }
}

impl Drop for ComputeTask {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed before destroying compute pipeline: {}", e);
        }
        self.pipeline.destroy(&self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_match_shader_block() {
        assert_eq!(std::mem::size_of::<MandelbrotParams>(), 16);
        let params = MandelbrotParams {
            center: Vec2::new(1.0, 2.0),
            scale: 3.0,
            phase: 4.0,
        };
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn zoom_starts_wide_and_narrows() {
        let first = MandelbrotParams::for_frame(0, 0.01);
        assert_eq!(first.scale, START_SCALE);
        assert_eq!(first.phase, 0.0);

        let later = MandelbrotParams::for_frame(100, 0.01);
        assert!((later.scale - START_SCALE / 2.0).abs() < 1e-4);
        assert!(later.scale < first.scale);
    }

    #[test]
    fn zoom_wraps_around() {
        // 16 octaves at one octave per frame
        let wrapped = MandelbrotParams::for_frame(16, 1.0);
        assert_eq!(wrapped.scale, START_SCALE);
    }

    #[test]
    fn dispatch_covers_partial_tiles() {
        assert_eq!(
            dispatch_size(vk::Extent2D {
                width: 600,
                height: 600
            }),
            (38, 38)
        );
        assert_eq!(
            dispatch_size(vk::Extent2D {
                width: 32,
                height: 1
            }),
            (2, 1)
        );
    }
}
