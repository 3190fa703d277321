// Synchronization primitives on the real device
//
// Implements the frame core's GpuContext on top of ash: timeline and
// binary semaphores, fences, per-queue command pools and vkQueueSubmit2.

use ash::vk;

use super::VulkanDevice;
use crate::error::{SyncError, SyncResult};
use crate::frame::gpu::{GpuContext, PresentCopy, QueueRole, QueuesIdle, SemaphoreOp, Submission};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

impl VulkanDevice {
    /// Queue handle for a role; both roles share one queue family.
    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Compute => self.compute_queue,
            QueueRole::Graphics => self.graphics_queue,
        }
    }

    pub(crate) fn image_barrier(
        image: vk::Image,
        (src_stage, src_access, old_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
        (dst_stage, dst_access, new_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
    ) -> vk::ImageMemoryBarrier2 {
        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(COLOR_RANGE)
            .build()
    }
}

impl GpuContext for VulkanDevice {
    fn create_timeline_semaphore(&self, initial_value: u64) -> SyncResult<vk::Semaphore> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        Ok(unsafe { self.device.create_semaphore(&create_info, None) }?)
    }

    fn create_binary_semaphore(&self) -> SyncResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&create_info, None) }?)
    }

    fn create_fence(&self, signaled: bool) -> SyncResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None) }?)
    }

    fn create_command_pool(&self, _queue: QueueRole) -> SyncResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        Ok(unsafe { self.device.create_command_pool(&create_info, None) }?)
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> SyncResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&alloc_info) }?)
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> SyncResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }?;
        Ok(())
    }

    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> SyncResult<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(semaphore) }?)
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> SyncResult<()> {
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) }
            .map_err(|e| SyncError::from_wait(e, "timeline semaphore", timeout_ns))
    }

    fn wait_and_reset_fence(&self, fence: vk::Fence, timeout_ns: u64) -> SyncResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[fence], true, timeout_ns)
                .map_err(|e| SyncError::from_wait(e, "acquire fence", timeout_ns))?;
            self.device.reset_fences(&[fence])?;
        }
        Ok(())
    }

    fn submit(&self, queue: QueueRole, submission: &Submission) -> SyncResult<()> {
        let semaphore_info = |op: &SemaphoreOp| {
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(op.semaphore)
                .value(op.value)
                .stage_mask(op.stage_mask)
                .build()
        };
        let waits: Vec<_> = submission.waits.iter().map(semaphore_info).collect();
        let signals: Vec<_> = submission.signals.iter().map(semaphore_info).collect();
        let command_buffers: Vec<_> = submission
            .command_buffers
            .iter()
            .map(|&cmd| vk::CommandBufferSubmitInfo::builder().command_buffer(cmd).build())
            .collect();

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        unsafe {
            self.device
                .queue_submit2(self.queue(queue), &[submit_info.build()], submission.fence)
        }?;
        Ok(())
    }

    fn record_present_copy(&self, command_buffer: vk::CommandBuffer, copy: &PresentCopy) -> SyncResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let to_transfer = [
            Self::image_barrier(
                copy.source,
                (
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ),
                (
                    vk::PipelineStageFlags2::TRANSFER,
                    vk::AccessFlags2::TRANSFER_READ,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                ),
            ),
            Self::image_barrier(
                copy.destination,
                (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED),
                (
                    vk::PipelineStageFlags2::TRANSFER,
                    vk::AccessFlags2::TRANSFER_WRITE,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ),
            ),
        ];
        let to_present = [Self::image_barrier(
            copy.destination,
            (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR),
        )];

        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy {
            src_subresource: layers,
            src_offset: vk::Offset3D::default(),
            dst_subresource: layers,
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: copy.extent.width,
                height: copy.extent.height,
                depth: 1,
            },
        };

        unsafe {
            self.device.begin_command_buffer(command_buffer, &begin_info)?;

            let dependency = vk::DependencyInfo::builder().image_memory_barriers(&to_transfer);
            self.device.cmd_pipeline_barrier2(command_buffer, &dependency);

            self.device.cmd_copy_image(
                command_buffer,
                copy.source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                copy.destination,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let dependency = vk::DependencyInfo::builder().image_memory_barriers(&to_present);
            self.device.cmd_pipeline_barrier2(command_buffer, &dependency);

            self.device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> SyncResult<QueuesIdle> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(QueuesIdle::confirmed())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore, _idle: &QueuesIdle) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence, _idle: &QueuesIdle) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool, _idle: &QueuesIdle) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }
}
