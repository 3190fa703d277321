// Frame slots - round-robin frame-in-flight resources
//
// Frame f always lands in slot f % N. The allocator itself never blocks;
// back-pressure comes from waiting on the slot's timeline before reuse.

use ash::vk;

use super::gpu::{GpuContext, PartialObjects, QueueRole, QueuesIdle};
use super::timeline::FrameTimeline;
use crate::error::SyncResult;

/// Maps frame indices to frame-in-flight slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAllocator {
    count: usize,
}

impl SlotAllocator {
    pub fn new(count: usize) -> Self {
        Self { count: count.max(1) }
    }

    /// Number of frames that may be in flight.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn slot_for(&self, frame_index: u64) -> usize {
        (frame_index % self.count as u64) as usize
    }
}

/// Which stage a slot command buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageCommands {
    Compute,
    Graphics,
    PresentCopy,
}

/// Resources exclusively owned by one frame-in-flight slot.
pub struct FrameSlot {
    index: usize,
    timeline: FrameTimeline,
    compute_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
    compute_commands: vk::CommandBuffer,
    graphics_commands: vk::CommandBuffer,
    present_commands: vk::CommandBuffer,
}

impl FrameSlot {
    pub fn new<G: GpuContext>(gpu: &G, index: usize, slot_count: usize) -> SyncResult<Self> {
        let mut created = PartialObjects::new(gpu);

        let semaphore = created.timeline_semaphore(0)?;
        let timeline = FrameTimeline::new(semaphore, index as u64, slot_count as u64);

        let compute_pool = created.command_pool(QueueRole::Compute)?;
        let graphics_pool = created.command_pool(QueueRole::Graphics)?;

        let compute_commands = gpu.allocate_command_buffers(compute_pool, 1)?[0];
        let graphics = gpu.allocate_command_buffers(graphics_pool, 2)?;

        created.keep();
        log::debug!("Created frame slot {}", index);

        Ok(Self {
            index,
            timeline,
            compute_pool,
            graphics_pool,
            compute_commands,
            graphics_commands: graphics[0],
            present_commands: graphics[1],
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn timeline(&self) -> &FrameTimeline {
        &self.timeline
    }

    #[inline]
    pub fn timeline_mut(&mut self) -> &mut FrameTimeline {
        &mut self.timeline
    }

    pub fn command_buffer(&self, stage: StageCommands) -> vk::CommandBuffer {
        match stage {
            StageCommands::Compute => self.compute_commands,
            StageCommands::Graphics => self.graphics_commands,
            StageCommands::PresentCopy => self.present_commands,
        }
    }

    /// Release the slot. Pools free their command buffers with them.
    pub fn destroy<G: GpuContext>(self, gpu: &G, idle: &QueuesIdle) {
        gpu.destroy_command_pool(self.compute_pool, idle);
        gpu.destroy_command_pool(self.graphics_pool, idle);
        gpu.destroy_semaphore(self.timeline.semaphore(), idle);
        log::debug!("Destroyed frame slot {}", self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::mock::{MockGpu, ObjectKind};

    #[test]
    fn double_buffered_round_robin() {
        let slots = SlotAllocator::new(2);
        let assigned: Vec<usize> = (0..7).map(|f| slots.slot_for(f)).collect();
        assert_eq!(assigned, vec![0, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn every_slot_revisited_every_n_frames() {
        let slots = SlotAllocator::new(3);
        for frame in 0..30u64 {
            assert_eq!(slots.slot_for(frame), slots.slot_for(frame + 3));
            assert_ne!(slots.slot_for(frame), slots.slot_for(frame + 1));
        }
    }

    #[test]
    fn zero_slots_clamps_to_one() {
        let slots = SlotAllocator::new(0);
        assert_eq!(slots.count(), 1);
        assert_eq!(slots.slot_for(41), 0);
    }

    #[test]
    fn failed_creation_releases_what_was_built() {
        for (kind, nth) in [(ObjectKind::Timeline, 1), (ObjectKind::Pool, 1), (ObjectKind::Pool, 2)] {
            let gpu = MockGpu::new();
            gpu.fail_creation(kind, nth);

            assert!(FrameSlot::new(&*gpu, 0, 2).is_err());
            assert_eq!(gpu.live_objects(), 0, "{:?} #{}", kind, nth);
            assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
        }
    }
}
