// Presentation gate - timeline protocol meets swapchain acquire/present
//
// Swapchain acquisition can only signal binary semaphores or fences, and
// presentation can only wait on binary semaphores. The gate owns those
// binary objects (acquire side per slot, present side per swapchain image)
// and translates between them and the slot's timeline, so nothing else in
// the frame core sees them.
//
// Two acquire lifecycles are supported:
// - Timeline: wait for the slot's previous SAFE_TO_PRESENT value, then acquire
// - Fence:    wait + reset the slot's acquire fence, then acquire; the copy
//             submission signals the fence again

use ash::vk;

use super::gpu::{GpuContext, PartialObjects, PresentCopy, QueueRole, QueuesIdle, SemaphoreOp, Submission};
use super::slot::{FrameSlot, StageCommands};
use super::submit::{StageSubmitter, SubmitOutcome};
use super::timeline::Stage;
use crate::error::{Staleness, SyncError, SyncResult};

/// How the gate makes sure a slot's previous present finished before
/// acquiring for it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquireMode {
    #[default]
    Timeline,
    Fence,
}

/// Swapchain side of presentation, consumed by the gate.
pub trait PresentSurface {
    /// Presentable images, indexed by acquired image index.
    fn images(&self) -> &[vk::Image];

    fn extent(&self) -> vk::Extent2D;

    /// Acquire the next image, signaling `signal` once it may be written.
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(&self, timeout_ns: u64, signal: vk::Semaphore) -> SyncResult<(u32, bool)>;

    /// Queue `image_index` for presentation after `wait` is signaled.
    /// Returns whether the swapchain is suboptimal.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> SyncResult<bool>;
}

/// A swapchain image acquired for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub suboptimal: bool,
}

/// Result of [`PresentationGate::copy_and_present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented (or dropped by the platform); the swapchain needs recreation
    Stale(Staleness),
    /// Shutdown was requested, nothing was submitted or presented
    Skipped,
}

/// Binary synchronization objects of one slot.
struct PresentSync {
    image_acquired: vk::Semaphore,
    acquire_fence: Option<vk::Fence>,
    /// Acquire fence was reset and the next submission must signal it
    fence_armed: bool,
    /// `image_acquired` was signaled and no submission waited on it yet
    acquire_pending: bool,
}

impl PresentSync {
    fn new<G: GpuContext>(created: &mut PartialObjects<'_, G>, mode: AcquireMode) -> SyncResult<Self> {
        let acquire_fence = match mode {
            // Signaled so the first wait on each slot returns immediately
            AcquireMode::Fence => Some(created.fence(true)?),
            AcquireMode::Timeline => None,
        };
        Ok(Self {
            image_acquired: created.binary_semaphore()?,
            acquire_fence,
            fence_armed: false,
            acquire_pending: false,
        })
    }

    /// Fence to attach to the slot's final submission, disarming it.
    fn take_fence(&mut self) -> vk::Fence {
        let armed = std::mem::take(&mut self.fence_armed);
        match self.acquire_fence {
            Some(fence) if armed => fence,
            _ => vk::Fence::null(),
        }
    }

    /// Undo [`PresentSync::take_fence`] after the submission failed.
    fn restore_fence(&mut self, fence: vk::Fence) {
        self.fence_armed = fence != vk::Fence::null();
    }

    fn destroy<G: GpuContext>(self, gpu: &G, idle: &QueuesIdle) {
        gpu.destroy_semaphore(self.image_acquired, idle);
        if let Some(fence) = self.acquire_fence {
            gpu.destroy_fence(fence, idle);
        }
    }
}

/// Adapter between the frame timeline and swapchain presentation.
///
/// Acquire semaphores and fences belong to frame slots. Present-wait
/// semaphores belong to swapchain images: an image is only handed out again
/// after its previous presentation consumed the semaphore.
pub struct PresentationGate {
    mode: AcquireMode,
    slots: Vec<PresentSync>,
    /// Indexed by swapchain image, created on first use
    present_waits: Vec<vk::Semaphore>,
    timeout_ns: u64,
}

impl PresentationGate {
    pub fn new<G: GpuContext>(gpu: &G, slot_count: usize, mode: AcquireMode, timeout_ns: u64) -> SyncResult<Self> {
        let slots = Self::create_slots(gpu, slot_count.max(1), mode)?;

        log::info!("Presentation gate: {:?}-gated acquisition, {} slots", mode, slots.len());

        Ok(Self {
            mode,
            slots,
            present_waits: Vec::new(),
            timeout_ns,
        })
    }

    fn create_slots<G: GpuContext>(gpu: &G, count: usize, mode: AcquireMode) -> SyncResult<Vec<PresentSync>> {
        let mut created = PartialObjects::new(gpu);
        let slots = (0..count)
            .map(|_| PresentSync::new(&mut created, mode))
            .collect::<SyncResult<Vec<_>>>()?;
        created.keep();
        Ok(slots)
    }

    #[inline]
    pub fn mode(&self) -> AcquireMode {
        self.mode
    }

    /// Wait until `slot` may present again, then acquire an image.
    pub fn acquire<G: GpuContext, S: PresentSurface>(
        &mut self,
        gpu: &G,
        surface: &S,
        slot: &FrameSlot,
    ) -> SyncResult<AcquiredImage> {
        let sync = &mut self.slots[slot.index()];

        match (self.mode, sync.acquire_fence) {
            (AcquireMode::Fence, Some(fence)) => {
                gpu.wait_and_reset_fence(fence, self.timeout_ns)?;
                sync.fence_armed = true;
            }
            _ => {
                let vacancy = slot.timeline().vacancy_point();
                gpu.wait_until_reached(vacancy.semaphore(), vacancy.value(), self.timeout_ns)?;
            }
        }

        let (index, suboptimal) = surface.acquire_next_image(self.timeout_ns, sync.image_acquired)?;
        sync.acquire_pending = true;
        let image = surface
            .images()
            .get(index as usize)
            .copied()
            .ok_or(SyncError::Vulkan(vk::Result::ERROR_UNKNOWN))?;

        Ok(AcquiredImage { index, image, suboptimal })
    }

    /// Copy `source` into the acquired image and present it.
    ///
    /// The slot's present-copy command buffer must be idle. The copy waits
    /// on GRAPHICS_FINISHED and the acquire signal, and signals
    /// SAFE_TO_PRESENT together with the image's present-wait semaphore.
    /// If the submission fails, SAFE_TO_PRESENT is released again and the
    /// frame has to be retired.
    pub fn copy_and_present<G: GpuContext, S: PresentSurface>(
        &mut self,
        gpu: &G,
        submitter: &StageSubmitter<G>,
        surface: &S,
        slot: &mut FrameSlot,
        source: vk::Image,
        acquired: AcquiredImage,
    ) -> SyncResult<PresentStatus> {
        let present_wait = self.present_wait(gpu, acquired.index)?;

        let command_buffer = slot.command_buffer(StageCommands::PresentCopy);
        let copy = PresentCopy {
            source,
            destination: acquired.image,
            extent: surface.extent(),
        };
        gpu.reset_command_buffer(command_buffer)?;
        gpu.record_present_copy(command_buffer, &copy)?;

        let sync = &mut self.slots[slot.index()];
        let timeline = slot.timeline_mut();
        let graphics_done = timeline.wait_point(Stage::GraphicsFinished)?;
        let safe_to_present = timeline.signal_point(Stage::SafeToPresent)?;
        let fence = sync.take_fence();

        let submission = Submission {
            command_buffers: vec![command_buffer],
            waits: vec![
                SemaphoreOp {
                    semaphore: graphics_done.semaphore(),
                    value: graphics_done.value(),
                    stage_mask: vk::PipelineStageFlags2::TRANSFER,
                },
                SemaphoreOp {
                    semaphore: sync.image_acquired,
                    value: 0,
                    stage_mask: vk::PipelineStageFlags2::TRANSFER,
                },
            ],
            signals: vec![
                SemaphoreOp {
                    semaphore: present_wait,
                    value: 0,
                    stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                },
                SemaphoreOp {
                    semaphore: safe_to_present.semaphore(),
                    value: safe_to_present.value(),
                    stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                },
            ],
            fence,
        };

        let outcome = match submitter.submit_raw(QueueRole::Graphics, &submission) {
            Ok(outcome) => outcome,
            Err(e) => {
                timeline.release(safe_to_present);
                sync.restore_fence(fence);
                return Err(e);
            }
        };

        if outcome == SubmitOutcome::Skipped {
            // Nothing will signal present_wait, so presenting would hang
            return Ok(PresentStatus::Skipped);
        }
        sync.acquire_pending = false;

        match surface.present(acquired.index, present_wait) {
            Ok(suboptimal) if suboptimal || acquired.suboptimal => Ok(PresentStatus::Stale(Staleness::Suboptimal)),
            Ok(_) => Ok(PresentStatus::Presented),
            Err(SyncError::SwapchainStale(staleness)) => Ok(PresentStatus::Stale(staleness)),
            Err(e) => Err(e),
        }
    }

    /// Complete a frame whose submissions stopped before the present copy.
    ///
    /// An empty submission waits on the latest scheduled value (and on an
    /// acquired image nothing consumed) and signals SAFE_TO_PRESENT plus the
    /// acquire fence, so the next occupant of the slot does not wait forever.
    /// On failure the reservation is released and the slot stays as it was.
    pub fn retire<G: GpuContext>(
        &mut self,
        submitter: &StageSubmitter<G>,
        slot: &mut FrameSlot,
    ) -> SyncResult<SubmitOutcome> {
        let sync = &mut self.slots[slot.index()];
        let timeline = slot.timeline_mut();
        let last = timeline.scheduled_point();
        let safe_to_present = timeline.signal_point(Stage::SafeToPresent)?;
        let fence = sync.take_fence();

        let mut waits = vec![SemaphoreOp {
            semaphore: last.semaphore(),
            value: last.value(),
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
        }];
        if sync.acquire_pending {
            waits.push(SemaphoreOp {
                semaphore: sync.image_acquired,
                value: 0,
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            });
        }

        let submission = Submission {
            command_buffers: Vec::new(),
            waits,
            signals: vec![SemaphoreOp {
                semaphore: safe_to_present.semaphore(),
                value: safe_to_present.value(),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            }],
            fence,
        };

        let outcome = match submitter.submit_raw(QueueRole::Graphics, &submission) {
            Ok(outcome) => outcome,
            Err(e) => {
                timeline.release(safe_to_present);
                sync.restore_fence(fence);
                return Err(e);
            }
        };
        if outcome == SubmitOutcome::Submitted {
            sync.acquire_pending = false;
        }
        log::debug!("Retired frame {} without presenting", timeline.frame_index());
        Ok(outcome)
    }

    /// Replace every binary semaphore and fence, e.g. after the swapchain
    /// was recreated and a semaphore may have been left signaled.
    ///
    /// The old objects are only released once their replacements exist.
    pub fn recreate_sync_objects<G: GpuContext>(&mut self, gpu: &G, idle: &QueuesIdle) -> SyncResult<()> {
        let slots = Self::create_slots(gpu, self.slots.len(), self.mode)?;
        for sync in std::mem::replace(&mut self.slots, slots) {
            sync.destroy(gpu, idle);
        }
        for semaphore in self.present_waits.drain(..) {
            gpu.destroy_semaphore(semaphore, idle);
        }
        Ok(())
    }

    pub fn destroy<G: GpuContext>(self, gpu: &G, idle: &QueuesIdle) {
        for sync in self.slots {
            sync.destroy(gpu, idle);
        }
        for semaphore in self.present_waits {
            gpu.destroy_semaphore(semaphore, idle);
        }
    }

    /// Present-wait semaphore of swapchain image `image_index`.
    fn present_wait<G: GpuContext>(&mut self, gpu: &G, image_index: u32) -> SyncResult<vk::Semaphore> {
        let index = image_index as usize;
        while self.present_waits.len() <= index {
            let semaphore = gpu.create_binary_semaphore()?;
            self.present_waits.push(semaphore);
        }
        Ok(self.present_waits[index])
    }
}
