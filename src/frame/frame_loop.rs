// Frame loop - one frame cycle through the timeline protocol
//
// FRAME CYCLE (slot S = frame % N):
// ┌────────────────────────────────────────────────────────────────────────┐
// │ wait S vacant ─> compute ─signal 1─> graphics ─signal 2─> acquire      │
// │ (CPU blocks)     (compute queue)     (graphics queue)     (binary sem) │
// │                                                                        │
// │ ─> copy + present ─signal 3 + present-wait─> present ─> advance        │
// └────────────────────────────────────────────────────────────────────────┘
//
// The only CPU blocking points are the vacancy wait, swapchain acquisition
// and the queue-idle wait at shutdown.

use ash::vk;
use std::sync::Arc;

use super::gpu::{GpuContext, QueueRole, QueuesIdle};
use super::present::{AcquireMode, PresentStatus, PresentSurface, PresentationGate};
use super::slot::{FrameSlot, SlotAllocator, StageCommands};
use super::submit::{ShutdownSignal, StageSubmitter, StageSync, SubmitOutcome};
use super::timeline::{FrameTimeline, Stage};
use crate::error::{SyncError, SyncResult};

/// Producer of one stage's GPU work.
pub trait StageTask {
    /// Record the stage's commands for `slot` into `command_buffer`, which
    /// has been reset and is no longer used by the GPU.
    fn record(&mut self, slot: usize, frame_index: u64, command_buffer: vk::CommandBuffer) -> SyncResult<()>;

    /// Image holding the stage's result for `slot`, if any.
    fn output(&self, _slot: usize) -> Option<vk::Image> {
        None
    }
}

/// Frame loop construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct FrameLoopSettings {
    pub frames_in_flight: usize,
    pub acquire_mode: AcquireMode,
    /// Timeout for every CPU wait, `u64::MAX` waits forever
    pub timeout_ns: u64,
}

impl Default for FrameLoopSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            acquire_mode: AcquireMode::Timeline,
            timeout_ns: u64::MAX,
        }
    }
}

/// What happened to a frame that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Shutdown was requested while the frame was being submitted
    Skipped,
}

/// Drives frames through the compute → graphics → present pipeline.
pub struct FrameLoop<G: GpuContext> {
    gpu: Arc<G>,
    allocator: SlotAllocator,
    slots: Vec<FrameSlot>,
    gate: Option<PresentationGate>,
    submitter: StageSubmitter<G>,
    shutdown: ShutdownSignal,
    frame_index: u64,
    timeout_ns: u64,
}

impl<G: GpuContext> FrameLoop<G> {
    pub fn new(gpu: Arc<G>, settings: FrameLoopSettings) -> SyncResult<Self> {
        let allocator = SlotAllocator::new(settings.frames_in_flight);

        let mut slots = Vec::with_capacity(allocator.count());
        for index in 0..allocator.count() {
            match FrameSlot::new(&*gpu, index, allocator.count()) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    Self::release_slots(&*gpu, slots);
                    return Err(e);
                }
            }
        }

        let gate = match PresentationGate::new(&*gpu, allocator.count(), settings.acquire_mode, settings.timeout_ns) {
            Ok(gate) => gate,
            Err(e) => {
                Self::release_slots(&*gpu, slots);
                return Err(e);
            }
        };
        let shutdown = ShutdownSignal::new();
        let submitter = StageSubmitter::new(gpu.clone(), shutdown.clone());

        log::info!("Frame loop ready: {} frames in flight", allocator.count());

        Ok(Self {
            gpu,
            allocator,
            slots,
            gate: Some(gate),
            submitter,
            shutdown,
            frame_index: 0,
            timeout_ns: settings.timeout_ns,
        })
    }

    /// Index of the next frame to run.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.allocator.count()
    }

    /// Slot the next frame will occupy.
    #[inline]
    pub fn current_frame_in_flight_index(&self) -> usize {
        self.allocator.slot_for(self.frame_index)
    }

    /// Timeline of the slot the next frame will occupy.
    pub fn current_timeline(&self) -> &FrameTimeline {
        self.slots[self.current_frame_in_flight_index()].timeline()
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Handle that stops all further submissions when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> SyncResult<QueuesIdle> {
        self.gpu.wait_idle()
    }

    /// Run one frame: compute, graphics, then copy + present.
    ///
    /// Swapchain staleness is reported as `SyncError::SwapchainStale` after
    /// the frame has been retired, so the loop stays consistent and the
    /// caller only needs to recreate the swapchain. A frame whose
    /// submissions fail part way is retired the same way before the error
    /// is returned; one that failed before anything reached a queue keeps
    /// its frame index and is run again by the next call.
    pub fn run_frame<S: PresentSurface>(
        &mut self,
        surface: &S,
        compute: &mut dyn StageTask,
        graphics: &mut dyn StageTask,
    ) -> SyncResult<FrameOutcome> {
        if self.shutdown.is_triggered() || self.gate.is_none() {
            return Err(SyncError::ShuttingDown);
        }

        let mut slot_index = self.allocator.slot_for(self.frame_index);
        if self.slots[slot_index].timeline().in_progress() {
            // An earlier frame failed part way and could not be retired then
            self.retire_current(slot_index)?;
            self.advance(slot_index);
            slot_index = self.allocator.slot_for(self.frame_index);
        }
        let frame_index = self.frame_index;

        let status = self.submit_stages(slot_index, surface, compute, graphics);
        if let Err(err) = &status {
            log::debug!("Frame {} failed: {}", frame_index, err);
            if self.slots[slot_index].timeline().in_progress() {
                if let Err(retire_err) = self.retire_current(slot_index) {
                    log::warn!("Failed to retire frame {}: {}", frame_index, retire_err);
                }
            }
        }
        self.advance(slot_index);

        match status? {
            PresentStatus::Presented => Ok(FrameOutcome::Presented),
            PresentStatus::Skipped => Ok(FrameOutcome::Skipped),
            PresentStatus::Stale(staleness) => Err(SyncError::SwapchainStale(staleness)),
        }
    }

    fn submit_stages<S: PresentSurface>(
        &mut self,
        slot_index: usize,
        surface: &S,
        compute: &mut dyn StageTask,
        graphics: &mut dyn StageTask,
    ) -> SyncResult<PresentStatus> {
        let gate = self.gate.as_mut().ok_or(SyncError::ShuttingDown)?;
        let slot = &mut self.slots[slot_index];
        let frame_index = self.frame_index;
        debug_assert_eq!(slot.index(), slot_index);
        debug_assert_eq!(slot.timeline().frame_index(), frame_index);

        // ─────────────────────────────────────────────────────────────────
        // Back-pressure: the slot's previous occupant must have drained
        // before any of its resources are touched
        // ─────────────────────────────────────────────────────────────────
        let vacancy = slot.timeline().vacancy_point();
        self.gpu.wait_until_reached(vacancy.semaphore(), vacancy.value(), self.timeout_ns)?;

        // ─────────────────────────────────────────────────────────────────
        // Compute
        // ─────────────────────────────────────────────────────────────────
        let cmd = slot.command_buffer(StageCommands::Compute);
        self.gpu.reset_command_buffer(cmd)?;
        compute.record(slot_index, frame_index, cmd)?;

        let outcome = submit_stage(
            &self.submitter,
            QueueRole::Compute,
            cmd,
            None,
            slot.timeline_mut(),
            Stage::ComputeFinished,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        )?;
        if outcome == SubmitOutcome::Skipped {
            return Ok(PresentStatus::Skipped);
        }

        // ─────────────────────────────────────────────────────────────────
        // Graphics (samples the compute output)
        // ─────────────────────────────────────────────────────────────────
        let cmd = slot.command_buffer(StageCommands::Graphics);
        self.gpu.reset_command_buffer(cmd)?;
        graphics.record(slot_index, frame_index, cmd)?;

        let compute_wait = slot.timeline().wait_point(Stage::ComputeFinished)?;
        let outcome = submit_stage(
            &self.submitter,
            QueueRole::Graphics,
            cmd,
            Some(StageSync::new(compute_wait, vk::PipelineStageFlags2::FRAGMENT_SHADER)),
            slot.timeline_mut(),
            Stage::GraphicsFinished,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        )?;
        if outcome == SubmitOutcome::Skipped {
            return Ok(PresentStatus::Skipped);
        }

        // ─────────────────────────────────────────────────────────────────
        // Acquire, copy and present
        // ─────────────────────────────────────────────────────────────────
        let source = graphics
            .output(slot_index)
            .ok_or_else(|| SyncError::Record("graphics stage produced no output image".into()))?;

        let acquired = gate.acquire(&*self.gpu, surface, slot)?;
        gate.copy_and_present(&*self.gpu, &self.submitter, surface, slot, source, acquired)
    }

    /// Close the current occupant's cycle with an empty submission.
    fn retire_current(&mut self, slot_index: usize) -> SyncResult<()> {
        let gate = self.gate.as_mut().ok_or(SyncError::ShuttingDown)?;
        gate.retire(&self.submitter, &mut self.slots[slot_index])?;
        Ok(())
    }

    /// Move on to the next frame once the slot's current cycle scheduled
    /// SAFE_TO_PRESENT.
    fn advance(&mut self, slot_index: usize) {
        if self.slots[slot_index].timeline_mut().advance_frame().is_ok() {
            self.frame_index += 1;
        }
    }

    /// Replace the presentation semaphores after swapchain recreation.
    pub fn recreate_present_sync(&mut self, idle: &QueuesIdle) -> SyncResult<()> {
        match self.gate.as_mut() {
            Some(gate) => gate.recreate_sync_objects(&*self.gpu, idle),
            None => Err(SyncError::ShuttingDown),
        }
    }

    /// Release slots of a loop that failed to construct. Nothing was
    /// submitted, so the queues are idle.
    fn release_slots(gpu: &G, slots: Vec<FrameSlot>) {
        match gpu.wait_idle() {
            Ok(idle) => {
                for slot in slots {
                    slot.destroy(gpu, &idle);
                }
            }
            Err(e) => log::error!("Leaking {} frame slots: {}", slots.len(), e),
        }
    }

    /// Stop submitting, wait for the queues to drain and release every
    /// slot resource.
    pub fn shutdown(mut self) -> SyncResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> SyncResult<()> {
        self.shutdown.trigger();
        if self.gate.is_none() && self.slots.is_empty() {
            return Ok(());
        }

        log::info!("Shutting down frame loop after {} frames", self.frame_index);
        let idle = self.gpu.wait_idle()?;

        for slot in self.slots.drain(..) {
            slot.destroy(&*self.gpu, &idle);
        }
        if let Some(gate) = self.gate.take() {
            gate.destroy(&*self.gpu, &idle);
        }
        Ok(())
    }
}

/// Reserve `stage` on `timeline` and submit `command_buffer` to signal it.
///
/// The reservation is handed back if the submission fails, so nothing ever
/// waits on a value no queue will signal.
fn submit_stage<G: GpuContext>(
    submitter: &StageSubmitter<G>,
    queue: QueueRole,
    command_buffer: vk::CommandBuffer,
    wait: Option<StageSync>,
    timeline: &mut FrameTimeline,
    stage: Stage,
    stage_mask: vk::PipelineStageFlags2,
) -> SyncResult<SubmitOutcome> {
    let done = timeline.signal_point(stage)?;
    submitter
        .submit(queue, command_buffer, wait, StageSync::new(done, stage_mask))
        .map_err(|e| {
            timeline.release(done);
            e
        })
}

impl<G: GpuContext> Drop for FrameLoop<G> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            // Resources are leaked rather than destroyed while in use
            log::error!("Frame loop teardown failed: {}", e);
        }
    }
}
