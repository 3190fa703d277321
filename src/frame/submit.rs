// Stage submitter - timeline-ordered queue submissions
//
// Cross-queue ordering comes only from the wait/signal values attached to
// each submission, never from the order in which submissions are made.

use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::gpu::{GpuContext, QueueRole, SemaphoreOp, Submission};
use super::timeline::TimelinePoint;
use crate::error::SyncResult;

/// Process-wide "stop submitting" flag, shared by the frame loop and its
/// submitter.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Dropped because shutdown was requested
    Skipped,
}

/// A timeline wait or signal paired with the pipeline stages it guards.
#[derive(Debug, Clone, Copy)]
pub struct StageSync {
    pub point: TimelinePoint,
    pub stage_mask: vk::PipelineStageFlags2,
}

impl StageSync {
    pub fn new(point: TimelinePoint, stage_mask: vk::PipelineStageFlags2) -> Self {
        Self { point, stage_mask }
    }

    pub(crate) fn op(&self) -> SemaphoreOp {
        SemaphoreOp {
            semaphore: self.point.semaphore(),
            value: self.point.value(),
            stage_mask: self.stage_mask,
        }
    }
}

/// Submits recorded stage work to the right hardware queue.
pub struct StageSubmitter<G: GpuContext> {
    gpu: Arc<G>,
    shutdown: ShutdownSignal,
}

impl<G: GpuContext> StageSubmitter<G> {
    pub fn new(gpu: Arc<G>, shutdown: ShutdownSignal) -> Self {
        Self { gpu, shutdown }
    }

    /// Submit `command_buffer` so it starts (up to the wait's stage mask)
    /// only after `wait` is reached, and reaches `signal` once done.
    pub fn submit(
        &self,
        queue: QueueRole,
        command_buffer: vk::CommandBuffer,
        wait: Option<StageSync>,
        signal: StageSync,
    ) -> SyncResult<SubmitOutcome> {
        let submission = Submission {
            command_buffers: vec![command_buffer],
            waits: wait.iter().map(StageSync::op).collect(),
            signals: vec![signal.op()],
            fence: vk::Fence::null(),
        };
        self.submit_raw(queue, &submission)
    }

    /// Submit an already assembled submission (mixed binary/timeline
    /// semaphores, optional fence).
    pub fn submit_raw(&self, queue: QueueRole, submission: &Submission) -> SyncResult<SubmitOutcome> {
        if self.shutdown.is_triggered() {
            log::debug!("Shutdown requested, skipping {:?} submission", queue);
            return Ok(SubmitOutcome::Skipped);
        }

        self.gpu.submit(queue, submission).map_err(|e| {
            log::error!("{:?} queue submission failed: {}", queue, e);
            e
        })?;

        Ok(SubmitOutcome::Submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::mock::{Event, MockGpu};
    use crate::frame::timeline::{FrameTimeline, Stage};
    use ash::vk::Handle;

    fn new_timeline(gpu: &MockGpu) -> FrameTimeline {
        FrameTimeline::new(gpu.create_timeline_semaphore(0).unwrap(), 0, 2)
    }

    #[test]
    fn submission_carries_wait_and_signal_values() {
        let gpu = MockGpu::new();
        let submitter = StageSubmitter::new(gpu.clone(), ShutdownSignal::new());
        let mut timeline = new_timeline(&gpu);
        let cmd = vk::CommandBuffer::from_raw(0x77);

        let done = timeline.signal_point(Stage::ComputeFinished).unwrap();
        let outcome = submitter
            .submit(QueueRole::Compute, cmd, None, StageSync::new(done, vk::PipelineStageFlags2::COMPUTE_SHADER))
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Submitted);

        let wait = timeline.wait_point(Stage::ComputeFinished).unwrap();
        let done = timeline.signal_point(Stage::GraphicsFinished).unwrap();
        submitter
            .submit(
                QueueRole::Graphics,
                cmd,
                Some(StageSync::new(wait, vk::PipelineStageFlags2::FRAGMENT_SHADER)),
                StageSync::new(done, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
            )
            .unwrap();

        let semaphore = timeline.semaphore();
        let submits: Vec<Event> = gpu
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Submit { .. }))
            .collect();
        assert_eq!(
            submits,
            vec![
                Event::Submit {
                    queue: QueueRole::Compute,
                    command_buffers: vec![cmd],
                    waits: vec![],
                    signals: vec![(semaphore, 1)],
                },
                Event::Submit {
                    queue: QueueRole::Graphics,
                    command_buffers: vec![cmd],
                    waits: vec![(semaphore, 1)],
                    signals: vec![(semaphore, 2)],
                },
            ]
        );
        assert_eq!(gpu.counter(semaphore), 2);
    }

    #[test]
    fn graphics_submitted_first_still_runs_after_compute() {
        let gpu = MockGpu::new();
        let submitter = StageSubmitter::new(gpu.clone(), ShutdownSignal::new());
        let mut timeline = new_timeline(&gpu);
        let cmd = vk::CommandBuffer::from_raw(0x77);

        let compute_done = timeline.signal_point(Stage::ComputeFinished).unwrap();
        let wait = timeline.wait_point(Stage::ComputeFinished).unwrap();
        let graphics_done = timeline.signal_point(Stage::GraphicsFinished).unwrap();

        submitter
            .submit(
                QueueRole::Graphics,
                cmd,
                Some(StageSync::new(wait, vk::PipelineStageFlags2::FRAGMENT_SHADER)),
                StageSync::new(graphics_done, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
            )
            .unwrap();
        assert_eq!(gpu.counter(timeline.semaphore()), 0);
        assert_eq!(gpu.pending_submissions(), 1);

        submitter
            .submit(
                QueueRole::Compute,
                cmd,
                None,
                StageSync::new(compute_done, vk::PipelineStageFlags2::COMPUTE_SHADER),
            )
            .unwrap();
        assert_eq!(gpu.executed_signals(timeline.semaphore()), vec![1, 2]);
    }

    #[test]
    fn skips_after_shutdown() {
        let gpu = MockGpu::new();
        let shutdown = ShutdownSignal::new();
        let submitter = StageSubmitter::new(gpu.clone(), shutdown.clone());
        let mut timeline = new_timeline(&gpu);

        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let done = timeline.signal_point(Stage::ComputeFinished).unwrap();
        let outcome = submitter
            .submit(
                QueueRole::Compute,
                vk::CommandBuffer::from_raw(0x77),
                None,
                StageSync::new(done, vk::PipelineStageFlags2::COMPUTE_SHADER),
            )
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Skipped);
        assert_eq!(gpu.submissions(), 0);
    }
}
