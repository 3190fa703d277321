// Frame timeline - per-slot counting semaphore bookkeeping
//
// Every frame reserves STAGE_COUNT - 1 consecutive values on its slot's
// timeline semaphore, one per stage:
//
//   frame f:  f*3+1 (compute done) | f*3+2 (graphics done) | f*3+3 (safe to present)
//
// Frame f's "safe to present" value equals frame f+1's UNINITIALIZED value,
// so waiting on a frame's UNINITIALIZED value means "the previous frame on
// this counter has fully drained".

use ash::vk;

use crate::error::{SyncError, SyncResult};

/// Ordered phases of a frame's GPU work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u64)]
pub enum Stage {
    /// Initial semaphore value, never signaled
    Uninitialized = 0,
    ComputeFinished = 1,
    GraphicsFinished = 2,
    /// Terminal stage: the slot may be reused once this is reached
    SafeToPresent = 3,
}

impl Stage {
    /// Stages that may be used as signal targets, in execution order.
    pub const SIGNALED: [Stage; 3] = [Stage::ComputeFinished, Stage::GraphicsFinished, Stage::SafeToPresent];
}

/// Number of stages, including [`Stage::Uninitialized`].
pub const STAGE_COUNT: u64 = 4;

const VALUES_PER_FRAME: u64 = STAGE_COUNT - 1;

/// Timeline value of `stage` for the given logical frame index.
pub const fn timeline_value(frame_index: u64, stage: Stage) -> u64 {
    frame_index * VALUES_PER_FRAME + stage as u64
}

/// An absolute point on one slot's timeline.
///
/// Only [`FrameTimeline`] hands these out, which is what keeps wait and
/// signal values consistent with the frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelinePoint {
    semaphore: vk::Semaphore,
    value: u64,
}

impl TimelinePoint {
    #[inline]
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }
}

/// The counter owned by one frame-in-flight slot.
#[derive(Debug)]
pub struct FrameTimeline {
    semaphore: vk::Semaphore,
    /// Global frame number of the slot's current occupant
    frame_index: u64,
    /// Distance between two occupants of the slot (frames in flight)
    stride: u64,
    /// Highest value any issued signal point will bring the counter to
    scheduled: u64,
}

impl FrameTimeline {
    /// Wrap a timeline semaphore created with initial value 0.
    ///
    /// `first_frame` is the global index of the slot's first occupant and
    /// `stride` the number of slots sharing the frame sequence.
    pub fn new(semaphore: vk::Semaphore, first_frame: u64, stride: u64) -> Self {
        Self {
            semaphore,
            frame_index: first_frame,
            stride: stride.max(1),
            scheduled: Stage::Uninitialized as u64,
        }
    }

    #[inline]
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Global frame number of the slot's current occupant.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Value of `stage` for the current occupant.
    #[inline]
    pub fn value(&self, stage: Stage) -> u64 {
        timeline_value(self.frame_index, stage)
    }

    /// Highest value scheduled to be signaled so far.
    #[inline]
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }

    /// The point at which the previous occupant has fully drained.
    ///
    /// For the slot's first occupant this is the semaphore's initial value.
    pub fn vacancy_point(&self) -> TimelinePoint {
        let value = if self.frame_index >= self.stride {
            timeline_value(self.frame_index - self.stride, Stage::SafeToPresent)
        } else {
            Stage::Uninitialized as u64
        };
        TimelinePoint { semaphore: self.semaphore, value }
    }

    /// Reserve the signal value of `stage` for the current occupant.
    pub fn signal_point(&mut self, stage: Stage) -> SyncResult<TimelinePoint> {
        let value = self.value(stage);
        if stage == Stage::Uninitialized || value <= self.scheduled {
            return Err(SyncError::StaleSignal { value, scheduled: self.scheduled });
        }
        self.scheduled = value;
        Ok(TimelinePoint { semaphore: self.semaphore, value })
    }

    /// Hand back `point` after the submission that was to signal it failed.
    ///
    /// Only the most recent reservation can be released; anything else is
    /// left untouched.
    pub fn release(&mut self, point: TimelinePoint) {
        let floor = self.vacancy_point().value();
        if point.semaphore != self.semaphore || point.value != self.scheduled || point.value <= floor {
            return;
        }
        // Stages of one occupant are consecutive values
        self.scheduled = if point.value == self.value(Stage::ComputeFinished) {
            floor
        } else {
            point.value - 1
        };
    }

    /// The latest scheduled value, or the vacancy point if the current
    /// occupant has not reserved anything yet.
    pub fn scheduled_point(&self) -> TimelinePoint {
        TimelinePoint {
            semaphore: self.semaphore,
            value: self.scheduled,
        }
    }

    /// Whether the current occupant reserved some stages but not its
    /// terminal one.
    pub fn in_progress(&self) -> bool {
        self.scheduled > self.vacancy_point().value() && self.scheduled < self.value(Stage::SafeToPresent)
    }

    /// Wait point for `stage` of the current occupant.
    ///
    /// The stage must already have a scheduled signal, otherwise the wait
    /// could never complete.
    pub fn wait_point(&self, stage: Stage) -> SyncResult<TimelinePoint> {
        let value = self.value(stage);
        if value > self.scheduled {
            return Err(SyncError::UnreachableWait { value, scheduled: self.scheduled });
        }
        Ok(TimelinePoint { semaphore: self.semaphore, value })
    }

    /// Move to the slot's next occupant.
    ///
    /// Must be called once per cycle, after SAFE_TO_PRESENT was scheduled.
    pub fn advance_frame(&mut self) -> SyncResult<()> {
        if self.scheduled < self.value(Stage::SafeToPresent) {
            return Err(SyncError::IncompleteCycle { frame: self.frame_index });
        }
        self.frame_index += self.stride;
        Ok(())
    }
}
