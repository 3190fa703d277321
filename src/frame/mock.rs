// Simulated GPU for exercising the frame core without a device
//
// Submissions become pending work that executes once all of its waits are
// satisfied. In automatic mode the simulated GPU runs work as soon as it
// is submitted; in manual mode work only runs when the test calls
// `run_gpu`, which lets tests hold frames in flight.
//
// Every GpuContext call is appended to an event log, and protocol
// violations (destroying while not idle, non-monotonic timeline signals,
// double-signaled binary semaphores) are collected instead of panicking.
// Object creation and submissions can be made to fail on demand.

use ash::vk::{self, Handle};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::gpu::{GpuContext, PresentCopy, QueueRole, QueuesIdle, SemaphoreOp, Submission};
use super::present::PresentSurface;
use crate::error::{Staleness, SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ResetCommandBuffer(vk::CommandBuffer),
    RecordPresentCopy(vk::CommandBuffer),
    WaitSemaphore { semaphore: vk::Semaphore, value: u64 },
    WaitFence(vk::Fence),
    Submit {
        queue: QueueRole,
        command_buffers: Vec<vk::CommandBuffer>,
        waits: Vec<(vk::Semaphore, u64)>,
        signals: Vec<(vk::Semaphore, u64)>,
    },
    Execute {
        queue: QueueRole,
        signals: Vec<(vk::Semaphore, u64)>,
    },
    Acquire { image_index: u32 },
    Present { image_index: u32 },
    WaitIdle,
    Destroy(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Timeline,
    Binary,
    Fence,
    Pool,
    CommandBuffer,
}

struct PendingWork {
    queue: QueueRole,
    submission: Submission,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    objects: HashMap<u64, ObjectKind>,
    timelines: HashMap<u64, u64>,
    binaries: HashSet<u64>,
    signaled_fences: HashSet<u64>,
    pending: Vec<PendingWork>,
    events: Vec<Event>,
    violations: Vec<String>,
    idle_confirmed: bool,
    manual: bool,
    /// Remaining creations of a kind before one fails
    creation_failure: Option<(ObjectKind, usize)>,
    submit_calls: usize,
    /// Absolute submit call numbers that fail
    failing_submits: HashSet<usize>,
}

impl MockState {
    fn create(&mut self, kind: ObjectKind) -> SyncResult<u64> {
        if let Some((failing, remaining)) = self.creation_failure.as_mut() {
            if *failing == kind {
                *remaining -= 1;
                if *remaining == 0 {
                    self.creation_failure = None;
                    return Err(SyncError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
                }
            }
        }
        self.next_handle += 1;
        self.objects.insert(self.next_handle, kind);
        Ok(self.next_handle)
    }

    fn is_ready(&self, work: &PendingWork) -> bool {
        work.submission.waits.iter().all(|wait| {
            let raw = wait.semaphore.as_raw();
            match self.objects.get(&raw) {
                Some(ObjectKind::Timeline) => self.timelines.get(&raw).copied().unwrap_or(0) >= wait.value,
                Some(ObjectKind::Binary) => self.binaries.contains(&raw),
                _ => false,
            }
        })
    }

    fn execute(&mut self, work: PendingWork) {
        for wait in &work.submission.waits {
            self.binaries.remove(&wait.semaphore.as_raw());
        }

        let mut signals = Vec::new();
        for signal in &work.submission.signals {
            let raw = signal.semaphore.as_raw();
            match self.objects.get(&raw) {
                Some(ObjectKind::Timeline) => {
                    let current = self.timelines.entry(raw).or_insert(0);
                    if signal.value <= *current {
                        self.violations
                            .push(format!("timeline {} signaled {} at {}", raw, signal.value, current));
                    } else {
                        *current = signal.value;
                    }
                    signals.push((signal.semaphore, signal.value));
                }
                Some(ObjectKind::Binary) => {
                    if !self.binaries.insert(raw) {
                        self.violations.push(format!("binary semaphore {} signaled twice", raw));
                    }
                }
                _ => self.violations.push(format!("signal of unknown semaphore {}", raw)),
            }
        }

        if work.submission.fence != vk::Fence::null() {
            self.signaled_fences.insert(work.submission.fence.as_raw());
        }

        self.events.push(Event::Execute {
            queue: work.queue,
            signals,
        });
    }

    /// Run every pending submission whose waits are satisfied.
    fn drain(&mut self) {
        while let Some(position) = self.pending.iter().position(|work| self.is_ready(work)) {
            let work = self.pending.remove(position);
            self.execute(work);
        }
    }

    fn destroy(&mut self, raw: u64, kind: ObjectKind) {
        if !self.idle_confirmed {
            self.violations.push(format!("object {} destroyed while queues busy", raw));
        }
        match self.objects.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => self.violations.push(format!("destroyed {:?} {} as {:?}", found, raw, kind)),
            None => self.violations.push(format!("double destroy of {}", raw)),
        }
        self.events.push(Event::Destroy(raw));
    }
}

/// Simulated device implementing [`GpuContext`].
#[derive(Default)]
pub struct MockGpu {
    state: Mutex<MockState>,
    progress: Condvar,
    pool_buffers: Mutex<HashMap<u64, Vec<u64>>>,
}

impl MockGpu {
    /// GPU that executes work as soon as its waits are satisfied.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// GPU that only executes work when `run_gpu` is called.
    pub fn manual() -> Arc<Self> {
        let gpu = Self::default();
        gpu.state.lock().manual = true;
        Arc::new(gpu)
    }

    /// Execute every submission that can run.
    pub fn run_gpu(&self) {
        let mut state = self.state.lock();
        state.drain();
        self.progress.notify_all();
    }

    /// Make the `nth` creation of `kind` from now on fail (1 = the next).
    pub fn fail_creation(&self, kind: ObjectKind, nth: usize) {
        self.state.lock().creation_failure = Some((kind, nth.max(1)));
    }

    /// Make the `nth` submission from now on fail (1 = the next). May be
    /// called repeatedly to fail several submissions.
    pub fn fail_submission(&self, nth: usize) {
        let mut state = self.state.lock();
        let call = state.submit_calls + nth.max(1);
        state.failing_submits.insert(call);
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn counter(&self, semaphore: vk::Semaphore) -> u64 {
        self.state.lock().timelines.get(&semaphore.as_raw()).copied().unwrap_or(0)
    }

    /// Objects created and not yet destroyed, command buffers excluded.
    pub fn live_objects(&self) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|kind| **kind != ObjectKind::CommandBuffer)
            .count()
    }

    /// Values executed as signals on `semaphore`, in execution order.
    pub fn executed_signals(&self, semaphore: vk::Semaphore) -> Vec<u64> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Execute { signals, .. } => Some(signals.clone()),
                _ => None,
            })
            .flatten()
            .filter(|(sem, _)| *sem == semaphore)
            .map(|(_, value)| value)
            .collect()
    }

    /// Number of submissions made, executed or not.
    pub fn submissions(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, Event::Submit { .. }))
            .count()
    }

    pub(crate) fn signal_binary(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        if !state.binaries.insert(semaphore.as_raw()) {
            state
                .violations
                .push(format!("acquire signaled busy semaphore {}", semaphore.as_raw()));
        }
        self.progress.notify_all();
    }

    /// Presentation consumes its wait semaphore once it is signaled.
    pub(crate) fn queue_present(&self, image_index: u32, wait: vk::Semaphore) {
        let mut state = self.state.lock();
        state.events.push(Event::Present { image_index });
        state.idle_confirmed = false;
        state.pending.push(PendingWork {
            queue: QueueRole::Graphics,
            submission: Submission {
                waits: vec![SemaphoreOp {
                    semaphore: wait,
                    value: 0,
                    stage_mask: vk::PipelineStageFlags2::NONE,
                }],
                ..Default::default()
            },
        });
        if !state.manual {
            state.drain();
        }
        self.progress.notify_all();
    }

    pub(crate) fn log(&self, event: Event) {
        self.state.lock().events.push(event);
    }

    fn block_until<F>(&self, timeout_ns: u64, what: &'static str, mut reached: F) -> SyncResult<()>
    where
        F: FnMut(&mut MockState) -> bool,
    {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        let mut state = self.state.lock();
        loop {
            if !state.manual {
                state.drain();
            }
            if reached(&mut *state) {
                return Ok(());
            }
            let timed_out = match deadline {
                Some(deadline) => self.progress.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.progress.wait(&mut state);
                    false
                }
            };
            if timed_out && !reached(&mut *state) {
                return Err(SyncError::Timeout { what, timeout_ns });
            }
        }
    }
}

impl GpuContext for MockGpu {
    fn create_timeline_semaphore(&self, initial_value: u64) -> SyncResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let raw = state.create(ObjectKind::Timeline)?;
        state.timelines.insert(raw, initial_value);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn create_binary_semaphore(&self) -> SyncResult<vk::Semaphore> {
        let raw = self.state.lock().create(ObjectKind::Binary)?;
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn create_fence(&self, signaled: bool) -> SyncResult<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.create(ObjectKind::Fence)?;
        if signaled {
            state.signaled_fences.insert(raw);
        }
        Ok(vk::Fence::from_raw(raw))
    }

    fn create_command_pool(&self, _queue: QueueRole) -> SyncResult<vk::CommandPool> {
        let raw = self.state.lock().create(ObjectKind::Pool)?;
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> SyncResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        let raws = (0..count)
            .map(|_| state.create(ObjectKind::CommandBuffer))
            .collect::<SyncResult<Vec<u64>>>()?;
        self.pool_buffers
            .lock()
            .entry(pool.as_raw())
            .or_default()
            .extend(raws.iter().copied());
        Ok(raws.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> SyncResult<()> {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        let in_use = state
            .pending
            .iter()
            .any(|work| work.submission.command_buffers.contains(&command_buffer));
        if in_use {
            state
                .violations
                .push(format!("command buffer {} reset while pending", raw));
        }
        state.events.push(Event::ResetCommandBuffer(command_buffer));
        Ok(())
    }

    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> SyncResult<u64> {
        Ok(self.counter(semaphore))
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> SyncResult<()> {
        self.log(Event::WaitSemaphore { semaphore, value });
        let raw = semaphore.as_raw();
        self.block_until(timeout_ns, "timeline semaphore", |state| {
            state.timelines.get(&raw).copied().unwrap_or(0) >= value
        })
    }

    fn wait_and_reset_fence(&self, fence: vk::Fence, timeout_ns: u64) -> SyncResult<()> {
        self.log(Event::WaitFence(fence));
        let raw = fence.as_raw();
        self.block_until(timeout_ns, "fence", |state| state.signaled_fences.remove(&raw))
    }

    fn submit(&self, queue: QueueRole, submission: &Submission) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.submit_calls += 1;
        let call = state.submit_calls;
        if state.failing_submits.remove(&call) {
            return Err(SyncError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let values = |ops: &[SemaphoreOp]| -> Vec<(vk::Semaphore, u64)> {
            ops.iter().map(|op| (op.semaphore, op.value)).collect()
        };
        state.events.push(Event::Submit {
            queue,
            command_buffers: submission.command_buffers.clone(),
            waits: values(&submission.waits),
            signals: values(&submission.signals),
        });
        state.idle_confirmed = false;
        state.pending.push(PendingWork {
            queue,
            submission: submission.clone(),
        });
        if !state.manual {
            state.drain();
        }
        self.progress.notify_all();
        Ok(())
    }

    fn record_present_copy(&self, command_buffer: vk::CommandBuffer, _copy: &PresentCopy) -> SyncResult<()> {
        self.log(Event::RecordPresentCopy(command_buffer));
        Ok(())
    }

    fn wait_idle(&self) -> SyncResult<QueuesIdle> {
        let mut state = self.state.lock();
        // The device catches up with everything that can run
        state.drain();
        self.progress.notify_all();
        if !state.pending.is_empty() {
            return Err(SyncError::Timeout {
                what: "queue idle",
                timeout_ns: 0,
            });
        }
        state.idle_confirmed = true;
        state.events.push(Event::WaitIdle);
        Ok(QueuesIdle::confirmed())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore, _idle: &QueuesIdle) {
        let mut state = self.state.lock();
        let raw = semaphore.as_raw();
        let kind = state.objects.get(&raw).copied().unwrap_or(ObjectKind::Binary);
        state.destroy(raw, kind);
        state.timelines.remove(&raw);
        state.binaries.remove(&raw);
    }

    fn destroy_fence(&self, fence: vk::Fence, _idle: &QueuesIdle) {
        let mut state = self.state.lock();
        state.destroy(fence.as_raw(), ObjectKind::Fence);
        state.signaled_fences.remove(&fence.as_raw());
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool, _idle: &QueuesIdle) {
        let buffers = self.pool_buffers.lock().remove(&pool.as_raw()).unwrap_or_default();
        let mut state = self.state.lock();
        state.destroy(pool.as_raw(), ObjectKind::Pool);
        for buffer in buffers {
            state.objects.remove(&buffer);
        }
    }
}

/// Simulated swapchain driven by [`MockGpu`].
pub struct MockSurface {
    gpu: Arc<MockGpu>,
    images: Vec<vk::Image>,
    next_image: Mutex<u32>,
    acquire_failures: Mutex<Vec<SyncError>>,
    present_staleness: Mutex<Vec<Staleness>>,
}

impl MockSurface {
    pub fn new(gpu: Arc<MockGpu>, image_count: u32) -> Self {
        let images = (0..image_count as u64)
            .map(|i| vk::Image::from_raw(0x1000 + i))
            .collect();
        Self {
            gpu,
            images,
            next_image: Mutex::new(0),
            acquire_failures: Mutex::new(Vec::new()),
            present_staleness: Mutex::new(Vec::new()),
        }
    }

    /// Make the next acquisition fail with `error`.
    pub fn fail_next_acquire(&self, error: SyncError) {
        self.acquire_failures.lock().push(error);
    }

    /// Make the next presentation report `staleness`.
    pub fn stale_next_present(&self, staleness: Staleness) {
        self.present_staleness.lock().push(staleness);
    }
}

impl PresentSurface for MockSurface {
    fn images(&self) -> &[vk::Image] {
        &self.images
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: 600,
            height: 600,
        }
    }

    fn acquire_next_image(&self, _timeout_ns: u64, signal: vk::Semaphore) -> SyncResult<(u32, bool)> {
        if let Some(error) = self.acquire_failures.lock().pop() {
            return Err(error);
        }

        let mut next = self.next_image.lock();
        let image_index = *next;
        *next = (*next + 1) % self.images.len() as u32;

        self.gpu.log(Event::Acquire { image_index });
        self.gpu.signal_binary(signal);
        Ok((image_index, false))
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> SyncResult<bool> {
        self.gpu.queue_present(image_index, wait);
        match self.present_staleness.lock().pop() {
            Some(Staleness::Suboptimal) => Ok(true),
            Some(Staleness::OutOfDate) => Err(SyncError::SwapchainStale(Staleness::OutOfDate)),
            None => Ok(false),
        }
    }
}
