// GPU context seam
//
// The frame core never talks to ash directly. Everything it needs from the
// device goes through `GpuContext`, implemented by `backend::VulkanDevice`
// and, in tests, by a simulated GPU.

use ash::vk;

use crate::error::SyncResult;

/// Hardware queue a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Compute,
    /// Graphics work, present copies and presentation itself
    Graphics,
}

/// Proof that every queue used by the frame core has drained.
///
/// Only obtainable from [`GpuContext::wait_idle`]. All destroy entry points
/// take it by reference, so resources cannot be released while a queue may
/// still reference them.
#[derive(Debug)]
pub struct QueuesIdle {
    _private: (),
}

impl QueuesIdle {
    pub(crate) fn confirmed() -> Self {
        Self { _private: () }
    }
}

/// One semaphore wait or signal operation of a submission.
///
/// `value` is ignored for binary semaphores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreOp {
    pub semaphore: vk::Semaphore,
    pub value: u64,
    pub stage_mask: vk::PipelineStageFlags2,
}

/// A fully resolved queue submission.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<SemaphoreOp>,
    pub signals: Vec<SemaphoreOp>,
    /// Signaled on completion, or null
    pub fence: vk::Fence,
}

/// Everything needed to record the copy of a rendered image into an
/// acquired swapchain image.
#[derive(Debug, Clone, Copy)]
pub struct PresentCopy {
    /// Color attachment, in COLOR_ATTACHMENT_OPTIMAL layout
    pub source: vk::Image,
    pub destination: vk::Image,
    pub extent: vk::Extent2D,
}

/// Device operations consumed by the frame synchronization core.
pub trait GpuContext {
    fn create_timeline_semaphore(&self, initial_value: u64) -> SyncResult<vk::Semaphore>;
    fn create_binary_semaphore(&self) -> SyncResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> SyncResult<vk::Fence>;
    fn create_command_pool(&self, queue: QueueRole) -> SyncResult<vk::CommandPool>;
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> SyncResult<Vec<vk::CommandBuffer>>;

    /// Reset a command buffer for re-recording. The caller guarantees the
    /// GPU is done with it.
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> SyncResult<()>;

    /// Current counter value of a timeline semaphore.
    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> SyncResult<u64>;

    /// Block until `semaphore` reaches `value`.
    ///
    /// Fails with `SyncError::Timeout` if `timeout_ns` expires first.
    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> SyncResult<()>;

    /// Like [`GpuContext::wait_semaphore`], but only blocks if the counter
    /// has not reached `value` yet.
    fn wait_until_reached(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> SyncResult<()> {
        let current = self.semaphore_counter_value(semaphore)?;
        if current >= value {
            return Ok(());
        }
        log::trace!("Semaphore at {}, blocking until {}", current, value);
        self.wait_semaphore(semaphore, value, timeout_ns)
    }

    /// Block until `fence` is signaled, then reset it.
    fn wait_and_reset_fence(&self, fence: vk::Fence, timeout_ns: u64) -> SyncResult<()>;

    /// Enqueue a submission. Returns as soon as it is queued.
    fn submit(&self, queue: QueueRole, submission: &Submission) -> SyncResult<()>;

    /// Record the swapchain copy into a command buffer that is ready to
    /// record.
    fn record_present_copy(&self, command_buffer: vk::CommandBuffer, copy: &PresentCopy) -> SyncResult<()>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> SyncResult<QueuesIdle>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore, idle: &QueuesIdle);
    fn destroy_fence(&self, fence: vk::Fence, idle: &QueuesIdle);
    fn destroy_command_pool(&self, pool: vk::CommandPool, idle: &QueuesIdle);
}

/// Objects created by a constructor that has not returned yet.
///
/// Dropping the guard before [`PartialObjects::keep`] waits for the queues
/// and destroys everything it tracked, so constructors can bail out with
/// `?` at any step.
pub(crate) struct PartialObjects<'a, G: GpuContext> {
    gpu: &'a G,
    semaphores: Vec<vk::Semaphore>,
    fences: Vec<vk::Fence>,
    pools: Vec<vk::CommandPool>,
}

impl<'a, G: GpuContext> PartialObjects<'a, G> {
    pub(crate) fn new(gpu: &'a G) -> Self {
        Self {
            gpu,
            semaphores: Vec::new(),
            fences: Vec::new(),
            pools: Vec::new(),
        }
    }

    pub(crate) fn gpu(&self) -> &'a G {
        self.gpu
    }

    pub(crate) fn timeline_semaphore(&mut self, initial_value: u64) -> SyncResult<vk::Semaphore> {
        let semaphore = self.gpu.create_timeline_semaphore(initial_value)?;
        self.semaphores.push(semaphore);
        Ok(semaphore)
    }

    pub(crate) fn binary_semaphore(&mut self) -> SyncResult<vk::Semaphore> {
        let semaphore = self.gpu.create_binary_semaphore()?;
        self.semaphores.push(semaphore);
        Ok(semaphore)
    }

    pub(crate) fn fence(&mut self, signaled: bool) -> SyncResult<vk::Fence> {
        let fence = self.gpu.create_fence(signaled)?;
        self.fences.push(fence);
        Ok(fence)
    }

    pub(crate) fn command_pool(&mut self, queue: QueueRole) -> SyncResult<vk::CommandPool> {
        let pool = self.gpu.create_command_pool(queue)?;
        self.pools.push(pool);
        Ok(pool)
    }

    /// Construction succeeded, the caller owns everything now.
    pub(crate) fn keep(mut self) {
        self.semaphores.clear();
        self.fences.clear();
        self.pools.clear();
    }

    fn count(&self) -> usize {
        self.semaphores.len() + self.fences.len() + self.pools.len()
    }
}

impl<G: GpuContext> Drop for PartialObjects<'_, G> {
    fn drop(&mut self) {
        if self.count() == 0 {
            return;
        }
        let idle = match self.gpu.wait_idle() {
            Ok(idle) => idle,
            Err(e) => {
                log::error!("Leaking {} objects of a failed construction: {}", self.count(), e);
                return;
            }
        };
        for pool in self.pools.drain(..) {
            self.gpu.destroy_command_pool(pool, &idle);
        }
        for fence in self.fences.drain(..) {
            self.gpu.destroy_fence(fence, &idle);
        }
        for semaphore in self.semaphores.drain(..) {
            self.gpu.destroy_semaphore(semaphore, &idle);
        }
    }
}
