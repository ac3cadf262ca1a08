use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ash::vk;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{QueueType, Semaphore};
use crate::backend::SubmitBatch;

/// A unit of queue work: semaphores to wait on, command buffers, semaphores to signal.
///
/// Everything referenced by the payload stays alive until the queue reports its completion.
#[derive(Default)]
pub struct SubmissionPayload {
    pub wait_semaphores: SmallVec<[(Arc<Semaphore>, vk::PipelineStageFlags2); 4]>,
    pub command_buffers: SmallVec<[vk::CommandBuffer; 4]>,
    pub signal_semaphores: SmallVec<[Arc<Semaphore>; 4]>,
    /// Resources released once the GPU is done with the payload.
    pub retained: Vec<Box<dyn Send + Sync>>,
}

impl std::fmt::Debug for SubmissionPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPayload")
            .field("wait_semaphores", &self.wait_semaphores)
            .field("command_buffers", &self.command_buffers)
            .field("signal_semaphores", &self.signal_semaphores)
            .field("retained", &self.retained.len())
            .finish()
    }
}

impl SubmissionPayload {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn wait(mut self, semaphore: Arc<Semaphore>, stage_mask: vk::PipelineStageFlags2) -> Self {
        self.wait_semaphores.push((semaphore, stage_mask));
        self
    }
    pub fn command_buffer(mut self, command_buffer: vk::CommandBuffer) -> Self {
        self.command_buffers.push(command_buffer);
        self
    }
    pub fn signal(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }
    pub fn retain(mut self, resource: impl Send + Sync + 'static) -> Self {
        self.retained.push(Box::new(resource));
        self
    }

    pub(crate) fn to_batch(&self) -> SubmitBatch {
        SubmitBatch {
            wait_semaphores: self
                .wait_semaphores
                .iter()
                .map(|(semaphore, stage)| (semaphore.raw(), *stage))
                .collect(),
            command_buffers: self.command_buffers.clone(),
            signal_semaphores: self.signal_semaphores.iter().map(|s| s.raw()).collect(),
            timeline_signal: None,
        }
    }
}

pub(crate) const UNSUBMITTED: u64 = 0;
pub(crate) const CANCELLED: u64 = u64::MAX;

/// Refers to one submitted payload. Cheap to clone.
///
/// The shared state is `0` until the payload is handed to the driver, then the timeline value
/// the payload completes with.
#[derive(Clone, Debug)]
pub struct SubmissionHandle {
    pub(crate) queue: QueueType,
    pub(crate) state: Arc<AtomicU64>,
}

impl SubmissionHandle {
    pub(crate) fn new(queue: QueueType) -> Self {
        Self {
            queue,
            state: Arc::new(AtomicU64::new(UNSUBMITTED)),
        }
    }
    pub fn queue(&self) -> QueueType {
        self.queue
    }
    /// The payload was handed to the driver.
    pub fn is_submitted(&self) -> bool {
        !matches!(self.value(), UNSUBMITTED | CANCELLED)
    }
    pub(crate) fn value(&self) -> u64 {
        self.state.load(Ordering::Acquire)
    }
    pub(crate) fn same_payload(&self, other: &Arc<AtomicU64>) -> bool {
        Arc::ptr_eq(&self.state, other)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Not submitted yet, or still executing.
    Pending,
    Complete,
    /// Removed from the queue before it was submitted.
    Cancelled,
}

/// Binary semaphores whose signaling submission was already handed to the driver.
/// Shared by the dispatchers of every queue so cross-queue waits become satisfiable.
#[derive(Debug, Default)]
pub struct SemaphoreRegistry {
    signaled: Mutex<HashSet<vk::Semaphore>>,
}

impl SemaphoreRegistry {
    /// Mark `semaphore` as signaled. The entry is removed again when a wait consumes it or
    /// when the semaphore is dropped.
    pub(crate) fn register(self: &Arc<Self>, semaphore: &Semaphore) {
        *semaphore.registry.lock() = Arc::downgrade(self);
        self.signaled.lock().insert(semaphore.raw());
    }
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, HashSet<vk::Semaphore>> {
        self.signaled.lock()
    }
    /// Drop a semaphore nobody can wait on anymore.
    pub(crate) fn forget(&self, semaphore: vk::Semaphore) {
        self.signaled.lock().remove(&semaphore);
    }
}
