mod dispatcher;
mod fence;
mod interrupt;
mod payload;
mod router;
mod semaphore;

use crate::backend::{QueueBackend, SubmitBatch};
use crate::Device;
use ash::{prelude::VkResult, vk};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

pub use dispatcher::QueueDispatcher;
pub use fence::Fence;
pub use interrupt::InterruptThread;
pub use payload::{SemaphoreRegistry, SubmissionHandle, SubmissionPayload, SubmissionStatus};
pub use router::{Queues, QueuesCreateInfo};
pub use semaphore::{Semaphore, TimelineSemaphore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics = 0,
    Compute = 1,
    Transfer = 2,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

    pub fn priority(&self) -> &'static f32 {
        [&QUEUE_PRIORITY_HIGH, &QUEUE_PRIORITY_HIGH, &QUEUE_PRIORITY_MID][*self as usize]
    }
}

pub(crate) const QUEUE_PRIORITY_HIGH: f32 = 1.0;
pub(crate) const QUEUE_PRIORITY_MID: f32 = 0.5;
pub(crate) const QUEUE_PRIORITY_LOW: f32 = 0.1;

/// A thin wrapper for a Vulkan Queue. Queue operations require host-side syncronization,
/// which the internal lock provides so the queue can be shared between dispatcher and callers.
pub struct Queue {
    pub(super) device: Arc<Device>,
    pub(super) queue: vk::Queue,
    pub(super) family_index: u32,
    lock: Mutex<()>,
}

impl Queue {
    /// Safety: `family_index` must be a queue family the device was created with.
    pub unsafe fn new(device: Arc<Device>, family_index: u32) -> Self {
        // We always create at most one queue for each queue family.
        let queue = device.get_device_queue(family_index, 0);
        Self {
            device,
            queue,
            family_index,
            lock: Mutex::new(()),
        }
    }
    pub fn raw(&self) -> vk::Queue {
        self.queue
    }

    fn submit2(&self, batches: &[SubmitBatch], fence: vk::Fence) -> VkResult<()> {
        // The SubmitInfo2 structs point into these, so they have to outlive the call.
        let semaphore_infos: Vec<(Vec<vk::SemaphoreSubmitInfo>, Vec<vk::SemaphoreSubmitInfo>)> = batches
            .iter()
            .map(|batch| {
                let waits = batch
                    .wait_semaphores
                    .iter()
                    .map(|&(semaphore, stage_mask)| {
                        vk::SemaphoreSubmitInfo::builder()
                            .semaphore(semaphore)
                            .stage_mask(stage_mask)
                            .build()
                    })
                    .collect();
                let mut signals: Vec<vk::SemaphoreSubmitInfo> = batch
                    .signal_semaphores
                    .iter()
                    .map(|&semaphore| {
                        vk::SemaphoreSubmitInfo::builder()
                            .semaphore(semaphore)
                            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                            .build()
                    })
                    .collect();
                if let Some((timeline, value)) = batch.timeline_signal {
                    signals.push(
                        vk::SemaphoreSubmitInfo::builder()
                            .semaphore(timeline)
                            .value(value)
                            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                            .build(),
                    );
                }
                (waits, signals)
            })
            .collect();
        let command_buffer_infos: Vec<Vec<vk::CommandBufferSubmitInfo>> = batches
            .iter()
            .map(|batch| {
                batch
                    .command_buffers
                    .iter()
                    .map(|&command_buffer| {
                        vk::CommandBufferSubmitInfo::builder()
                            .command_buffer(command_buffer)
                            .build()
                    })
                    .collect()
            })
            .collect();
        let submits: Vec<vk::SubmitInfo2> = semaphore_infos
            .iter()
            .zip(command_buffer_infos.iter())
            .map(|((waits, signals), command_buffers)| {
                vk::SubmitInfo2::builder()
                    .wait_semaphore_infos(waits)
                    .command_buffer_infos(command_buffers)
                    .signal_semaphore_infos(signals)
                    .build()
            })
            .collect();
        let _guard = self.lock.lock();
        // Safety: Host Syncronization rule for vkQueueSubmit2:
        // - Host access to queue must be externally synchronized. We hold self.lock.
        // - Host access to fence must be externally synchronized. The dispatcher owns the fence.
        unsafe { self.device.queue_submit2(self.queue, &submits, fence) }
    }

    fn submit1(&self, batches: &[SubmitBatch], fence: vk::Fence) -> VkResult<()> {
        struct Arrays {
            waits: SmallVec<[vk::Semaphore; 4]>,
            wait_stages: SmallVec<[vk::PipelineStageFlags; 4]>,
            wait_values: SmallVec<[u64; 4]>,
            signals: SmallVec<[vk::Semaphore; 4]>,
            signal_values: SmallVec<[u64; 4]>,
        }
        let arrays: Vec<Arrays> = batches
            .iter()
            .map(|batch| {
                let mut signals: SmallVec<[vk::Semaphore; 4]> = batch.signal_semaphores.clone();
                // Values of binary semaphores are ignored.
                let mut signal_values: SmallVec<[u64; 4]> = SmallVec::from_elem(0, signals.len());
                if let Some((timeline, value)) = batch.timeline_signal {
                    signals.push(timeline);
                    signal_values.push(value);
                }
                Arrays {
                    waits: batch.wait_semaphores.iter().map(|(semaphore, _)| *semaphore).collect(),
                    wait_stages: batch
                        .wait_semaphores
                        .iter()
                        .map(|(_, stage)| {
                            let raw = stage.as_raw();
                            assert!(raw >> 32 == 0, "wait stage {stage:?} has no legacy equivalent");
                            vk::PipelineStageFlags::from_raw(raw as u32)
                        })
                        .collect(),
                    wait_values: SmallVec::from_elem(0, batch.wait_semaphores.len()),
                    signals,
                    signal_values,
                }
            })
            .collect();
        let mut timeline_infos: Vec<vk::TimelineSemaphoreSubmitInfo> = arrays
            .iter()
            .map(|arrays| {
                vk::TimelineSemaphoreSubmitInfo::builder()
                    .wait_semaphore_values(&arrays.wait_values)
                    .signal_semaphore_values(&arrays.signal_values)
                    .build()
            })
            .collect();
        let uses_timeline = batches.iter().any(|batch| batch.timeline_signal.is_some());
        let submits: Vec<vk::SubmitInfo> = arrays
            .iter()
            .zip(batches.iter())
            .zip(timeline_infos.iter_mut())
            .map(|((arrays, batch), timeline_info)| {
                let mut info = vk::SubmitInfo::builder()
                    .wait_semaphores(&arrays.waits)
                    .wait_dst_stage_mask(&arrays.wait_stages)
                    .command_buffers(&batch.command_buffers)
                    .signal_semaphores(&arrays.signals);
                if uses_timeline {
                    info = info.push_next(timeline_info);
                }
                info.build()
            })
            .collect();
        let _guard = self.lock.lock();
        // Safety: Host Syncronization rule for vkQueueSubmit:
        // - Host access to queue must be externally synchronized. We hold self.lock.
        // - Host access to fence must be externally synchronized. The dispatcher owns the fence.
        unsafe { self.device.queue_submit(self.queue, &submits, fence) }
    }
}

impl QueueBackend for Queue {
    fn family_index(&self) -> u32 {
        self.family_index
    }
    fn submit(&self, batches: &[SubmitBatch], fence: vk::Fence) -> VkResult<()> {
        if self.device.capabilities.synchronization2 {
            self.submit2(batches, fence)
        } else {
            self.submit1(batches, fence)
        }
    }
    fn wait_idle(&self) -> VkResult<()> {
        let _guard = self.lock.lock();
        // Safety: Host Syncronization rule for vkQueueWaitIdle:
        // - Host access to queue must be externally synchronized. We hold self.lock.
        unsafe { self.device.queue_wait_idle(self.queue) }
    }
}
