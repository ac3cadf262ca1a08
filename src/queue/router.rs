use super::{
    payload::SemaphoreRegistry, InterruptThread, Queue, QueueDispatcher, QueueType, SubmissionHandle,
    SubmissionPayload, SubmissionStatus, QUEUE_PRIORITY_LOW,
};
use crate::backend::{DeviceBackend, QueueBackend};
use crate::config::SyncConfig;
use crate::cross_queue::QueueTopology;
use crate::error::{Error, Result};
use crate::Device;
use ash::vk;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// How long `completion` blocks per round before looking at the handle again.
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A collection of QueueDispatcher, one for each queue family in use. Queue types sharing a family
/// share its dispatcher, and all dispatchers share one signaled-semaphore registry so that a payload
/// waiting on another queue's semaphore becomes submittable once the signaling payload was submitted.
pub struct Queues {
    queues: Vec<Arc<QueueDispatcher>>,
    queue_type_to_dispatcher: [usize; 3],
    topology: QueueTopology,
    registry: Arc<SemaphoreRegistry>,
}

impl Queues {
    /// Safety: Can only be called once for each device, which must have been created with
    /// `create_info.create_infos`.
    pub unsafe fn from_device(
        device: &Arc<Device>,
        create_info: &QueuesCreateInfo,
        config: &SyncConfig,
    ) -> Result<Self> {
        let backend: Arc<dyn DeviceBackend> = device.clone();
        Self::with_backends(backend, create_info, config, |family_index| -> Arc<dyn QueueBackend> {
            Arc::new(Queue::new(device.clone(), family_index))
        })
    }

    /// Build the dispatchers on top of arbitrary queue backends.
    pub fn with_backends(
        device: Arc<dyn DeviceBackend>,
        create_info: &QueuesCreateInfo,
        config: &SyncConfig,
        mut queue_for_family: impl FnMut(u32) -> Arc<dyn QueueBackend>,
    ) -> Result<Self> {
        let registry = Arc::new(SemaphoreRegistry::default());
        let mut queues: Vec<Arc<QueueDispatcher>> = Vec::new();
        let mut queue_type_to_dispatcher = [0; 3];
        for ty in QueueType::ALL {
            let family_index = create_info.queue_family_index_for_type(ty);
            let existing = queues
                .iter()
                .position(|dispatcher| dispatcher.family_index() == family_index);
            queue_type_to_dispatcher[ty as usize] = match existing {
                Some(index) => index,
                None => {
                    queues.push(Arc::new(QueueDispatcher::new(
                        ty,
                        queue_for_family(family_index),
                        device.clone(),
                        config.clone(),
                        registry.clone(),
                    )?));
                    queues.len() - 1
                }
            };
        }

        let compute_family = create_info.queue_family_index_for_type(QueueType::Compute);
        let (compute_stage_mask, compute_access_mask) = device
            .capabilities()
            .supported_masks(create_info.family_flags[compute_family as usize]);
        let topology = QueueTopology {
            graphics_family: create_info.queue_family_index_for_type(QueueType::Graphics),
            compute_family,
            compute_stage_mask,
            compute_access_mask,
        };
        tracing::info!(topology = ?topology, dispatchers = queues.len(), "create queues");
        Ok(Queues {
            queues,
            queue_type_to_dispatcher,
            topology,
            registry,
        })
    }

    pub fn of_type(&self, ty: QueueType) -> &Arc<QueueDispatcher> {
        &self.queues[self.queue_type_to_dispatcher[ty as usize]]
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn registry(&self) -> &Arc<SemaphoreRegistry> {
        &self.registry
    }

    pub fn submit(&self, ty: QueueType, payload: SubmissionPayload) -> Result<SubmissionHandle> {
        self.of_type(ty).submit(payload)
    }

    /// Flush every queue until no queue makes progress. A payload stalled on a semaphore that
    /// another queue signals goes out in a later round.
    pub fn flush(&self) -> Result<()> {
        loop {
            let mut submitted = 0;
            for dispatcher in self.queues.iter() {
                submitted += dispatcher.flush()?;
            }
            if submitted == 0 {
                return Ok(());
            }
        }
    }

    pub fn poll_or_wait(&self, handle: &SubmissionHandle, timeout: Duration) -> Result<SubmissionStatus> {
        self.of_type(handle.queue()).poll_or_wait(handle, timeout)
    }

    pub fn cancel(&self, handle: &SubmissionHandle) -> bool {
        self.of_type(handle.queue()).cancel(handle)
    }

    pub fn wait_idle(&self) -> Result<()> {
        for dispatcher in self.queues.iter() {
            dispatcher.wait_idle()?;
        }
        Ok(())
    }

    pub fn spawn_interrupt_thread(&self, interval: Duration) -> Result<InterruptThread> {
        InterruptThread::spawn(self.queues.clone(), interval)
    }

    /// Resolves once `handle` completes or gets cancelled.
    pub fn completion(&self, handle: SubmissionHandle) -> impl Future<Output = Result<SubmissionStatus>> {
        let dispatcher = self.of_type(handle.queue()).clone();
        blocking::unblock(move || loop {
            match dispatcher.poll_or_wait(&handle, COMPLETION_POLL_INTERVAL)? {
                SubmissionStatus::Pending => {
                    if !handle.is_submitted() {
                        // Nothing to block on until someone flushes.
                        std::thread::sleep(COMPLETION_POLL_INTERVAL);
                    }
                }
                status => return Ok(status),
            }
        })
    }
}

pub struct QueuesCreateInfo {
    pub(crate) create_infos: Vec<vk::DeviceQueueCreateInfo>,
    pub(crate) queue_family_to_types: Vec<Option<QueueType>>,
    pub(crate) queue_type_to_family: [u32; 3],
    pub(crate) family_flags: Vec<vk::QueueFlags>,
}

impl QueuesCreateInfo {
    pub fn find(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Result<QueuesCreateInfo> {
        // Safety: No Host Syncronization rules for vkGetPhysicalDeviceQueueFamilyProperties.
        let available_queue_family =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        Self::find_with_queue_family_properties(&available_queue_family)
    }

    pub fn find_with_queue_family_properties(
        available_queue_family: &[vk::QueueFamilyProperties],
    ) -> Result<QueuesCreateInfo> {
        let graphics_queue_family = available_queue_family
            .iter()
            .enumerate()
            .filter(|&(_i, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .max_by_key(|&(_i, family)| {
                let mut priority: i32 = 0;
                if family.queue_flags.contains(vk::QueueFlags::SPARSE_BINDING) {
                    priority -= 1;
                }
                priority
            })
            .ok_or(Error::NoSuitableQueueFamily(vk::QueueFlags::GRAPHICS))?
            .0 as u32;
        let compute_queue_family = available_queue_family
            .iter()
            .enumerate()
            .filter(|&(_id, family)| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .max_by_key(|&(_, family)| {
                // Prefer a dedicated async compute family.
                let mut priority: i32 = 0;
                if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    priority -= 100;
                }
                if family.queue_flags.contains(vk::QueueFlags::SPARSE_BINDING) {
                    priority -= 1;
                }
                priority
            })
            .ok_or(Error::NoSuitableQueueFamily(vk::QueueFlags::COMPUTE))?
            .0 as u32;
        let transfer_queue_family = available_queue_family
            .iter()
            .enumerate()
            .max_by_key(|&(_, family)| {
                // Graphics and compute families can always transfer.
                let mut priority: i32 = 0;
                if family.queue_flags.intersects(
                    vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS,
                ) {
                    priority += 100;
                }
                if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                    priority -= 10;
                }
                if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    priority -= 20;
                }
                if family.queue_flags.contains(vk::QueueFlags::SPARSE_BINDING) {
                    priority -= 1;
                }
                priority
            })
            .map_or(graphics_queue_family, |(i, _)| i as u32);

        let mut queue_family_to_types: Vec<Option<QueueType>> = vec![None; available_queue_family.len()];
        // Later types never steal a family from an earlier one.
        for (ty, family) in [
            (QueueType::Transfer, transfer_queue_family),
            (QueueType::Compute, compute_queue_family),
            (QueueType::Graphics, graphics_queue_family),
        ] {
            queue_family_to_types[family as usize] = Some(ty);
        }
        let queue_type_to_family: [u32; 3] = [graphics_queue_family, compute_queue_family, transfer_queue_family];

        let create_infos = queue_family_to_types
            .iter()
            .enumerate()
            .filter(|(_, queue_type)| queue_type.is_some())
            .map(|(queue_family_index, queue_type)| vk::DeviceQueueCreateInfo {
                flags: vk::DeviceQueueCreateFlags::empty(),
                queue_family_index: queue_family_index as u32,
                queue_count: 1,
                p_queue_priorities: queue_type.map_or(&QUEUE_PRIORITY_LOW, |queue_type| queue_type.priority()),
                ..Default::default()
            })
            .collect();

        Ok(QueuesCreateInfo {
            create_infos,
            queue_family_to_types,
            queue_type_to_family,
            family_flags: available_queue_family.iter().map(|family| family.queue_flags).collect(),
        })
    }

    pub fn create_infos(&self) -> &[vk::DeviceQueueCreateInfo] {
        &self.create_infos
    }
    pub fn queue_family_index_for_type(&self, ty: QueueType) -> u32 {
        self.queue_type_to_family[ty as usize]
    }
    pub fn assigned_queue_type_for_family_index(&self, queue_family_index: u32) -> Option<QueueType> {
        self.queue_family_to_types[queue_family_index as usize]
    }
}
