//! The native-interop boundary. Every raw driver call of the queue engine goes through
//! [`DeviceBackend`] or [`QueueBackend`], so the engine can run against a simulated GPU in tests.

use ash::{prelude::VkResult, vk};
use smallvec::SmallVec;

use crate::capabilities::DeviceCapabilities;
use crate::Device;

pub trait DeviceBackend: Send + Sync {
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Create a binary semaphore, or a timeline semaphore starting at `timeline_initial_value`.
    fn create_semaphore(&self, timeline_initial_value: Option<u64>) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> VkResult<u64>;
    /// Wait until the timeline `semaphore` reaches `value`. Returns `Ok(false)` on timeout.
    fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout_ns: u64,
    ) -> VkResult<bool>;

    fn create_fence(&self) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    /// Returns `Ok(false)` on timeout.
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<bool>;

    fn create_event(&self) -> VkResult<vk::Event>;
    fn destroy_event(&self, event: vk::Event);
}

/// One batch of a queue submission, in raw handles.
#[derive(Clone, Debug, Default)]
pub struct SubmitBatch {
    pub wait_semaphores: SmallVec<[(vk::Semaphore, vk::PipelineStageFlags2); 4]>,
    pub command_buffers: SmallVec<[vk::CommandBuffer; 4]>,
    pub signal_semaphores: SmallVec<[vk::Semaphore; 4]>,
    /// Timeline semaphore signaled with the given value once the batch completes.
    pub timeline_signal: Option<(vk::Semaphore, u64)>,
}

pub trait QueueBackend: Send + Sync {
    fn family_index(&self) -> u32;
    /// Submit all `batches` in one driver call. At most one fence can be attached.
    fn submit(&self, batches: &[SubmitBatch], fence: vk::Fence) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;
}

fn timeout_result(result: VkResult<()>) -> VkResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(err) => Err(err),
    }
}

impl DeviceBackend for Device {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_semaphore(&self, timeline_initial_value: Option<u64>) -> VkResult<vk::Semaphore> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(timeline_initial_value.unwrap_or(0))
            .build();
        let mut create_info = vk::SemaphoreCreateInfo::builder();
        if timeline_initial_value.is_some() {
            create_info = create_info.push_next(&mut type_info);
        }
        // Safety: No Host Syncronization rules for vkCreateSemaphore.
        unsafe { ash::Device::create_semaphore(self, &create_info, None) }
    }
    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // Safety: the caller owns the semaphore exclusively.
        unsafe { ash::Device::destroy_semaphore(self, semaphore, None) }
    }
    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> VkResult<u64> {
        // Safety: No Host Syncronization rules for vkGetSemaphoreCounterValue.
        unsafe { self.get_semaphore_counter_value(semaphore) }
    }
    fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout_ns: u64,
    ) -> VkResult<bool> {
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        // Safety: No Host Syncronization rules for vkWaitSemaphores.
        timeout_result(unsafe { self.wait_semaphores(&wait_info, timeout_ns) })
    }

    fn create_fence(&self) -> VkResult<vk::Fence> {
        // Safety: No Host Syncronization rules for vkCreateFence.
        unsafe { ash::Device::create_fence(self, &vk::FenceCreateInfo::default(), None) }
    }
    fn destroy_fence(&self, fence: vk::Fence) {
        // Safety: Host Syncronization rule for vkDestroyFence:
        // - Host access to fence must be externally synchronized.
        // The caller owns the fence exclusively, and no submission using it is pending.
        unsafe { ash::Device::destroy_fence(self, fence, None) }
    }
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        // Safety: Host access to each member of pFences must be externally synchronized.
        // Fences are only reset by the completion path that just retired them.
        unsafe { self.reset_fences(&[fence]) }
    }
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        // Safety: No Host Syncronization rules for vkGetFenceStatus.
        unsafe { self.get_fence_status(fence) }
    }
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<bool> {
        // Safety: No Host Syncronization rules for vkWaitForFences.
        timeout_result(unsafe { self.wait_for_fences(&[fence], true, timeout_ns) })
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        let mut flags = vk::EventCreateFlags::empty();
        if self.capabilities.synchronization2 {
            flags |= vk::EventCreateFlags::DEVICE_ONLY;
        }
        // Safety: No Host Syncronization rules for vkCreateEvent.
        unsafe {
            ash::Device::create_event(
                self,
                &vk::EventCreateInfo::builder().flags(flags).build(),
                None,
            )
        }
    }
    fn destroy_event(&self, event: vk::Event) {
        // Safety: Host Syncronization rule for vkDestroyEvent:
        // - Host access to event must be externally synchronized.
        // Events are owned by their Transition, which is dropped only once.
        unsafe { ash::Device::destroy_event(self, event, None) }
    }
}
