use std::sync::{Arc, Weak};

use ash::{prelude::VkResult, vk};
use parking_lot::Mutex;

use super::payload::SemaphoreRegistry;
use crate::backend::DeviceBackend;

/// A binary semaphore, destroyed on drop. Shared through `Arc` between the transition that created it
/// and every submission that signals or waits on it.
pub struct Semaphore {
    pub(crate) device: Arc<dyn DeviceBackend>,
    pub(crate) semaphore: vk::Semaphore,
    /// Set once a dispatcher registered this semaphore as signaled.
    pub(crate) registry: Mutex<Weak<SemaphoreRegistry>>,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Semaphore({:?})", self.semaphore))
    }
}

impl Semaphore {
    pub fn new(device: Arc<dyn DeviceBackend>) -> VkResult<Self> {
        let semaphore = device.create_semaphore(None)?;
        Ok(Self {
            device,
            semaphore,
            registry: Mutex::new(Weak::new()),
        })
    }
    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::debug!(semaphore = ?self.semaphore, "drop semaphore");
        if let Some(registry) = self.registry.get_mut().upgrade() {
            registry.forget(self.semaphore);
        }
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// The per-queue completion counter.
pub struct TimelineSemaphore(Semaphore);

impl std::fmt::Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("TimelineSemaphore({:?})", self.0.semaphore))
    }
}

impl TimelineSemaphore {
    pub fn new(device: Arc<dyn DeviceBackend>, initial_value: u64) -> VkResult<Self> {
        let semaphore = device.create_semaphore(Some(initial_value))?;
        Ok(TimelineSemaphore(Semaphore {
            device,
            semaphore,
            registry: Mutex::new(Weak::new()),
        }))
    }
    pub fn raw(&self) -> vk::Semaphore {
        self.0.semaphore
    }
    pub fn value(&self) -> VkResult<u64> {
        self.0.device.semaphore_counter_value(self.0.semaphore)
    }
    /// Block until the counter reaches `value` or `timeout_ns` elapses. `Ok(false)` means timeout.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> VkResult<bool> {
        self.0.device.wait_semaphore(self.0.semaphore, value, timeout_ns)
    }
}
