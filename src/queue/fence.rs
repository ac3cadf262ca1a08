use std::sync::Arc;

use ash::{prelude::VkResult, vk};

use crate::backend::DeviceBackend;

/// A fence used for completion tracking on devices without timeline semaphores.
pub struct Fence {
    device: Arc<dyn DeviceBackend>,
    pub(crate) fence: vk::Fence,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Fence({:?})", self.fence))
    }
}

impl Fence {
    pub fn new(device: Arc<dyn DeviceBackend>) -> VkResult<Self> {
        let fence = device.create_fence()?;
        Ok(Self { device, fence })
    }
    pub fn signaled(&self) -> VkResult<bool> {
        self.device.fence_status(self.fence)
    }
    /// Blocks until the fence was signaled or `timeout_ns` elapsed. `Ok(false)` means timeout.
    pub fn wait(&self, timeout_ns: u64) -> VkResult<bool> {
        self.device.wait_fence(self.fence, timeout_ns)
    }
    pub fn reset(&mut self) -> VkResult<()> {
        self.device.reset_fence(self.fence)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!(fence = ?self.fence, "drop fence");
        self.device.destroy_fence(self.fence);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::FakeGpu;

    #[test]
    fn unsignaled_fence_times_out() {
        let gpu = FakeGpu::new(Default::default());
        let fence = Fence::new(gpu.device()).unwrap();
        assert!(!fence.signaled().unwrap());
        assert!(!fence.wait(0).unwrap());
    }
}
