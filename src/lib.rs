use ash::vk;
use std::ffi::{c_char, CStr};
use std::{ops::Deref, sync::Arc};

pub mod access;
pub mod backend;
pub mod barrier;
pub mod batcher;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod cross_queue;
pub mod error;
pub mod queue;
pub mod transition;
pub mod translate;

#[cfg(test)]
mod testing;

pub use access::{AccessState, Pipelines, ResourceKind};
pub use capabilities::DeviceCapabilities;
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use transition::{Transition, TransitionCreateFlags, TransitionCreateInfo, TransitionInfo};

/// A logical device together with the capabilities that decide how it synchronizes.
pub struct Device {
    device: ash::Device,
    pub(crate) capabilities: DeviceCapabilities,
}

impl Device {
    /// Create a device with one queue per queue family in use and the dispatchers driving them.
    ///
    /// `instance` must outlive the returned device.
    pub fn create(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        enabled_extensions: &[&CStr],
        enabled_features: &vk::PhysicalDeviceFeatures2,
        config: &SyncConfig,
    ) -> Result<(Arc<Device>, queue::Queues)> {
        let queue_create_info = queue::QueuesCreateInfo::find(instance, physical_device)?;
        let extension_names: Vec<*const c_char> = enabled_extensions.iter().map(|name| name.as_ptr()).collect();
        let create_info = vk::DeviceCreateInfo {
            p_next: enabled_features as *const vk::PhysicalDeviceFeatures2 as *const _,
            queue_create_info_count: queue_create_info.create_infos.len() as u32,
            p_queue_create_infos: queue_create_info.create_infos.as_ptr(),

            enabled_extension_count: extension_names.len() as u32,
            pp_enabled_extension_names: extension_names.as_ptr(),

            p_enabled_features: std::ptr::null(),
            ..Default::default()
        };

        // Safety: No Host Syncronization rules for VkCreateDevice.
        let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
        let device = Arc::new(Device {
            device,
            capabilities: DeviceCapabilities::query(instance, physical_device),
        });

        let queues = unsafe {
            // Safe because this is only called once per device.
            queue::Queues::from_device(&device, &queue_create_info, config)?
        };
        Ok((device, queues))
    }

    /// Wrap a device created elsewhere. The device is destroyed on drop.
    pub fn from_raw(device: ash::Device, capabilities: DeviceCapabilities) -> Self {
        Self { device, capabilities }
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        // Safety: Host Syncronization rule for vkDestroyDevice:
        // - Host access to device must be externally synchronized.
        // - Host access to all VkQueue objects created from device must be externally synchronized
        // We have &mut self and therefore exclusive control on device.
        // VkQueue objects may not exist at this point, because Queue retains an Arc to Device.
        // If there still exist a Queue, the Device wouldn't be dropped.
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
