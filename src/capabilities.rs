use ash::vk;
use std::ffi::c_void;

/// How a shading-rate image is interpreted by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadingRateImageType {
    /// `VK_KHR_fragment_shading_rate` attachment holding palette entries.
    Palette,
    /// `VK_EXT_fragment_density_map` with fractional densities.
    Fractional,
}

/// The subset of device features that changes which barriers and submissions are legal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub synchronization2: bool,
    pub timeline_semaphore: bool,
    pub ray_tracing_shaders: bool,
    pub shading_rate_image: Option<ShadingRateImageType>,
    /// Every shader stage the device can run, compute included.
    pub shader_stages: vk::PipelineStageFlags2,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            synchronization2: true,
            timeline_semaphore: true,
            ray_tracing_shaders: false,
            shading_rate_image: None,
            shader_stages: vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER
                | vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER
                | vk::PipelineStageFlags2::GEOMETRY_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER,
        }
    }
}

impl DeviceCapabilities {
    pub fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let features = PhysicalDeviceFeatures::new(instance, physical_device);
        let mut shader_stages =
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER;
        if features.inner.features.geometry_shader == vk::TRUE {
            shader_stages |= vk::PipelineStageFlags2::GEOMETRY_SHADER;
        }
        if features.inner.features.tessellation_shader == vk::TRUE {
            shader_stages |= vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER
                | vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER;
        }
        let shading_rate_image = if features.shading_rate.attachment_fragment_shading_rate == vk::TRUE {
            Some(ShadingRateImageType::Palette)
        } else if features.density_map.fragment_density_map == vk::TRUE {
            Some(ShadingRateImageType::Fractional)
        } else {
            None
        };
        let capabilities = Self {
            synchronization2: features.v13.synchronization2 == vk::TRUE,
            timeline_semaphore: features.v12.timeline_semaphore == vk::TRUE,
            ray_tracing_shaders: features.ray_tracing.ray_tracing_pipeline == vk::TRUE,
            shading_rate_image,
            shader_stages,
        };
        tracing::info!(?physical_device, ?capabilities, "queried device capabilities");
        capabilities
    }

    /// Shader stages that belong to the graphics pipeline.
    pub fn graphics_shader_stages(&self) -> vk::PipelineStageFlags2 {
        self.shader_stages & !vk::PipelineStageFlags2::COMPUTE_SHADER
    }

    /// Stage and access bits a queue with `flags` is allowed to reference in a barrier.
    pub fn supported_masks(&self, flags: vk::QueueFlags) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        let mut stages = vk::PipelineStageFlags2::TOP_OF_PIPE
            | vk::PipelineStageFlags2::BOTTOM_OF_PIPE
            | vk::PipelineStageFlags2::HOST
            | vk::PipelineStageFlags2::ALL_COMMANDS;
        let mut access = vk::AccessFlags2::HOST_READ
            | vk::AccessFlags2::HOST_WRITE
            | vk::AccessFlags2::MEMORY_READ
            | vk::AccessFlags2::MEMORY_WRITE;

        if flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER) {
            stages |= vk::PipelineStageFlags2::TRANSFER;
            access |= vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::TRANSFER_WRITE;
        }
        if flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
            stages |= vk::PipelineStageFlags2::DRAW_INDIRECT
                | vk::PipelineStageFlags2::COMPUTE_SHADER
                | vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR;
            access |= vk::AccessFlags2::INDIRECT_COMMAND_READ
                | vk::AccessFlags2::UNIFORM_READ
                | vk::AccessFlags2::SHADER_READ
                | vk::AccessFlags2::SHADER_WRITE
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR;
            if self.ray_tracing_shaders {
                stages |= vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR;
            }
        }
        if flags.contains(vk::QueueFlags::GRAPHICS) {
            stages |= vk::PipelineStageFlags2::VERTEX_INPUT
                | self.graphics_shader_stages()
                | vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
            access |= vk::AccessFlags2::INDEX_READ
                | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ
                | vk::AccessFlags2::INPUT_ATTACHMENT_READ
                | vk::AccessFlags2::COLOR_ATTACHMENT_READ
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE;
            match self.shading_rate_image {
                Some(ShadingRateImageType::Palette) => {
                    stages |= vk::PipelineStageFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_KHR;
                    access |= vk::AccessFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR;
                }
                Some(ShadingRateImageType::Fractional) => {
                    stages |= vk::PipelineStageFlags2::FRAGMENT_DENSITY_PROCESS_EXT;
                    access |= vk::AccessFlags2::FRAGMENT_DENSITY_MAP_READ_EXT;
                }
                None => (),
            }
        }
        (stages, access)
    }
}

struct PhysicalDeviceFeatures {
    inner: vk::PhysicalDeviceFeatures2,
    v12: vk::PhysicalDeviceVulkan12Features,
    v13: vk::PhysicalDeviceVulkan13Features,
    ray_tracing: vk::PhysicalDeviceRayTracingPipelineFeaturesKHR,
    shading_rate: vk::PhysicalDeviceFragmentShadingRateFeaturesKHR,
    density_map: vk::PhysicalDeviceFragmentDensityMapFeaturesEXT,
}

impl PhysicalDeviceFeatures {
    // Boxed so the p_next chain keeps pointing at the right addresses.
    fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Box<PhysicalDeviceFeatures> {
        let mut this = Box::new(Self {
            inner: vk::PhysicalDeviceFeatures2::default(),
            v12: vk::PhysicalDeviceVulkan12Features::default(),
            v13: vk::PhysicalDeviceVulkan13Features::default(),
            ray_tracing: vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default(),
            shading_rate: vk::PhysicalDeviceFragmentShadingRateFeaturesKHR::default(),
            density_map: vk::PhysicalDeviceFragmentDensityMapFeaturesEXT::default(),
        });
        this.inner.p_next = &mut this.v12 as *mut _ as *mut c_void;
        this.v12.p_next = &mut this.v13 as *mut _ as *mut c_void;
        this.v13.p_next = &mut this.ray_tracing as *mut _ as *mut c_void;
        this.ray_tracing.p_next = &mut this.shading_rate as *mut _ as *mut c_void;
        this.shading_rate.p_next = &mut this.density_map as *mut _ as *mut c_void;
        // Safety: No Host Syncronization rules for vkGetPhysicalDeviceFeatures2.
        // The p_next chain points into this box.
        unsafe {
            instance.get_physical_device_features2(physical_device, &mut this.inner);
        }
        this
    }
}
