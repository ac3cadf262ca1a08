//! Transition requests and the per-transition synchronization objects created for them.

use std::sync::Arc;

use ash::{prelude::VkResult, vk};
use parking_lot::Mutex;

use crate::access::{AccessState, Pipelines, ResourceKind};
use crate::backend::DeviceBackend;
use crate::config::SyncConfig;
use crate::queue::Semaphore;
use crate::translate::TranslationTarget;

/// Last known access of each plane of a depth/stencil image. Plane 0 is depth, plane 1 is stencil.
///
/// Needed when only one plane is transitioned: depth/stencil layouts are joint, so the untouched
/// plane's layout has to be merged into the barrier.
#[derive(Debug)]
pub struct DepthStencilPlanes {
    tracked: Mutex<[AccessState; 2]>,
}

impl DepthStencilPlanes {
    pub fn new(initial: AccessState) -> Arc<Self> {
        Arc::new(Self {
            tracked: Mutex::new([initial; 2]),
        })
    }
    pub fn get(&self, plane: usize) -> AccessState {
        self.tracked.lock()[plane]
    }
    /// Record the access after a transition of `plane`, or of both planes when `None`.
    pub fn set(&self, plane: Option<u32>, access: AccessState) {
        let mut tracked = self.tracked.lock();
        match plane {
            Some(plane) => tracked[plane as usize] = access,
            None => *tracked = [access; 2],
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub image: vk::Image,
    pub full_aspect: vk::ImageAspectFlags,
    pub supports_sampling: bool,
    /// Present on depth/stencil images.
    pub planes: Option<Arc<DepthStencilPlanes>>,
}

impl TextureDesc {
    pub fn color(image: vk::Image, supports_sampling: bool) -> Self {
        Self {
            image,
            full_aspect: vk::ImageAspectFlags::COLOR,
            supports_sampling,
            planes: None,
        }
    }
    pub fn depth_stencil(
        image: vk::Image,
        full_aspect: vk::ImageAspectFlags,
        supports_sampling: bool,
        initial_access: AccessState,
    ) -> Self {
        assert!(
            full_aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL),
            "depth/stencil texture created with aspect {full_aspect:?}"
        );
        Self {
            image,
            full_aspect,
            supports_sampling,
            planes: Some(DepthStencilPlanes::new(initial_access)),
        }
    }
    pub fn is_depth_stencil(&self) -> bool {
        self.full_aspect
            .intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl BufferDesc {
    pub fn whole(buffer: vk::Buffer, usage: vk::BufferUsageFlags) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            usage,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Resource {
    Texture(TextureDesc),
    Buffer(BufferDesc),
    AccelerationStructure,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Texture(_) => ResourceKind::Texture,
            Resource::Buffer(_) => ResourceKind::Buffer,
            Resource::AccelerationStructure => ResourceKind::AccelerationStructure,
        }
    }
    pub fn translation_target(&self) -> TranslationTarget {
        match self {
            Resource::Texture(texture) => {
                TranslationTarget::texture(texture.is_depth_stencil(), texture.supports_sampling)
            }
            Resource::Buffer(buffer) => TranslationTarget::buffer(buffer.usage),
            Resource::AccelerationStructure => TranslationTarget::acceleration_structure(),
        }
    }
}

/// A request to move one resource (or a subresource of it) from one access state to another.
#[derive(Clone, Debug)]
pub struct TransitionInfo {
    pub resource: Resource,
    pub access_before: AccessState,
    pub access_after: AccessState,
    /// `None` addresses every mip level.
    pub mip_index: Option<u32>,
    /// `None` addresses every array layer.
    pub array_slice: Option<u32>,
    /// `None` addresses every plane.
    pub plane_slice: Option<u32>,
}

impl TransitionInfo {
    pub fn new(resource: Resource, access_before: AccessState, access_after: AccessState) -> Self {
        Self {
            resource,
            access_before,
            access_after,
            mip_index: None,
            array_slice: None,
            plane_slice: None,
        }
    }
    pub fn mip(mut self, mip_index: u32) -> Self {
        self.mip_index = Some(mip_index);
        self
    }
    pub fn array_slice(mut self, array_slice: u32) -> Self {
        self.array_slice = Some(array_slice);
        self
    }
    pub fn plane(mut self, plane_slice: u32) -> Self {
        self.plane_slice = Some(plane_slice);
        self
    }
    pub fn subresource_range(&self, aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        let (base_mip_level, level_count) = match self.mip_index {
            Some(mip) => (mip, 1),
            None => (0, vk::REMAINING_MIP_LEVELS),
        };
        let (base_array_layer, layer_count) = match self.array_slice {
            Some(layer) => (layer, 1),
            None => (0, vk::REMAINING_ARRAY_LAYERS),
        };
        vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TransitionCreateFlags: u32 {
        /// The caller orders the pipelines itself; no semaphore is created.
        const NO_FENCE = 1 << 0;
        /// Never split this transition with an event.
        const NO_SPLIT = 1 << 1;
    }
}

#[derive(Clone, Debug)]
pub struct TransitionCreateInfo {
    pub src_pipelines: Pipelines,
    pub dst_pipelines: Pipelines,
    pub flags: TransitionCreateFlags,
    pub infos: Vec<TransitionInfo>,
}

/// A device event backing a split barrier.
pub struct Event {
    device: Arc<dyn DeviceBackend>,
    event: vk::Event,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Event({:?})", self.event))
    }
}

impl Event {
    pub fn new(device: Arc<dyn DeviceBackend>) -> VkResult<Self> {
        let event = device.create_event()?;
        Ok(Self { device, event })
    }
    pub fn raw(&self) -> vk::Event {
        self.event
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        tracing::debug!(event = ?self.event, "drop event");
        self.device.destroy_event(self.event);
    }
}

/// An ordered batch of transition requests sharing source and destination pipelines.
/// Recorded once with `begin` on the source side and once with `end` on the destination side.
#[derive(Debug)]
pub struct Transition {
    src_pipelines: Pipelines,
    dst_pipelines: Pipelines,
    infos: Vec<TransitionInfo>,
    semaphore: Option<Arc<Semaphore>>,
    event: Option<Event>,
}

impl Transition {
    pub fn create(
        info: TransitionCreateInfo,
        device: &Arc<dyn DeviceBackend>,
        config: &SyncConfig,
    ) -> VkResult<Self> {
        assert!(
            !info.src_pipelines.is_empty() && !info.dst_pipelines.is_empty(),
            "transitions need source and destination pipelines"
        );
        let caps = device.capabilities();
        let crosses_pipelines = info.src_pipelines != info.dst_pipelines;

        let semaphore = if crosses_pipelines && !info.flags.contains(TransitionCreateFlags::NO_FENCE) {
            Some(Arc::new(Semaphore::new(device.clone())?))
        } else {
            None
        };

        // Host reads can not be ordered through a device-only event.
        let includes_host_sync = info.infos.iter().any(|info| {
            info.access_before.intersects(AccessState::CPU_READ)
                || info.access_after.intersects(AccessState::CPU_READ)
        });
        let event = if config.allow_split_barriers
            && !config.limits_batch_size()
            && caps.synchronization2
            && !crosses_pipelines
            && !info.flags.contains(TransitionCreateFlags::NO_SPLIT)
            && !includes_host_sync
        {
            Some(Event::new(device.clone())?)
        } else {
            None
        };

        tracing::trace!(
            src = ?info.src_pipelines,
            dst = ?info.dst_pipelines,
            count = info.infos.len(),
            semaphore = semaphore.is_some(),
            split = event.is_some(),
            "create transition"
        );
        Ok(Self {
            src_pipelines: info.src_pipelines,
            dst_pipelines: info.dst_pipelines,
            infos: info.infos,
            semaphore,
            event,
        })
    }

    pub fn src_pipelines(&self) -> Pipelines {
        self.src_pipelines
    }
    pub fn dst_pipelines(&self) -> Pipelines {
        self.dst_pipelines
    }
    pub fn infos(&self) -> &[TransitionInfo] {
        &self.infos
    }
    pub fn semaphore(&self) -> Option<&Arc<Semaphore>> {
        self.semaphore.as_ref()
    }
    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }
    /// Starts and ends on the same single pipeline.
    pub fn is_single_queue(&self) -> bool {
        self.src_pipelines.is_single() && self.src_pipelines == self.dst_pipelines
    }

    /// Record the after-state of every depth/stencil plane this transition touches.
    /// Called once its barriers were recorded.
    pub fn track_plane_accesses(&self) {
        for info in self.infos.iter() {
            if info.access_after.contains(AccessState::DISCARD) {
                continue;
            }
            if let Resource::Texture(TextureDesc {
                planes: Some(planes), ..
            }) = &info.resource
            {
                planes.set(info.plane_slice, info.access_after);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capabilities::DeviceCapabilities;
    use crate::testing::FakeGpu;
    use ash::vk::Handle;

    fn buffer_info(before: AccessState, after: AccessState) -> TransitionInfo {
        TransitionInfo::new(
            Resource::Buffer(BufferDesc::whole(
                vk::Buffer::from_raw(1),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )),
            before,
            after,
        )
    }

    fn create_info(src: Pipelines, dst: Pipelines, infos: Vec<TransitionInfo>) -> TransitionCreateInfo {
        TransitionCreateInfo {
            src_pipelines: src,
            dst_pipelines: dst,
            flags: TransitionCreateFlags::empty(),
            infos,
        }
    }

    #[test]
    fn cross_pipeline_transitions_get_a_semaphore() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let device = gpu.device();
        let config = SyncConfig::default();
        let infos = vec![buffer_info(AccessState::UAV_COMPUTE, AccessState::SRV_GRAPHICS)];

        let transition = Transition::create(
            create_info(Pipelines::ASYNC_COMPUTE, Pipelines::GRAPHICS, infos.clone()),
            &device,
            &config,
        )
        .unwrap();
        assert!(transition.semaphore().is_some());
        assert!(transition.event().is_none());
        assert!(!transition.is_single_queue());

        let mut unfenced = create_info(Pipelines::ASYNC_COMPUTE, Pipelines::GRAPHICS, infos);
        unfenced.flags = TransitionCreateFlags::NO_FENCE;
        let transition = Transition::create(unfenced, &device, &config).unwrap();
        assert!(transition.semaphore().is_none());
    }

    #[test]
    fn same_queue_transitions_are_split() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let device = gpu.device();
        let infos = vec![buffer_info(AccessState::UAV_COMPUTE, AccessState::SRV_COMPUTE)];
        let transition = Transition::create(
            create_info(Pipelines::GRAPHICS, Pipelines::GRAPHICS, infos.clone()),
            &device,
            &SyncConfig::default(),
        )
        .unwrap();
        assert!(transition.event().is_some());
        assert!(transition.semaphore().is_none());
        assert!(transition.is_single_queue());

        let batched = SyncConfig {
            max_barriers_per_batch: 16,
            ..Default::default()
        };
        let transition = Transition::create(
            create_info(Pipelines::GRAPHICS, Pipelines::GRAPHICS, infos),
            &device,
            &batched,
        )
        .unwrap();
        assert!(transition.event().is_none());
    }

    #[test]
    fn host_reads_are_never_split() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let transition = Transition::create(
            create_info(
                Pipelines::GRAPHICS,
                Pipelines::GRAPHICS,
                vec![buffer_info(AccessState::COPY_DEST, AccessState::CPU_READ)],
            ),
            &gpu.device(),
            &SyncConfig::default(),
        )
        .unwrap();
        assert!(transition.event().is_none());
    }

    #[test]
    fn legacy_devices_do_not_split() {
        let gpu = FakeGpu::new(DeviceCapabilities {
            synchronization2: false,
            ..Default::default()
        });
        let transition = Transition::create(
            create_info(
                Pipelines::GRAPHICS,
                Pipelines::GRAPHICS,
                vec![buffer_info(AccessState::UAV_COMPUTE, AccessState::SRV_COMPUTE)],
            ),
            &gpu.device(),
            &SyncConfig::default(),
        )
        .unwrap();
        assert!(transition.event().is_none());
    }

    #[test]
    fn subresource_ranges() {
        let info = buffer_info(AccessState::UNKNOWN, AccessState::SRV_COMPUTE);
        let range = info.subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        let range = info.mip(3).array_slice(2).subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!((range.base_mip_level, range.level_count), (3, 1));
        assert_eq!((range.base_array_layer, range.layer_count), (2, 1));
    }

    #[test]
    fn plane_accesses_are_tracked_except_discards() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let texture = TextureDesc::depth_stencil(
            vk::Image::from_raw(3),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            true,
            AccessState::DSV_WRITE,
        );
        let planes = texture.planes.clone().unwrap();
        let infos = vec![
            TransitionInfo::new(
                Resource::Texture(texture.clone()),
                AccessState::DSV_WRITE,
                AccessState::SRV_GRAPHICS,
            )
            .plane(0),
            TransitionInfo::new(Resource::Texture(texture), AccessState::DSV_WRITE, AccessState::DISCARD).plane(1),
        ];
        let transition = Transition::create(
            create_info(Pipelines::GRAPHICS, Pipelines::GRAPHICS, infos),
            &gpu.device(),
            &SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(planes.get(0), AccessState::DSV_WRITE);
        transition.track_plane_accesses();
        assert_eq!(planes.get(0), AccessState::SRV_GRAPHICS);
        assert_eq!(planes.get(1), AccessState::DSV_WRITE);
    }
}
