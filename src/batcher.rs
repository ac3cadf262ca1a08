//! Turns a batch of transition requests into a minimal [`BarrierSet`].

use std::sync::Arc;

use ash::vk;

use crate::access::{is_read_only_access, AccessState, SyncPoint, TransitionSide};
use crate::barrier::{Barrier, BarrierSet, BufferBarrier, ImageBarrier, MemoryBarrier};
use crate::capabilities::DeviceCapabilities;
use crate::config::SyncConfig;
use crate::transition::{DepthStencilPlanes, Resource, Transition, TransitionInfo};
use crate::translate::{
    depth_or_stencil_layout, depth_stencil_aspect, merged_depth_stencil_layout, strip_pre_raster_stages,
    translate, translate_depth_stencil_plane,
};

/// Builds barriers from transition requests. Batching only reads the tracked depth/stencil plane
/// accesses; [`Transition::track_plane_accesses`] records the new ones once the barriers were
/// recorded, so batching the same transition twice yields the same barriers.
pub struct BarrierBatcher<'a> {
    caps: &'a DeviceCapabilities,
    config: &'a SyncConfig,
}

/// Bookkeeping for an image barrier on a depth/stencil image.
struct PlaneExtra {
    planes: Arc<DepthStencilPlanes>,
    full_aspect: vk::ImageAspectFlags,
}

impl<'a> BarrierBatcher<'a> {
    pub fn new(caps: &'a DeviceCapabilities, config: &'a SyncConfig) -> Self {
        Self { caps, config }
    }

    pub fn batch_transition(&self, transition: &Transition) -> BarrierSet {
        self.batch(
            transition.src_pipelines() == transition.dst_pipelines(),
            transition.infos(),
        )
    }

    /// Build the barriers for `infos`. `same_queue` allows folding into a global memory barrier.
    pub fn batch(&self, same_queue: bool, infos: &[TransitionInfo]) -> BarrierSet {
        let mut global: Option<MemoryBarrier> = None;
        let mut barriers: Vec<Barrier> = Vec::with_capacity(infos.len());
        let mut extras: Vec<Option<PlaneExtra>> = Vec::with_capacity(infos.len());

        for info in infos {
            if info.access_after.contains(AccessState::DISCARD) {
                // Discarding is a no-op as a destination.
                continue;
            }
            let (src, dst) = self.sync_points(info);
            let (barrier, extra) = match &info.resource {
                Resource::Buffer(buffer) => (
                    Barrier::Buffer(BufferBarrier {
                        memory_barrier: dependency(&src, &dst),
                        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        buffer: buffer.buffer,
                        offset: buffer.offset,
                        size: buffer.size,
                    }),
                    None,
                ),
                Resource::Texture(texture) => {
                    let aspect = if texture.is_depth_stencil() && info.plane_slice.is_some() {
                        depth_stencil_aspect(info.plane_slice)
                    } else {
                        texture.full_aspect
                    };
                    let barrier = Barrier::Image(ImageBarrier {
                        memory_barrier: dependency(&src, &dst),
                        old_layout: src.layout,
                        new_layout: dst.layout,
                        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        image: texture.image,
                        subresource_range: info.subresource_range(aspect),
                    });
                    let extra = texture.planes.clone().map(|planes| PlaneExtra {
                        planes,
                        full_aspect: texture.full_aspect,
                    });
                    (barrier, extra)
                }
                // Acceleration structures have no barrier of their own.
                Resource::AccelerationStructure => (Barrier::Memory(dependency(&src, &dst)), None),
            };

            let can_fold = match barrier {
                Barrier::Memory(_) => true,
                _ => same_queue && self.config.fold_memory_barriers && barrier.is_foldable(),
            };
            if can_fold {
                let global = global.get_or_insert_with(MemoryBarrier::default);
                self.fold(global, &src, &dst);
                continue;
            }
            if let Barrier::Image(image) = &barrier {
                assert!(
                    image.new_layout != vk::ImageLayout::UNDEFINED,
                    "image barrier to the undefined layout ({:?} -> {:?})",
                    info.access_before,
                    info.access_after
                );
            }
            barriers.push(barrier);
            extras.push(extra);
        }

        merge_depth_stencil_planes(&mut barriers, &extras);

        let mut set = BarrierSet::new();
        if let Some(global) = global {
            set.push(Barrier::Memory(global));
        }
        for barrier in barriers {
            set.push(barrier);
        }
        set
    }

    fn sync_points(&self, info: &TransitionInfo) -> (SyncPoint, SyncPoint) {
        if let Resource::Texture(texture) = &info.resource {
            if texture.is_depth_stencil() {
                return (
                    translate_depth_stencil_plane(info.access_before),
                    translate_depth_stencil_plane(info.access_after),
                );
            }
        }
        let target = info.resource.translation_target();
        let src = translate(info.access_before, &target, TransitionSide::Source, self.caps);
        let mut dst = translate(info.access_after, &target, TransitionSide::Destination, self.caps);
        strip_pre_raster_stages(&src, &mut dst);
        (src, dst)
    }

    fn fold(&self, barrier: &mut MemoryBarrier, src: &SyncPoint, dst: &SyncPoint) {
        barrier.src_stage_mask |= src.stage_mask;
        barrier.dst_stage_mask |= dst.stage_mask;
        // A read-only source needs an execution dependency only.
        if !(self.config.skip_read_only_access && is_read_only_access(src.access_mask)) {
            barrier.src_access_mask |= src.access_mask;
            barrier.dst_access_mask |= dst.access_mask;
        }
    }
}

fn dependency(src: &SyncPoint, dst: &SyncPoint) -> MemoryBarrier {
    MemoryBarrier {
        src_stage_mask: src.stage_mask,
        src_access_mask: src.access_mask,
        dst_stage_mask: dst.stage_mask,
        dst_access_mask: dst.access_mask,
    }
}

/// Rewrite per-plane depth/stencil barriers into barriers covering both planes with joint layouts.
///
/// A plane barrier is merged with a later barrier on the other plane of the same image when one
/// exists, otherwise with the other plane's tracked access. Merged partners are removed.
fn merge_depth_stencil_planes(barriers: &mut Vec<Barrier>, extras: &[Option<PlaneExtra>]) {
    if extras.iter().all(Option::is_none) {
        return;
    }
    for index in 0..barriers.len() {
        let Some(extra) = &extras[index] else {
            continue;
        };
        let (head, tail) = barriers.split_at_mut(index + 1);
        let Barrier::Image(barrier) = &mut head[index] else {
            continue;
        };
        if barrier.subresource_range.aspect_mask.is_empty() {
            // Already merged into an earlier barrier.
            continue;
        }

        let aspect = barrier.subresource_range.aspect_mask;
        if aspect == extra.full_aspect {
            barrier.old_layout = merged_depth_stencil_layout(barrier.old_layout, barrier.old_layout);
            barrier.new_layout = merged_depth_stencil_layout(barrier.new_layout, barrier.new_layout);
            continue;
        }

        let other_aspect = extra.full_aspect ^ aspect;
        let partner = tail.iter_mut().find_map(|other| match other {
            Barrier::Image(other)
                if other.image == barrier.image
                    && other.subresource_range.aspect_mask == other_aspect =>
            {
                Some(other)
            }
            _ => None,
        });
        let (other_old, other_new) = match partner {
            Some(other) => {
                assert_eq!(
                    (other.subresource_range.base_mip_level, other.subresource_range.base_array_layer),
                    (barrier.subresource_range.base_mip_level, barrier.subresource_range.base_array_layer),
                    "depth and stencil barriers of {:?} address different subresources",
                    barrier.image
                );
                let dependency = other.memory_barrier;
                barrier.memory_barrier.src_stage_mask |= dependency.src_stage_mask;
                barrier.memory_barrier.src_access_mask |= dependency.src_access_mask;
                barrier.memory_barrier.dst_stage_mask |= dependency.dst_stage_mask;
                barrier.memory_barrier.dst_access_mask |= dependency.dst_access_mask;
                other.subresource_range.aspect_mask = vk::ImageAspectFlags::empty();
                (other.old_layout, other.new_layout)
            }
            None => {
                let other_plane = if other_aspect == vk::ImageAspectFlags::DEPTH { 0 } else { 1 };
                let layout = depth_or_stencil_layout(extra.planes.get(other_plane));
                (layout, layout)
            }
        };

        if other_aspect == vk::ImageAspectFlags::STENCIL {
            barrier.old_layout = merged_depth_stencil_layout(barrier.old_layout, other_old);
            barrier.new_layout = merged_depth_stencil_layout(barrier.new_layout, other_new);
        } else {
            barrier.old_layout = merged_depth_stencil_layout(other_old, barrier.old_layout);
            barrier.new_layout = merged_depth_stencil_layout(other_new, barrier.new_layout);
        }
        barrier.subresource_range.aspect_mask |= other_aspect;
    }

    barriers.retain(|barrier| match barrier {
        Barrier::Image(barrier) => !barrier.subresource_range.aspect_mask.is_empty(),
        _ => true,
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transition::{BufferDesc, TextureDesc};
    use crate::translate::PRE_RASTER_SHADER_STAGES;
    use ash::vk::Handle;

    fn buffer(raw: u64) -> Resource {
        Resource::Buffer(BufferDesc::whole(
            vk::Buffer::from_raw(raw),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
        ))
    }

    fn depth_stencil(raw: u64, initial: AccessState) -> TextureDesc {
        TextureDesc::depth_stencil(
            vk::Image::from_raw(raw),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            true,
            initial,
        )
    }

    #[test]
    fn same_queue_buffer_transitions_fold() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let infos = [
            TransitionInfo::new(buffer(1), AccessState::UAV_COMPUTE, AccessState::SRV_GRAPHICS),
            TransitionInfo::new(buffer(2), AccessState::COPY_DEST, AccessState::VERTEX_OR_INDEX_BUFFER),
            TransitionInfo::new(buffer(3), AccessState::SRV_COMPUTE, AccessState::UAV_COMPUTE),
        ];
        let set = batcher.batch(true, &infos);
        assert_eq!(set.len(), 1);
        let global = set.global().unwrap();

        let target = infos[0].resource.translation_target();
        let mut expected_dst_access = vk::AccessFlags2::NONE;
        for info in &infos[..2] {
            expected_dst_access |=
                translate(info.access_after, &target, TransitionSide::Destination, &caps).access_mask;
        }
        // The third source only read the buffer and contributes no access bits.
        assert_eq!(global.dst_access_mask, expected_dst_access);
        assert!(global.src_access_mask.contains(vk::AccessFlags2::SHADER_WRITE));
        assert!(global.src_access_mask.contains(vk::AccessFlags2::TRANSFER_WRITE));
        assert!(global.dst_stage_mask.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(global.src_stage_mask.contains(vk::PipelineStageFlags2::TRANSFER));
    }

    #[test]
    fn read_only_skip_can_be_disabled() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig {
            skip_read_only_access: false,
            ..Default::default()
        };
        let batcher = BarrierBatcher::new(&caps, &config);
        let infos = [TransitionInfo::new(buffer(1), AccessState::SRV_COMPUTE, AccessState::UAV_COMPUTE)];
        let set = batcher.batch(true, &infos);
        let global = set.global().unwrap();
        assert_eq!(global.src_access_mask, vk::AccessFlags2::SHADER_READ);
        assert!(global.dst_access_mask.contains(vk::AccessFlags2::SHADER_WRITE));
    }

    #[test]
    fn cross_queue_and_unfolded_transitions_get_dedicated_barriers() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let infos = [
            TransitionInfo::new(buffer(1), AccessState::UAV_COMPUTE, AccessState::SRV_GRAPHICS),
            TransitionInfo::new(
                Resource::Texture(TextureDesc::color(vk::Image::from_raw(9), true)),
                AccessState::RTV,
                AccessState::SRV_GRAPHICS,
            ),
        ];
        let set = batcher.batch(false, &infos);
        assert!(set.global().is_none());
        assert_eq!(set.buffer_barriers().count(), 1);
        let image = set.image_barriers().next().unwrap();
        assert_eq!(image.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(image.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(image.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(image.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);

        let no_fold = SyncConfig {
            fold_memory_barriers: false,
            ..Default::default()
        };
        let set = BarrierBatcher::new(&caps, &no_fold).batch(true, &infos[..1]);
        assert_eq!(set.buffer_barriers().count(), 1);
    }

    #[test]
    fn layout_changes_are_never_folded() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let texture = Resource::Texture(TextureDesc::color(vk::Image::from_raw(4), true));
        let infos = [
            TransitionInfo::new(texture.clone(), AccessState::UAV_COMPUTE, AccessState::UAV_GRAPHICS),
            TransitionInfo::new(texture, AccessState::COPY_DEST, AccessState::SRV_COMPUTE).mip(2),
        ];
        let set = batcher.batch(true, &infos);
        assert!(set.global().is_some());
        let image = set.image_barriers().next().unwrap();
        assert_eq!(image.subresource_range.base_mip_level, 2);
        assert_eq!(image.subresource_range.level_count, 1);
    }

    #[test]
    fn discard_after_state_is_skipped() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let infos = [TransitionInfo::new(
            Resource::Texture(TextureDesc::color(vk::Image::from_raw(4), true)),
            AccessState::SRV_GRAPHICS,
            AccessState::DISCARD,
        )];
        assert!(batcher.batch(true, &infos).is_empty());
    }

    #[test]
    fn vertex_stages_only_wait_for_compute() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig {
            fold_memory_barriers: false,
            ..Default::default()
        };
        let batcher = BarrierBatcher::new(&caps, &config);
        let from_copy = [TransitionInfo::new(buffer(1), AccessState::COPY_DEST, AccessState::SRV_GRAPHICS)];
        let set = batcher.batch(true, &from_copy);
        let barrier = set.buffer_barriers().next().unwrap();
        assert!(!barrier
            .memory_barrier
            .dst_stage_mask
            .intersects(PRE_RASTER_SHADER_STAGES));
        assert!(barrier
            .memory_barrier
            .dst_stage_mask
            .contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));

        let from_compute = [TransitionInfo::new(buffer(1), AccessState::UAV_COMPUTE, AccessState::SRV_GRAPHICS)];
        let set = batcher.batch(true, &from_compute);
        let barrier = set.buffer_barriers().next().unwrap();
        assert!(barrier
            .memory_barrier
            .dst_stage_mask
            .contains(vk::PipelineStageFlags2::VERTEX_SHADER));
    }

    #[test]
    fn acceleration_structures_use_the_memory_barrier() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let infos = [TransitionInfo::new(
            Resource::AccelerationStructure,
            AccessState::BVH_WRITE,
            AccessState::BVH_READ,
        )];
        let set = batcher.batch(false, &infos);
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.global().unwrap().src_access_mask,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
        );
    }

    #[test]
    fn depth_and_stencil_barriers_merge() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let texture = depth_stencil(5, AccessState::DSV_WRITE);
        let infos = [
            TransitionInfo::new(
                Resource::Texture(texture.clone()),
                AccessState::DSV_WRITE,
                AccessState::SRV_GRAPHICS,
            )
            .plane(0),
            TransitionInfo::new(
                Resource::Texture(texture.clone()),
                AccessState::DSV_WRITE,
                AccessState::SRV_GRAPHICS,
            )
            .plane(1),
        ];
        let set = batcher.batch(true, &infos);
        let images: Vec<_> = set.image_barriers().collect();
        assert_eq!(images.len(), 1);
        assert_eq!(
            images[0].subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(images[0].old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(images[0].new_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        // Batching leaves the plane tracking alone.
        let planes = texture.planes.unwrap();
        assert_eq!(planes.get(0), AccessState::DSV_WRITE);
        assert_eq!(planes.get(1), AccessState::DSV_WRITE);
        assert_eq!(batcher.batch(true, &infos), set);
    }

    #[test]
    fn single_plane_merges_with_tracked_access() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let texture = depth_stencil(6, AccessState::DSV_WRITE);
        let infos = [TransitionInfo::new(
            Resource::Texture(texture.clone()),
            AccessState::DSV_WRITE,
            AccessState::SRV_GRAPHICS,
        )
        .plane(0)];
        let set = batcher.batch(true, &infos);
        let image = set.image_barriers().next().unwrap();
        assert_eq!(
            image.subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(image.old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        // Stencil stays writable.
        assert_eq!(
            image.new_layout,
            vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(texture.planes.as_ref().unwrap().get(1), AccessState::DSV_WRITE);
    }

    #[test]
    fn full_depth_stencil_transition_uses_joint_layouts() {
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let batcher = BarrierBatcher::new(&caps, &config);
        let infos = [TransitionInfo::new(
            Resource::Texture(depth_stencil(7, AccessState::UNKNOWN)),
            AccessState::DISCARD,
            AccessState::DSV_WRITE,
        )];
        let set = batcher.batch(true, &infos);
        let image = set.image_barriers().next().unwrap();
        assert_eq!(image.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(image.new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }
}
