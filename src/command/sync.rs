//! Barriers the subsystem records on its own behalf, outside of the transition path.

use ash::vk;

use super::CommandStream;
use crate::access::{AccessState, TransitionSide};
use crate::barrier::{Barrier, BarrierSet, ImageBarrier, MemoryBarrier};
use crate::capabilities::DeviceCapabilities;
use crate::transition::TextureDesc;
use crate::translate::{
    layout_access_mask, layout_stage_mask, merged_depth_stencil_layout, strip_pre_raster_stages, translate,
    TranslationTarget,
};

/// Every mip and layer of `aspect_mask`.
pub fn full_subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Accumulates barriers and records them with a single dependency call.
pub struct PipelineBarrier<'a> {
    capabilities: &'a DeviceCapabilities,
    barriers: BarrierSet,
}

impl<'a> PipelineBarrier<'a> {
    pub fn new(capabilities: &'a DeviceCapabilities) -> Self {
        Self {
            capabilities,
            barriers: BarrierSet::new(),
        }
    }

    pub fn barriers(&self) -> &BarrierSet {
        &self.barriers
    }

    /// Mash everything into the single global memory barrier.
    pub fn add_memory_barrier(
        &mut self,
        src_stage_mask: vk::PipelineStageFlags2,
        src_access_mask: vk::AccessFlags2,
        dst_stage_mask: vk::PipelineStageFlags2,
        dst_access_mask: vk::AccessFlags2,
    ) -> &mut Self {
        self.barriers.push(Barrier::Memory(MemoryBarrier {
            src_stage_mask,
            src_access_mask,
            dst_stage_mask,
            dst_access_mask,
        }));
        self
    }

    /// Transition every subresource of `texture`, deriving stages and access from the layouts.
    pub fn add_full_image_layout_transition(
        &mut self,
        texture: &TextureDesc,
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
    ) -> &mut Self {
        let memory_barrier = layout_dependency(src_layout, dst_layout);
        let (src_layout, dst_layout) = if texture.is_depth_stencil() {
            (
                merged_depth_stencil_layout(src_layout, src_layout),
                merged_depth_stencil_layout(dst_layout, dst_layout),
            )
        } else {
            (src_layout, dst_layout)
        };
        self.push_image(
            texture.image,
            memory_barrier,
            src_layout,
            dst_layout,
            full_subresource_range(texture.full_aspect),
        );
        self
    }

    pub fn add_image_layout_transition(
        &mut self,
        image: vk::Image,
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
        subresource_range: vk::ImageSubresourceRange,
    ) -> &mut Self {
        self.push_image(
            image,
            layout_dependency(src_layout, dst_layout),
            src_layout,
            dst_layout,
            subresource_range,
        );
        self
    }

    /// Transition `subresource_range` of `texture` between two known access states.
    ///
    /// `layout` holds the layout the range currently sits in. It is used whenever `src_access`
    /// does not imply one, and is updated to the new layout.
    pub fn add_image_access_transition(
        &mut self,
        texture: &TextureDesc,
        src_access: AccessState,
        dst_access: AccessState,
        subresource_range: vk::ImageSubresourceRange,
        layout: &mut vk::ImageLayout,
    ) -> &mut Self {
        assert!(!dst_access.is_unknown(), "image access transitions need a known destination state");
        let target = TranslationTarget::texture(texture.is_depth_stencil(), texture.supports_sampling);
        let src = translate(src_access, &target, TransitionSide::Source, self.capabilities);
        let mut dst = translate(dst_access, &target, TransitionSide::Destination, self.capabilities);

        strip_pre_raster_stages(&src, &mut dst);

        let (src_layout, src_access_mask) = if src.layout == vk::ImageLayout::UNDEFINED {
            (*layout, layout_access_mask(*layout))
        } else {
            if src.layout != *layout {
                tracing::warn!(
                    expected = ?*layout,
                    translated = ?src.layout,
                    "image access transition starts from an unexpected layout"
                );
            }
            (src.layout, src.access_mask)
        };
        let dst_layout = if dst.layout == vk::ImageLayout::UNDEFINED {
            vk::ImageLayout::GENERAL
        } else {
            dst.layout
        };

        self.push_image(
            texture.image,
            MemoryBarrier {
                src_stage_mask: src.stage_mask,
                src_access_mask,
                dst_stage_mask: dst.stage_mask,
                dst_access_mask: dst.access_mask,
            },
            src_layout,
            dst_layout,
            subresource_range,
        );
        *layout = dst_layout;
        self
    }

    /// Record everything in one dependency call. Without synchronization2 the barriers are
    /// downgraded to aggregate stage masks and joint depth/stencil layouts.
    pub fn execute(&self, stream: &mut impl CommandStream) {
        if self.barriers.is_empty() {
            return;
        }
        if self.capabilities.synchronization2 {
            let barriers = self.barriers.to_sync2();
            for batch in barriers.batches(0) {
                stream.pipeline_barrier2(batch);
            }
        } else {
            let barriers = self.barriers.to_legacy();
            for batch in barriers.batches(0) {
                stream.pipeline_barrier(batch);
            }
        }
    }

    fn push_image(
        &mut self,
        image: vk::Image,
        memory_barrier: MemoryBarrier,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        subresource_range: vk::ImageSubresourceRange,
    ) {
        self.barriers.push(Barrier::Image(ImageBarrier {
            memory_barrier,
            old_layout,
            new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range,
        }));
    }
}

fn layout_dependency(src_layout: vk::ImageLayout, dst_layout: vk::ImageLayout) -> MemoryBarrier {
    MemoryBarrier {
        src_stage_mask: layout_stage_mask(src_layout),
        src_access_mask: layout_access_mask(src_layout),
        dst_stage_mask: layout_stage_mask(dst_layout),
        dst_access_mask: layout_access_mask(dst_layout),
    }
}
