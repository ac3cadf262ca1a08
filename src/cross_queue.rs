//! Queue-family ownership transfers for transitions that span the graphics and async compute queues.

use ash::vk;

use crate::access::Pipelines;
use crate::barrier::{Barrier, BarrierSet, MemoryBarrier};
use crate::config::SyncConfig;

/// Queue families backing the logical pipelines and what the async compute queue can execute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueTopology {
    pub graphics_family: u32,
    pub compute_family: u32,
    pub compute_stage_mask: vk::PipelineStageFlags2,
    pub compute_access_mask: vk::AccessFlags2,
}

impl QueueTopology {
    /// Async compute runs on its own queue family.
    pub fn has_async_compute(&self) -> bool {
        self.graphics_family != self.compute_family
    }

    pub fn family_of(&self, pipeline: Pipelines) -> u32 {
        assert!(pipeline.is_single(), "{pipeline:?} is not a single pipeline");
        if pipeline == Pipelines::GRAPHICS {
            self.graphics_family
        } else {
            self.compute_family
        }
    }

    /// Whether cross-queue transitions transfer ownership instead of relying on concurrent sharing.
    pub fn use_ownership_transfers(&self, config: &SyncConfig) -> bool {
        self.has_async_compute() && (!config.concurrent_buffers || !config.concurrent_images)
    }
}

/// Drop the stage and access bits the async compute queue can not execute from every barrier.
pub fn mask_supported_async_flags(
    barriers: &mut BarrierSet,
    topology: &QueueTopology,
    mask_src: bool,
    mask_dst: bool,
) {
    for barrier in barriers.iter_mut() {
        mask_dependency(barrier.dependency_mut(), topology, mask_src, mask_dst);
    }
}

fn mask_dependency(dependency: &mut MemoryBarrier, topology: &QueueTopology, mask_src: bool, mask_dst: bool) {
    if mask_src {
        dependency.src_stage_mask &= topology.compute_stage_mask;
        dependency.src_access_mask &= topology.compute_access_mask;
    }
    if mask_dst {
        dependency.dst_stage_mask &= topology.compute_stage_mask;
        dependency.dst_access_mask &= topology.compute_access_mask;
    }
}

/// Turn the buffer and image barriers of `barriers` into the release (`is_begin`) or acquire half
/// of a queue-family ownership transfer. Resource classes using concurrent sharing are left alone.
pub fn patch_cross_pipe_transitions(
    barriers: &mut BarrierSet,
    topology: &QueueTopology,
    config: &SyncConfig,
    src: Pipelines,
    dst: Pipelines,
    executing: Pipelines,
    is_begin: bool,
) {
    let patches = |barrier: &&mut Barrier| takes_part_in_transfer(barrier, config);

    if src.is_single() && dst.is_single() {
        // Keep the layout change in the transfer so the whole transition is one barrier.
        if is_begin {
            assert_eq!(src, executing, "release recorded outside the source pipeline");
        } else {
            assert_eq!(dst, executing, "acquire recorded outside the destination pipeline");
        }
        let (src_family, dst_family) = (topology.family_of(src), topology.family_of(dst));
        for barrier in barriers.iter_mut().filter(patches) {
            set_queue_families(barrier, src_family, dst_family);
            let dependency = barrier.dependency_mut();
            if is_begin {
                dependency.dst_access_mask = vk::AccessFlags2::NONE;
            } else {
                dependency.src_access_mask = vk::AccessFlags2::NONE;
            }
        }
        return;
    }

    // Graphics -> All and All -> AsyncCompute transfer from graphics.
    let src_is_graphics = src == Pipelines::GRAPHICS || dst == Pipelines::ASYNC_COMPUTE;
    let (src_family, dst_family) = if src_is_graphics {
        (topology.graphics_family, topology.compute_family)
    } else {
        (topology.compute_family, topology.graphics_family)
    };
    if is_begin {
        assert!(src.contains(executing), "release recorded outside {src:?}");
    } else {
        assert!(dst.contains(executing), "acquire recorded outside {dst:?}");
    }

    for barrier in barriers.iter_mut().filter(patches) {
        mask_dependency(barrier.dependency_mut(), topology, !src_is_graphics, src_is_graphics);
        set_queue_families(barrier, src_family, dst_family);
        // The layout change is recorded separately on the single pipeline.
        if let Barrier::Image(image) = barrier {
            if src.is_single() {
                image.old_layout = image.new_layout;
            } else if dst.is_single() {
                image.new_layout = image.old_layout;
            }
        }
        let dependency = barrier.dependency_mut();
        if is_begin {
            dependency.dst_access_mask = vk::AccessFlags2::NONE;
        } else {
            dependency.src_access_mask = vk::AccessFlags2::NONE;
        }
    }
}

/// A patched copy of the barriers taking part in an ownership transfer. Memory barriers and
/// resources with concurrent sharing are left out.
pub fn ownership_transfer_barriers(
    barriers: &BarrierSet,
    topology: &QueueTopology,
    config: &SyncConfig,
    src: Pipelines,
    dst: Pipelines,
    executing: Pipelines,
    is_begin: bool,
) -> BarrierSet {
    let mut transfer: BarrierSet = barriers
        .iter()
        .filter(|barrier| takes_part_in_transfer(barrier, config))
        .copied()
        .collect();
    patch_cross_pipe_transitions(&mut transfer, topology, config, src, dst, executing, is_begin);
    transfer
}

fn takes_part_in_transfer(barrier: &Barrier, config: &SyncConfig) -> bool {
    match barrier {
        Barrier::Memory(_) => false,
        Barrier::Buffer(_) => !config.concurrent_buffers,
        Barrier::Image(_) => !config.concurrent_images,
    }
}

fn set_queue_families(barrier: &mut Barrier, src_family: u32, dst_family: u32) {
    match barrier {
        Barrier::Memory(_) => (),
        Barrier::Buffer(buffer) => {
            buffer.src_queue_family_index = src_family;
            buffer.dst_queue_family_index = dst_family;
        }
        Barrier::Image(image) => {
            image.src_queue_family_index = src_family;
            image.dst_queue_family_index = dst_family;
        }
    }
}

/// Which barrier submissions a broadcast (one-to-all or all-to-one) transition needs on the executing
/// pipeline, in recording order: pre-layout-change, release, post-layout-change, acquire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CrossQueuePlan {
    /// Layout change on the single source pipeline before the ownership release.
    pub pre_layout_change: bool,
    pub release: bool,
    /// Layout change on the single destination pipeline after the ownership acquire.
    pub post_layout_change: bool,
    pub acquire: bool,
}

impl CrossQueuePlan {
    pub fn new(src: Pipelines, dst: Pipelines, executing: Pipelines, is_begin: bool) -> Self {
        let one_to_all = src.is_single() && !dst.is_single();
        let all_to_one = dst.is_single() && !src.is_single();

        let pre_layout_change = is_begin && one_to_all && src == executing;
        let release = is_begin && (pre_layout_change || (all_to_one && dst != executing));
        let post_layout_change = !is_begin && all_to_one && dst == executing;
        let acquire = !is_begin && (post_layout_change || (one_to_all && src != executing));
        Self {
            pre_layout_change,
            release,
            post_layout_change,
            acquire,
        }
    }

    pub fn transfers_ownership(&self) -> bool {
        self.release || self.acquire
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphoreAction {
    Signal,
    Wait(vk::PipelineStageFlags2),
}

/// Whether the executing pipeline signals (on begin) or waits on (on end) a transition's semaphore.
pub fn semaphore_action(
    src: Pipelines,
    dst: Pipelines,
    executing: Pipelines,
    is_begin: bool,
) -> Option<SemaphoreAction> {
    assert_ne!(src, dst, "single-queue transitions carry no semaphore");
    if is_begin {
        let signal = (src.is_single() && src == executing) || (dst.is_single() && dst != executing);
        signal.then_some(SemaphoreAction::Signal)
    } else {
        let wait = (dst.is_single() && dst == executing) || (src.is_single() && src != executing);
        wait.then_some(SemaphoreAction::Wait(vk::PipelineStageFlags2::ALL_COMMANDS))
    }
}
