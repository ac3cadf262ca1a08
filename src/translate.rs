//! Mapping of abstract [`AccessState`]s onto stage masks, access masks and image layouts.
//!
//! Everything in here is a pure function of its arguments and the device capabilities.
//! Inputs that cannot be mapped are caller bugs and abort with a diagnostic.

use ash::vk;

use crate::access::{AccessState, ResourceKind, SyncPoint, TransitionSide};
use crate::capabilities::{DeviceCapabilities, ShadingRateImageType};

/// What the translator needs to know about the resource being transitioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationTarget {
    pub kind: ResourceKind,
    pub buffer_usage: vk::BufferUsageFlags,
    pub is_depth_stencil: bool,
    /// The image can be sampled, so a dedicated read-only layout exists for it.
    pub supports_read_only_optimal: bool,
}

impl TranslationTarget {
    pub fn buffer(usage: vk::BufferUsageFlags) -> Self {
        Self {
            kind: ResourceKind::Buffer,
            buffer_usage: usage,
            is_depth_stencil: false,
            supports_read_only_optimal: false,
        }
    }
    pub fn texture(is_depth_stencil: bool, supports_sampling: bool) -> Self {
        Self {
            kind: ResourceKind::Texture,
            buffer_usage: vk::BufferUsageFlags::empty(),
            is_depth_stencil,
            supports_read_only_optimal: supports_sampling,
        }
    }
    pub fn acceleration_structure() -> Self {
        Self {
            kind: ResourceKind::AccelerationStructure,
            buffer_usage: vk::BufferUsageFlags::empty(),
            is_depth_stencil: false,
            supports_read_only_optimal: false,
        }
    }
    fn is_texture(&self) -> bool {
        self.kind == ResourceKind::Texture
    }
}

const MEMORY_READ_WRITE: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
);
const SHADER_READ_WRITE: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_READ.as_raw() | vk::AccessFlags2::SHADER_WRITE.as_raw(),
);
const FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);
const DEPTH_STENCIL_READ_WRITE: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

/// Stages that only a compute writer has to make wait.
pub const PRE_RASTER_SHADER_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER.as_raw()
        | vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER.as_raw()
        | vk::PipelineStageFlags2::GEOMETRY_SHADER.as_raw(),
);

/// Only compute writes what the vertex pipeline reads, so any other source drops the
/// pre-rasterization shader stages from the destination.
pub fn strip_pre_raster_stages(src: &SyncPoint, dst: &mut SyncPoint) {
    if !src.stage_mask.contains(vk::PipelineStageFlags2::COMPUTE_SHADER) {
        dst.stage_mask &= !PRE_RASTER_SHADER_STAGES;
    }
}

/// Exclusive states in the order they win when several are present.
/// `RTV` precedes `RESOLVE_DST` so a resolve attachment is treated as a render target.
const EXCLUSIVE_ORDER: [AccessState; 8] = [
    AccessState::DISCARD,
    AccessState::CPU_READ,
    AccessState::PRESENT,
    AccessState::RTV,
    AccessState::COPY_DEST,
    AccessState::RESOLVE_DST,
    AccessState::BVH_READ,
    AccessState::BVH_WRITE,
];

/// Translate one side of a transition into a hardware sync point.
pub fn translate(
    access: AccessState,
    target: &TranslationTarget,
    side: TransitionSide,
    caps: &DeviceCapabilities,
) -> SyncPoint {
    let srv_layout = if target.is_depth_stencil {
        vk::ImageLayout::READ_ONLY_OPTIMAL
    } else if target.supports_read_only_optimal {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::GENERAL
    };

    if access.is_unknown() {
        return SyncPoint {
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            access_mask: MEMORY_READ_WRITE,
            layout: vk::ImageLayout::UNDEFINED,
        };
    }
    if let Some(exclusive) = EXCLUSIVE_ORDER.iter().copied().find(|s| access.contains(*s)) {
        return translate_exclusive(exclusive, side, srv_layout, caps);
    }

    if access.contains(AccessState::DSV_WRITE) {
        assert!(
            target.is_depth_stencil,
            "DSV_WRITE requested on a resource without depth/stencil aspects ({access:?})"
        );
        return SyncPoint {
            stage_mask: FRAGMENT_TESTS,
            access_mask: DEPTH_STENCIL_READ_WRITE,
            layout: vk::ImageLayout::ATTACHMENT_OPTIMAL,
        };
    }

    // Each combinable state below that sets a layout overwrites the previous one; the last one wins.
    let mut remaining = access;
    let mut point = SyncPoint::default();

    if remaining.contains(AccessState::INDIRECT_ARGS) {
        assert!(!target.is_texture(), "textures can not be used as indirect arguments");
        point.stage_mask |= vk::PipelineStageFlags2::DRAW_INDIRECT;
        point.access_mask |= vk::AccessFlags2::INDIRECT_COMMAND_READ;
        remaining.remove(AccessState::INDIRECT_ARGS);
    }

    if remaining.contains(AccessState::VERTEX_OR_INDEX_BUFFER) {
        assert!(!target.is_texture(), "textures can not be bound as vertex or index buffers");
        point.stage_mask |= vk::PipelineStageFlags2::VERTEX_INPUT;
        if target.buffer_usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            point.access_mask |= vk::AccessFlags2::INDEX_READ;
        }
        if target.buffer_usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            point.access_mask |= vk::AccessFlags2::VERTEX_ATTRIBUTE_READ;
        }
        remaining.remove(AccessState::VERTEX_OR_INDEX_BUFFER);
    }

    if remaining.contains(AccessState::DSV_READ) {
        point.stage_mask |= FRAGMENT_TESTS;
        point.access_mask |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
        point.layout = vk::ImageLayout::READ_ONLY_OPTIMAL;
        remaining.remove(AccessState::DSV_READ);
    }

    if remaining.contains(AccessState::SRV_GRAPHICS) {
        point.stage_mask |= caps.graphics_shader_stages();
        point.access_mask |= vk::AccessFlags2::SHADER_READ;
        if target.buffer_usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            point.access_mask |= vk::AccessFlags2::UNIFORM_READ;
        }
        if target.is_texture() {
            point.layout = srv_layout;
        }
        remaining.remove(AccessState::SRV_GRAPHICS);
    }

    if remaining.contains(AccessState::SRV_COMPUTE) {
        point.stage_mask |= vk::PipelineStageFlags2::COMPUTE_SHADER;
        point.access_mask |= vk::AccessFlags2::SHADER_READ;
        if target.is_texture() {
            point.layout = srv_layout;
        }
        remaining.remove(AccessState::SRV_COMPUTE);
    }

    if remaining.contains(AccessState::UAV_GRAPHICS) {
        point.stage_mask |= caps.graphics_shader_stages();
        point.access_mask |= SHADER_READ_WRITE;
        if target.is_texture() {
            point.layout = vk::ImageLayout::GENERAL;
        }
        remaining.remove(AccessState::UAV_GRAPHICS);
    }

    if remaining.contains(AccessState::UAV_COMPUTE) {
        point.stage_mask |= vk::PipelineStageFlags2::COMPUTE_SHADER;
        point.access_mask |= SHADER_READ_WRITE;
        if target.is_texture() {
            point.layout = vk::ImageLayout::GENERAL;
        }
        remaining.remove(AccessState::UAV_COMPUTE);
    }

    let copy_src = AccessState::COPY_SRC | AccessState::RESOLVE_SRC;
    if remaining.intersects(copy_src) {
        point.stage_mask |= vk::PipelineStageFlags2::TRANSFER;
        point.access_mask |= vk::AccessFlags2::TRANSFER_READ;
        if target.is_texture() {
            // Sharing the image with any other read forces the general layout.
            point.layout = if point.layout == vk::ImageLayout::UNDEFINED {
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL
            } else {
                vk::ImageLayout::GENERAL
            };
        }
        remaining.remove(copy_src);
    }

    if remaining.contains(AccessState::SHADING_RATE_SOURCE) {
        assert!(target.is_texture(), "only textures can be shading rate sources");
        match caps.shading_rate_image {
            Some(ShadingRateImageType::Palette) => {
                point.stage_mask |= vk::PipelineStageFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_KHR;
                point.access_mask |= vk::AccessFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR;
                point.layout = vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR;
                remaining.remove(AccessState::SHADING_RATE_SOURCE);
            }
            Some(ShadingRateImageType::Fractional) => {
                point.stage_mask |= vk::PipelineStageFlags2::FRAGMENT_DENSITY_PROCESS_EXT;
                point.access_mask |= vk::AccessFlags2::FRAGMENT_DENSITY_MAP_READ_EXT;
                point.layout = vk::ImageLayout::FRAGMENT_DENSITY_MAP_OPTIMAL_EXT;
                remaining.remove(AccessState::SHADING_RATE_SOURCE);
            }
            None => (),
        }
    }

    assert!(
        remaining.is_empty(),
        "access bits {remaining:?} of {access:?} have no mapping for {:?}",
        target.kind
    );
    point
}

fn translate_exclusive(
    state: AccessState,
    side: TransitionSide,
    srv_layout: vk::ImageLayout,
    caps: &DeviceCapabilities,
) -> SyncPoint {
    let bvh_stages = || {
        let mut stages = vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            | vk::PipelineStageFlags2::COMPUTE_SHADER;
        if caps.ray_tracing_shaders {
            stages |= vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR;
        }
        stages
    };
    if state == AccessState::DISCARD {
        SyncPoint {
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            access_mask: MEMORY_READ_WRITE,
            layout: if side.is_source() {
                vk::ImageLayout::UNDEFINED
            } else {
                srv_layout
            },
        }
    } else if state == AccessState::CPU_READ {
        SyncPoint {
            stage_mask: vk::PipelineStageFlags2::HOST,
            access_mask: vk::AccessFlags2::HOST_READ,
            layout: vk::ImageLayout::GENERAL,
        }
    } else if state == AccessState::PRESENT {
        SyncPoint {
            stage_mask: if side.is_source() {
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
            } else {
                vk::PipelineStageFlags2::BOTTOM_OF_PIPE
            },
            access_mask: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    } else if state == AccessState::RTV {
        SyncPoint {
            stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_READ
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    } else if state == AccessState::COPY_DEST || state == AccessState::RESOLVE_DST {
        SyncPoint {
            stage_mask: vk::PipelineStageFlags2::TRANSFER,
            access_mask: vk::AccessFlags2::TRANSFER_WRITE,
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        }
    } else if state == AccessState::BVH_READ {
        SyncPoint {
            stage_mask: bvh_stages(),
            access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            layout: vk::ImageLayout::UNDEFINED,
        }
    } else if state == AccessState::BVH_WRITE {
        SyncPoint {
            stage_mask: bvh_stages(),
            access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            layout: vk::ImageLayout::UNDEFINED,
        }
    } else {
        unreachable!("{state:?} is not an exclusive access state")
    }
}

/// Layout of one plane of a depth/stencil image.
pub fn depth_or_stencil_layout(access: AccessState) -> vk::ImageLayout {
    if access.is_unknown() || access.contains(AccessState::DISCARD) {
        vk::ImageLayout::UNDEFINED
    } else if access.intersects(AccessState::COPY_SRC | AccessState::RESOLVE_SRC) {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else if access.contains(AccessState::COPY_DEST) {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else if access.contains(AccessState::DSV_WRITE) {
        vk::ImageLayout::ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::READ_ONLY_OPTIMAL
    }
}

/// Stage and access masks of one plane of a depth/stencil image.
pub fn depth_or_stencil_stage_and_access(
    access: AccessState,
) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    if access.is_unknown() || access.contains(AccessState::DISCARD) {
        return (vk::PipelineStageFlags2::ALL_COMMANDS, MEMORY_READ_WRITE);
    }

    let table: [(AccessState, vk::PipelineStageFlags2, vk::AccessFlags2); 10] = [
        (
            AccessState::RESOLVE_DST,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        (AccessState::DSV_WRITE, FRAGMENT_TESTS, DEPTH_STENCIL_READ_WRITE),
        (
            AccessState::DSV_READ,
            FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            AccessState::SRV_GRAPHICS,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        (
            AccessState::UAV_GRAPHICS,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            SHADER_READ_WRITE,
        ),
        (
            AccessState::SRV_COMPUTE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        (
            AccessState::UAV_COMPUTE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            SHADER_READ_WRITE,
        ),
        (
            AccessState::COPY_SRC,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        (
            AccessState::RESOLVE_SRC,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        (
            AccessState::COPY_DEST,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
    ];

    let mut remaining = access;
    let mut stages = vk::PipelineStageFlags2::NONE;
    let mut access_mask = vk::AccessFlags2::NONE;
    for (state, stage, state_access) in table {
        if remaining.contains(state) {
            stages |= stage;
            access_mask |= state_access;
            remaining.remove(state);
        }
    }
    assert!(
        remaining.is_empty(),
        "access bits {remaining:?} of {access:?} have no depth/stencil mapping"
    );
    (stages, access_mask)
}

/// Full sync point of one plane of a depth/stencil image.
pub fn translate_depth_stencil_plane(access: AccessState) -> SyncPoint {
    let (stage_mask, access_mask) = depth_or_stencil_stage_and_access(access);
    SyncPoint {
        stage_mask,
        access_mask,
        layout: depth_or_stencil_layout(access),
    }
}

/// Aspect mask for a plane slice of a depth/stencil image. `None` addresses both planes.
pub fn depth_stencil_aspect(plane: Option<u32>) -> vk::ImageAspectFlags {
    match plane {
        None => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        Some(0) => vk::ImageAspectFlags::DEPTH,
        Some(1) => vk::ImageAspectFlags::STENCIL,
        Some(plane) => panic!("depth/stencil images have two planes, got plane {plane}"),
    }
}

/// Access mask implied by a layout, for transitions the subsystem issues on its own behalf.
pub fn layout_access_mask(layout: vk::ImageLayout) -> vk::AccessFlags2 {
    match layout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::ATTACHMENT_OPTIMAL => DEPTH_STENCIL_READ_WRITE,
        vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags2::SHADER_READ | DEPTH_STENCIL_READ_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL | vk::ImageLayout::READ_ONLY_OPTIMAL => {
            vk::AccessFlags2::SHADER_READ
        }
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        | vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
        }
        vk::ImageLayout::FRAGMENT_DENSITY_MAP_OPTIMAL_EXT => {
            vk::AccessFlags2::FRAGMENT_DENSITY_MAP_READ_EXT
        }
        vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR => {
            vk::AccessFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR
        }
        vk::ImageLayout::PRESENT_SRC_KHR
        | vk::ImageLayout::GENERAL
        | vk::ImageLayout::UNDEFINED => vk::AccessFlags2::NONE,
        _ => panic!("no access mask for layout {layout:?}"),
    }
}

/// Stage mask implied by a layout, for transitions the subsystem issues on its own behalf.
pub fn layout_stage_mask(layout: vk::ImageLayout) -> vk::PipelineStageFlags2 {
    match layout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags2::TRANSFER
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::ATTACHMENT_OPTIMAL => FRAGMENT_TESTS,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        | vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags2::FRAGMENT_SHADER | FRAGMENT_TESTS
        }
        vk::ImageLayout::PRESENT_SRC_KHR => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::ImageLayout::FRAGMENT_DENSITY_MAP_OPTIMAL_EXT => {
            vk::PipelineStageFlags2::FRAGMENT_DENSITY_PROCESS_EXT
        }
        vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR => {
            vk::PipelineStageFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_KHR
        }
        vk::ImageLayout::GENERAL | vk::ImageLayout::UNDEFINED => {
            vk::PipelineStageFlags2::TOP_OF_PIPE
        }
        _ => panic!("no stage mask for layout {layout:?}"),
    }
}

/// Layout a texture should sit in while it is used with a single access state.
pub fn default_layout(
    access: AccessState,
    is_depth_stencil: bool,
    supports_sampling: bool,
    caps: &DeviceCapabilities,
) -> vk::ImageLayout {
    if !access.is_empty() && AccessState::SRV_MASK.contains(access) {
        return if is_depth_stencil {
            if caps.synchronization2 {
                vk::ImageLayout::READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
        } else if supports_sampling {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::GENERAL
        };
    }
    if !access.is_empty() && AccessState::UAV_MASK.contains(access) {
        return vk::ImageLayout::GENERAL;
    }
    if access == AccessState::COPY_SRC {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else if access == AccessState::COPY_DEST {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else if access == AccessState::DSV_READ {
        vk::ImageLayout::READ_ONLY_OPTIMAL
    } else if access == AccessState::DSV_WRITE {
        vk::ImageLayout::ATTACHMENT_OPTIMAL
    } else if access == AccessState::SHADING_RATE_SOURCE {
        match caps.shading_rate_image {
            Some(ShadingRateImageType::Palette) => {
                vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR
            }
            Some(ShadingRateImageType::Fractional) => {
                vk::ImageLayout::FRAGMENT_DENSITY_MAP_OPTIMAL_EXT
            }
            None => panic!("shading rate source used on a device without shading rate images"),
        }
    } else {
        panic!("no default layout for {access:?}")
    }
}

/// Folds per-aspect layouts into the single-aspect categories used while merging.
fn plane_layout(layout: vk::ImageLayout) -> vk::ImageLayout {
    match layout {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL => vk::ImageLayout::ATTACHMENT_OPTIMAL,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        | vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL => vk::ImageLayout::READ_ONLY_OPTIMAL,
        other => other,
    }
}

/// The joint layout of a depth/stencil image whose planes sit in `depth` and `stencil`.
pub fn merged_depth_stencil_layout(
    depth: vk::ImageLayout,
    stencil: vk::ImageLayout,
) -> vk::ImageLayout {
    let depth = plane_layout(depth);
    let stencil = plane_layout(stencil);
    let exact = [
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    ];
    for layout in exact {
        if depth == layout || stencil == layout {
            assert_eq!(
                depth, stencil,
                "depth and stencil planes must share the {layout:?} layout"
            );
            return layout;
        }
    }
    if depth == vk::ImageLayout::GENERAL || stencil == vk::ImageLayout::GENERAL {
        return vk::ImageLayout::GENERAL;
    }
    match (depth, stencil) {
        (vk::ImageLayout::ATTACHMENT_OPTIMAL, vk::ImageLayout::ATTACHMENT_OPTIMAL) => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
        (vk::ImageLayout::ATTACHMENT_OPTIMAL, vk::ImageLayout::READ_ONLY_OPTIMAL) => {
            vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL
        }
        (vk::ImageLayout::READ_ONLY_OPTIMAL, vk::ImageLayout::ATTACHMENT_OPTIMAL) => {
            vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        }
        (vk::ImageLayout::READ_ONLY_OPTIMAL, vk::ImageLayout::READ_ONLY_OPTIMAL) => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        _ => panic!("depth layout {depth:?} and stencil layout {stencil:?} can not be merged"),
    }
}

/// Replace the aspect-agnostic layouts with their joint depth/stencil equivalent.
/// Devices without synchronization2 do not know the aspect-agnostic ones.
pub fn legacy_depth_stencil_layout(layout: vk::ImageLayout) -> vk::ImageLayout {
    match layout {
        vk::ImageLayout::READ_ONLY_OPTIMAL => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        vk::ImageLayout::ATTACHMENT_OPTIMAL => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        other => other,
    }
}
