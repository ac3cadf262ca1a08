//! Abstract access states and the hardware-native sync points they translate into.

use ash::vk;

bitflags::bitflags! {
    /// How a resource is about to be used.
    ///
    /// A handful of states are exclusive (see [`AccessState::EXCLUSIVE_MASK`]): when one of them is
    /// present every other bit is ignored during translation. Everything else combines freely.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessState: u32 {
        const UNKNOWN = 0;
        const CPU_READ = 1 << 0;
        const PRESENT = 1 << 1;
        const INDIRECT_ARGS = 1 << 2;
        const VERTEX_OR_INDEX_BUFFER = 1 << 3;
        const SRV_COMPUTE = 1 << 4;
        const SRV_GRAPHICS = 1 << 5;
        const COPY_SRC = 1 << 6;
        const RESOLVE_SRC = 1 << 7;
        const DSV_READ = 1 << 8;
        const UAV_COMPUTE = 1 << 9;
        const UAV_GRAPHICS = 1 << 10;
        const RTV = 1 << 11;
        const COPY_DEST = 1 << 12;
        const RESOLVE_DST = 1 << 13;
        const DSV_WRITE = 1 << 14;
        const BVH_READ = 1 << 15;
        const BVH_WRITE = 1 << 16;
        const DISCARD = 1 << 17;
        const SHADING_RATE_SOURCE = 1 << 18;

        const SRV_MASK = Self::SRV_COMPUTE.bits() | Self::SRV_GRAPHICS.bits();
        const UAV_MASK = Self::UAV_COMPUTE.bits() | Self::UAV_GRAPHICS.bits();

        const EXCLUSIVE_MASK = Self::DISCARD.bits()
            | Self::CPU_READ.bits()
            | Self::PRESENT.bits()
            | Self::RTV.bits()
            | Self::COPY_DEST.bits()
            | Self::RESOLVE_DST.bits()
            | Self::BVH_READ.bits()
            | Self::BVH_WRITE.bits();

        const WRITE_MASK = Self::UAV_MASK.bits()
            | Self::RTV.bits()
            | Self::COPY_DEST.bits()
            | Self::RESOLVE_DST.bits()
            | Self::DSV_WRITE.bits()
            | Self::BVH_WRITE.bits();
    }
}

impl AccessState {
    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }
    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRITE_MASK)
    }
}

bitflags::bitflags! {
    /// Set of logical pipelines a transition starts or ends on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Pipelines: u8 {
        const GRAPHICS = 1 << 0;
        const ASYNC_COMPUTE = 1 << 1;
        const ALL = Self::GRAPHICS.bits() | Self::ASYNC_COMPUTE.bits();
    }
}

impl Pipelines {
    /// Exactly one pipeline.
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }
}

/// The closed set of resource kinds a transition can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
    AccelerationStructure,
}

/// Which end of a transition an access state describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionSide {
    Source,
    Destination,
}

impl TransitionSide {
    pub fn is_source(self) -> bool {
        self == TransitionSide::Source
    }
}

/// Stage mask, access mask and layout of one side of a dependency.
/// The layout is only meaningful for images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncPoint {
    pub stage_mask: vk::PipelineStageFlags2,
    pub access_mask: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self {
            stage_mask: vk::PipelineStageFlags2::NONE,
            access_mask: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

/// Access bits that only read memory. A source made only of these needs an execution dependency,
/// not a memory dependency.
pub const ALL_READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::INDIRECT_COMMAND_READ.as_raw()
        | vk::AccessFlags2::INDEX_READ.as_raw()
        | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw()
        | vk::AccessFlags2::UNIFORM_READ.as_raw()
        | vk::AccessFlags2::INPUT_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::SHADER_READ.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::TRANSFER_READ.as_raw()
        | vk::AccessFlags2::MEMORY_READ.as_raw(),
);

/// True when `access` touches memory but never writes it.
pub fn is_read_only_access(access: vk::AccessFlags2) -> bool {
    !access.is_empty() && (access & !ALL_READ_ACCESS).is_empty()
}
