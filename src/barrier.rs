//! Barrier sets in a driver-agnostic form and their conversions into native arrays.
//!
//! Barriers always carry per-barrier stage masks (the synchronization2 model). Devices without
//! synchronization2 get them downgraded into one aggregate source/destination stage mask.

use ash::vk;
use smallvec::SmallVec;

/// Stage and access masks of both sides of a dependency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

impl MemoryBarrier {
    pub fn to_vk2(&self) -> vk::MemoryBarrier2 {
        vk::MemoryBarrier2 {
            src_stage_mask: self.src_stage_mask,
            src_access_mask: self.src_access_mask,
            dst_stage_mask: self.dst_stage_mask,
            dst_access_mask: self.dst_access_mask,
            ..Default::default()
        }
    }
    fn to_vk(&self) -> vk::MemoryBarrier {
        vk::MemoryBarrier {
            src_access_mask: legacy_access(self.src_access_mask),
            dst_access_mask: legacy_access(self.dst_access_mask),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    pub memory_barrier: MemoryBarrier,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferBarrier {
    pub fn to_vk2(&self) -> vk::BufferMemoryBarrier2 {
        let barrier = &self.memory_barrier;
        vk::BufferMemoryBarrier2 {
            src_stage_mask: barrier.src_stage_mask,
            src_access_mask: barrier.src_access_mask,
            dst_stage_mask: barrier.dst_stage_mask,
            dst_access_mask: barrier.dst_access_mask,
            src_queue_family_index: self.src_queue_family_index,
            dst_queue_family_index: self.dst_queue_family_index,
            buffer: self.buffer,
            offset: self.offset,
            size: self.size,
            ..Default::default()
        }
    }
    fn to_vk(&self) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier {
            src_access_mask: legacy_access(self.memory_barrier.src_access_mask),
            dst_access_mask: legacy_access(self.memory_barrier.dst_access_mask),
            src_queue_family_index: self.src_queue_family_index,
            dst_queue_family_index: self.dst_queue_family_index,
            buffer: self.buffer,
            offset: self.offset,
            size: self.size,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub memory_barrier: MemoryBarrier,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub image: vk::Image,
    pub subresource_range: vk::ImageSubresourceRange,
}

// vk::ImageSubresourceRange has no PartialEq.
impl PartialEq for ImageBarrier {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.subresource_range, &other.subresource_range);
        self.memory_barrier == other.memory_barrier
            && self.old_layout == other.old_layout
            && self.new_layout == other.new_layout
            && self.src_queue_family_index == other.src_queue_family_index
            && self.dst_queue_family_index == other.dst_queue_family_index
            && self.image == other.image
            && a.aspect_mask == b.aspect_mask
            && a.base_mip_level == b.base_mip_level
            && a.level_count == b.level_count
            && a.base_array_layer == b.base_array_layer
            && a.layer_count == b.layer_count
    }
}

impl Eq for ImageBarrier {}

impl ImageBarrier {
    pub fn to_vk2(&self) -> vk::ImageMemoryBarrier2 {
        let barrier = &self.memory_barrier;
        vk::ImageMemoryBarrier2 {
            src_stage_mask: barrier.src_stage_mask,
            src_access_mask: barrier.src_access_mask,
            dst_stage_mask: barrier.dst_stage_mask,
            dst_access_mask: barrier.dst_access_mask,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            src_queue_family_index: self.src_queue_family_index,
            dst_queue_family_index: self.dst_queue_family_index,
            image: self.image,
            subresource_range: self.subresource_range,
            ..Default::default()
        }
    }
    fn to_vk(&self) -> vk::ImageMemoryBarrier {
        let mut old_layout = self.old_layout;
        let mut new_layout = self.new_layout;
        let aspect = self.subresource_range.aspect_mask;
        if aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL) {
            old_layout = crate::translate::legacy_depth_stencil_layout(old_layout);
            new_layout = crate::translate::legacy_depth_stencil_layout(new_layout);
        }
        assert!(
            new_layout != vk::ImageLayout::READ_ONLY_OPTIMAL
                && new_layout != vk::ImageLayout::ATTACHMENT_OPTIMAL,
            "layout {new_layout:?} requires synchronization2"
        );
        vk::ImageMemoryBarrier {
            src_access_mask: legacy_access(self.memory_barrier.src_access_mask),
            dst_access_mask: legacy_access(self.memory_barrier.dst_access_mask),
            old_layout,
            new_layout,
            src_queue_family_index: self.src_queue_family_index,
            dst_queue_family_index: self.dst_queue_family_index,
            image: self.image,
            subresource_range: self.subresource_range,
            ..Default::default()
        }
    }
    pub fn changes_layout(&self) -> bool {
        self.old_layout != self.new_layout
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Barrier {
    Memory(MemoryBarrier),
    Buffer(BufferBarrier),
    Image(ImageBarrier),
}

impl Barrier {
    pub fn dependency(&self) -> &MemoryBarrier {
        match self {
            Barrier::Memory(barrier) => barrier,
            Barrier::Buffer(barrier) => &barrier.memory_barrier,
            Barrier::Image(barrier) => &barrier.memory_barrier,
        }
    }
    pub fn dependency_mut(&mut self) -> &mut MemoryBarrier {
        match self {
            Barrier::Memory(barrier) => barrier,
            Barrier::Buffer(barrier) => &mut barrier.memory_barrier,
            Barrier::Image(barrier) => &mut barrier.memory_barrier,
        }
    }
    /// Whether the barrier expresses nothing a global memory barrier couldn't.
    pub fn is_foldable(&self) -> bool {
        match self {
            Barrier::Memory(_) => true,
            Barrier::Buffer(barrier) => {
                barrier.src_queue_family_index == barrier.dst_queue_family_index
            }
            Barrier::Image(barrier) => {
                !barrier.changes_layout()
                    && barrier.src_queue_family_index == barrier.dst_queue_family_index
            }
        }
    }
}

/// An ordered set of barriers recorded with one dependency.
/// Holds at most one [`Barrier::Memory`], which always comes first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BarrierSet {
    barriers: SmallVec<[Barrier; 8]>,
}

impl BarrierSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.barriers.len()
    }
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Barrier> {
        self.barriers.iter()
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Barrier> {
        self.barriers.iter_mut()
    }

    /// Append a buffer or image barrier. Global memory barriers go through [`Self::global_mut`].
    pub fn push(&mut self, barrier: Barrier) {
        match barrier {
            Barrier::Memory(memory) => {
                let global = self.global_mut();
                global.src_stage_mask |= memory.src_stage_mask;
                global.dst_stage_mask |= memory.dst_stage_mask;
                global.src_access_mask |= memory.src_access_mask;
                global.dst_access_mask |= memory.dst_access_mask;
            }
            other => self.barriers.push(other),
        }
    }

    /// The single global memory barrier of this set, created empty on first use.
    pub fn global_mut(&mut self) -> &mut MemoryBarrier {
        if !matches!(self.barriers.first(), Some(Barrier::Memory(_))) {
            self.barriers.insert(0, Barrier::Memory(MemoryBarrier::default()));
        }
        match &mut self.barriers[0] {
            Barrier::Memory(barrier) => barrier,
            _ => unreachable!(),
        }
    }

    pub fn global(&self) -> Option<&MemoryBarrier> {
        match self.barriers.first() {
            Some(Barrier::Memory(barrier)) => Some(barrier),
            _ => None,
        }
    }

    pub fn buffer_barriers(&self) -> impl Iterator<Item = &BufferBarrier> {
        self.barriers.iter().filter_map(|barrier| match barrier {
            Barrier::Buffer(barrier) => Some(barrier),
            _ => None,
        })
    }

    pub fn image_barriers(&self) -> impl Iterator<Item = &ImageBarrier> {
        self.barriers.iter().filter_map(|barrier| match barrier {
            Barrier::Image(barrier) => Some(barrier),
            _ => None,
        })
    }

    /// Copy of the buffer and image barriers only.
    pub fn resource_barriers(&self) -> BarrierSet {
        BarrierSet {
            barriers: self
                .barriers
                .iter()
                .filter(|barrier| !matches!(barrier, Barrier::Memory(_)))
                .copied()
                .collect(),
        }
    }

    pub fn to_sync2(&self) -> Sync2Barriers {
        let mut out = Sync2Barriers::default();
        for barrier in self.barriers.iter() {
            match barrier {
                Barrier::Memory(barrier) => out.memory.push(barrier.to_vk2()),
                Barrier::Buffer(barrier) => out.buffer.push(barrier.to_vk2()),
                Barrier::Image(barrier) => out.image.push(barrier.to_vk2()),
            }
        }
        out
    }

    /// Downgrade into legacy structs, OR-ing every per-barrier stage mask into the aggregate masks.
    pub fn to_legacy(&self) -> LegacyBarriers {
        let mut src_stage_mask = vk::PipelineStageFlags2::NONE;
        let mut dst_stage_mask = vk::PipelineStageFlags2::NONE;
        let mut out = LegacyBarriers::default();
        for barrier in self.barriers.iter() {
            src_stage_mask |= barrier.dependency().src_stage_mask;
            dst_stage_mask |= barrier.dependency().dst_stage_mask;
            match barrier {
                Barrier::Memory(barrier) => out.memory.push(barrier.to_vk()),
                Barrier::Buffer(barrier) => out.buffer.push(barrier.to_vk()),
                Barrier::Image(barrier) => out.image.push(barrier.to_vk()),
            }
        }
        // Legacy barriers can not express an empty stage mask.
        out.src_stage_mask = if src_stage_mask.is_empty() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            legacy_stages(src_stage_mask)
        };
        out.dst_stage_mask = if dst_stage_mask.is_empty() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            legacy_stages(dst_stage_mask)
        };
        out
    }
}

impl FromIterator<Barrier> for BarrierSet {
    fn from_iter<T: IntoIterator<Item = Barrier>>(iter: T) -> Self {
        let mut set = BarrierSet::new();
        for barrier in iter {
            set.push(barrier);
        }
        set
    }
}

/// Native barrier arrays with per-barrier stage masks.
#[derive(Default)]
pub struct Sync2Barriers {
    pub memory: SmallVec<[vk::MemoryBarrier2; 1]>,
    pub buffer: Vec<vk::BufferMemoryBarrier2>,
    pub image: Vec<vk::ImageMemoryBarrier2>,
}

impl Sync2Barriers {
    pub fn len(&self) -> usize {
        self.memory.len() + self.buffer.len() + self.image.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A slice of a [`Sync2Barriers`] recorded with one dependency call.
#[derive(Clone, Copy)]
pub struct Sync2Batch<'a> {
    pub memory: &'a [vk::MemoryBarrier2],
    pub buffer: &'a [vk::BufferMemoryBarrier2],
    pub image: &'a [vk::ImageMemoryBarrier2],
}

impl<'a> Sync2Batch<'a> {
    pub fn dependency_info(&self) -> vk::DependencyInfo {
        vk::DependencyInfo::builder()
            .memory_barriers(self.memory)
            .buffer_memory_barriers(self.buffer)
            .image_memory_barriers(self.image)
            .build()
    }
}

impl Sync2Barriers {
    /// Split into dependency calls of at most `max_per_batch` barriers each. `0` means unlimited.
    /// An oversized set is split per barrier kind.
    pub fn batches(&self, max_per_batch: usize) -> Vec<Sync2Batch<'_>> {
        if self.is_empty() {
            return Vec::new();
        }
        if max_per_batch == 0 || self.len() <= max_per_batch {
            return vec![Sync2Batch {
                memory: &self.memory,
                buffer: &self.buffer,
                image: &self.image,
            }];
        }
        let mut batches = Vec::new();
        for memory in self.memory.chunks(max_per_batch) {
            batches.push(Sync2Batch { memory, buffer: &[], image: &[] });
        }
        for buffer in self.buffer.chunks(max_per_batch) {
            batches.push(Sync2Batch { memory: &[], buffer, image: &[] });
        }
        for image in self.image.chunks(max_per_batch) {
            batches.push(Sync2Batch { memory: &[], buffer: &[], image });
        }
        batches
    }
}

/// Native barrier arrays sharing one aggregate source and destination stage mask.
pub struct LegacyBarriers {
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub memory: SmallVec<[vk::MemoryBarrier; 1]>,
    pub buffer: Vec<vk::BufferMemoryBarrier>,
    pub image: Vec<vk::ImageMemoryBarrier>,
}

impl Default for LegacyBarriers {
    fn default() -> Self {
        Self {
            src_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            memory: SmallVec::new(),
            buffer: Vec::new(),
            image: Vec::new(),
        }
    }
}

impl LegacyBarriers {
    pub fn len(&self) -> usize {
        self.memory.len() + self.buffer.len() + self.image.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same splitting rule as [`Sync2Barriers::batches`]. Every batch keeps the aggregate stage masks.
    pub fn batches<'a>(&'a self, max_per_batch: usize) -> Vec<LegacyBatch<'a>> {
        if self.is_empty() {
            return Vec::new();
        }
        let batch = |memory: &'a [vk::MemoryBarrier],
                     buffer: &'a [vk::BufferMemoryBarrier],
                     image: &'a [vk::ImageMemoryBarrier]| LegacyBatch {
            src_stage_mask: self.src_stage_mask,
            dst_stage_mask: self.dst_stage_mask,
            memory,
            buffer,
            image,
        };
        if max_per_batch == 0 || self.len() <= max_per_batch {
            return vec![batch(&self.memory[..], &self.buffer[..], &self.image[..])];
        }
        let mut batches = Vec::new();
        for memory in self.memory.chunks(max_per_batch) {
            batches.push(batch(memory, &[], &[]));
        }
        for buffer in self.buffer.chunks(max_per_batch) {
            batches.push(batch(&[], buffer, &[]));
        }
        for image in self.image.chunks(max_per_batch) {
            batches.push(batch(&[], &[], image));
        }
        batches
    }
}

#[derive(Clone, Copy)]
pub struct LegacyBatch<'a> {
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub memory: &'a [vk::MemoryBarrier],
    pub buffer: &'a [vk::BufferMemoryBarrier],
    pub image: &'a [vk::ImageMemoryBarrier],
}

fn legacy_stages(stages: vk::PipelineStageFlags2) -> vk::PipelineStageFlags {
    let raw = stages.as_raw();
    assert!(
        raw >> 32 == 0,
        "stage mask {stages:?} has no legacy equivalent"
    );
    vk::PipelineStageFlags::from_raw(raw as u32)
}

fn legacy_access(access: vk::AccessFlags2) -> vk::AccessFlags {
    let raw = access.as_raw();
    assert!(
        raw >> 32 == 0,
        "access mask {access:?} has no legacy equivalent"
    );
    vk::AccessFlags::from_raw(raw as u32)
}
