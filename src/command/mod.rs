use ash::vk;

use crate::barrier::{LegacyBatch, Sync2Batch};

pub mod context;
pub mod recorder;
pub mod sync;

pub use context::TransitionContext;
pub use recorder::CommandRecorder;
pub use sync::PipelineBarrier;

/// The barrier-recording calls of a command buffer in recording state.
pub trait CommandStream {
    fn pipeline_barrier2(&mut self, batch: Sync2Batch<'_>);
    /// Legacy dependency call with aggregate stage masks.
    fn pipeline_barrier(&mut self, batch: LegacyBatch<'_>);
    /// Begin half of a split barrier.
    fn set_event2(&mut self, event: vk::Event, batch: Sync2Batch<'_>);
    /// End half of a split barrier. The event is reset afterwards so it can be signaled again.
    fn wait_event2(&mut self, event: vk::Event, batch: Sync2Batch<'_>);
}
