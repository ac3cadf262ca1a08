use ash::vk;

use super::CommandStream;
use crate::barrier::{LegacyBatch, Sync2Batch};

// vk::CommandBuffer in Recording state.
// The caller keeps the command pool locked for the lifetime of the recorder.
pub struct CommandRecorder<'a> {
    pub(crate) device: &'a ash::Device,
    pub(crate) command_buffer: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
        }
    }
    pub fn raw(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl<'a> CommandStream for CommandRecorder<'a> {
    fn pipeline_barrier2(&mut self, batch: Sync2Batch<'_>) {
        let dependency_info = batch.dependency_info();
        // Safety: Host Syncronization rule for vkCmdPipelineBarrier2:
        // - Host access to commandBuffer must be externally synchronized.
        // We have &mut self, and the pool is locked while recording.
        unsafe {
            self.device
                .cmd_pipeline_barrier2(self.command_buffer, &dependency_info)
        }
    }

    fn pipeline_barrier(&mut self, batch: LegacyBatch<'_>) {
        // Safety: Host Syncronization rule for vkCmdPipelineBarrier:
        // - Host access to commandBuffer must be externally synchronized.
        // We have &mut self, and the pool is locked while recording.
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                batch.src_stage_mask,
                batch.dst_stage_mask,
                vk::DependencyFlags::empty(),
                batch.memory,
                batch.buffer,
                batch.image,
            )
        }
    }

    fn set_event2(&mut self, event: vk::Event, batch: Sync2Batch<'_>) {
        let dependency_info = batch.dependency_info();
        // Safety: Host Syncronization rule for vkCmdSetEvent2:
        // - Host access to commandBuffer must be externally synchronized.
        // We have &mut self, and the pool is locked while recording.
        unsafe {
            self.device
                .cmd_set_event2(self.command_buffer, event, &dependency_info)
        }
    }

    fn wait_event2(&mut self, event: vk::Event, batch: Sync2Batch<'_>) {
        let dependency_info = batch.dependency_info();
        // Safety: Host Syncronization rule for vkCmdWaitEvents2 and vkCmdResetEvent2:
        // - Host access to commandBuffer must be externally synchronized.
        // We have &mut self, and the pool is locked while recording.
        unsafe {
            self.device
                .cmd_wait_events2(self.command_buffer, &[event], &[dependency_info]);
            self.device.cmd_reset_event2(
                self.command_buffer,
                event,
                vk::PipelineStageFlags2::ALL_COMMANDS,
            );
        }
    }
}
