use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use super::CommandStream;
use crate::access::Pipelines;
use crate::barrier::BarrierSet;
use crate::batcher::BarrierBatcher;
use crate::capabilities::DeviceCapabilities;
use crate::config::SyncConfig;
use crate::cross_queue::{
    mask_supported_async_flags, ownership_transfer_barriers, patch_cross_pipe_transitions,
    semaphore_action, CrossQueuePlan, QueueTopology, SemaphoreAction,
};
use crate::queue::{Semaphore, SubmissionPayload};
use crate::transition::Transition;

/// Records the begin and end halves of transitions on one pipeline and collects the semaphores
/// the next submission of that pipeline has to wait on or signal.
pub struct TransitionContext {
    executing: Pipelines,
    capabilities: DeviceCapabilities,
    config: SyncConfig,
    topology: QueueTopology,
    wait_semaphores: SmallVec<[(Arc<Semaphore>, vk::PipelineStageFlags2); 4]>,
    signal_semaphores: SmallVec<[Arc<Semaphore>; 4]>,
}

impl TransitionContext {
    pub fn new(
        executing: Pipelines,
        capabilities: DeviceCapabilities,
        config: SyncConfig,
        topology: QueueTopology,
    ) -> Self {
        assert!(executing.is_single(), "transitions execute on a single pipeline, not {executing:?}");
        Self {
            executing,
            capabilities,
            config,
            topology,
            wait_semaphores: SmallVec::new(),
            signal_semaphores: SmallVec::new(),
        }
    }

    pub fn executing(&self) -> Pipelines {
        self.executing
    }

    pub fn begin_transitions(&mut self, stream: &mut impl CommandStream, transitions: &[&Transition]) {
        if !self.capabilities.synchronization2 {
            // Legacy barriers can not be split; everything is recorded by `end_transitions`.
            return;
        }
        self.record_sync2(stream, transitions, true);
        for transition in transitions {
            self.collect_semaphore(transition, true);
        }
    }

    /// Record the end halves. Afterwards the depth/stencil plane tracking of every transition
    /// holds its after-state.
    pub fn end_transitions(&mut self, stream: &mut impl CommandStream, transitions: &[&Transition]) {
        if self.capabilities.synchronization2 {
            for transition in transitions {
                self.collect_semaphore(transition, false);
            }
            self.record_sync2(stream, transitions, false);
        } else {
            self.record_legacy(stream, transitions);
        }
        for transition in transitions {
            transition.track_plane_accesses();
        }
    }

    /// Hand the collected semaphores to a payload for `command_buffers`.
    /// The payload keeps the semaphores alive until the GPU is done with them.
    pub fn take_submission(
        &mut self,
        command_buffers: impl IntoIterator<Item = vk::CommandBuffer>,
    ) -> SubmissionPayload {
        SubmissionPayload {
            wait_semaphores: std::mem::take(&mut self.wait_semaphores),
            command_buffers: command_buffers.into_iter().collect(),
            signal_semaphores: std::mem::take(&mut self.signal_semaphores),
            retained: Vec::new(),
        }
    }

    fn collect_semaphore(&mut self, transition: &Transition, is_begin: bool) {
        let Some(semaphore) = transition.semaphore() else {
            return;
        };
        let action = semaphore_action(
            transition.src_pipelines(),
            transition.dst_pipelines(),
            self.executing,
            is_begin,
        );
        match action {
            Some(SemaphoreAction::Signal) => self.signal_semaphores.push(semaphore.clone()),
            Some(SemaphoreAction::Wait(stage)) => self.wait_semaphores.push((semaphore.clone(), stage)),
            None => (),
        }
    }

    fn record_sync2(&self, stream: &mut impl CommandStream, transitions: &[&Transition], is_begin: bool) {
        let batcher = BarrierBatcher::new(&self.capabilities, &self.config);
        let use_ownership_transfers = self.topology.use_ownership_transfers(&self.config);

        for transition in transitions {
            let (src, dst) = (transition.src_pipelines(), transition.dst_pipelines());
            let target = if is_begin { src } else { dst };
            assert!(
                target.contains(self.executing),
                "the {} pipelines of this transition are {target:?}, but it is recorded on {:?}",
                if is_begin { "source" } else { "destination" },
                self.executing
            );

            // Same-queue barriers that are not split are only recorded at the end.
            if transition.is_single_queue() && is_begin && transition.event().is_none() {
                continue;
            }

            let mut barriers = batcher.batch_transition(transition);

            if let Some(event) = transition.event() {
                assert!(transition.is_single_queue(), "split barriers must stay on one queue");
                self.submit(stream, &barriers, Some(event.raw()), is_begin);
                continue;
            }

            if src.is_single() && dst.is_single() {
                // Cross-queue 1..1 transitions keep the layout change in the ownership transfer.
                if use_ownership_transfers && src != dst {
                    patch_cross_pipe_transitions(
                        &mut barriers,
                        &self.topology,
                        &self.config,
                        src,
                        dst,
                        self.executing,
                        is_begin,
                    );
                }
                self.submit(stream, &barriers, None, is_begin);
                continue;
            }

            // 1..N and N..1: layout changes happen on the single pipeline, the rest is ordered by the semaphore.
            let plan = CrossQueuePlan::new(src, dst, self.executing, is_begin);
            let mut transfer = if use_ownership_transfers && plan.transfers_ownership() {
                ownership_transfer_barriers(
                    &barriers,
                    &self.topology,
                    &self.config,
                    src,
                    dst,
                    self.executing,
                    is_begin,
                )
            } else {
                BarrierSet::new()
            };
            let on_async_compute = self.executing == Pipelines::ASYNC_COMPUTE;
            // The global barrier goes out with the first submission only.
            let mut global = barriers.global().copied();

            if plan.pre_layout_change {
                if on_async_compute {
                    mask_supported_async_flags(&mut barriers, &self.topology, false, true);
                }
                self.submit(stream, &barriers, None, is_begin);
                global = None;
            }
            if !transfer.is_empty() {
                if let Some(global) = global.take() {
                    *transfer.global_mut() = global;
                }
                if on_async_compute {
                    mask_supported_async_flags(&mut transfer, &self.topology, true, true);
                }
                self.submit(stream, &transfer, None, is_begin);
            }
            if plan.post_layout_change {
                if global.is_none() {
                    barriers = barriers.resource_barriers();
                }
                if on_async_compute {
                    mask_supported_async_flags(&mut barriers, &self.topology, true, false);
                }
                self.submit(stream, &barriers, None, is_begin);
            }
        }
    }

    fn submit(&self, stream: &mut impl CommandStream, barriers: &BarrierSet, event: Option<vk::Event>, is_begin: bool) {
        let barriers = barriers.to_sync2();
        if barriers.is_empty() {
            return;
        }
        tracing::trace!(
            pipeline = ?self.executing,
            count = barriers.len(),
            split = event.is_some(),
            is_begin,
            "record barriers"
        );
        match event {
            // Events are never created together with a batch size limit.
            Some(event) => {
                for batch in barriers.batches(0) {
                    if is_begin {
                        stream.set_event2(event, batch);
                    } else {
                        stream.wait_event2(event, batch);
                    }
                }
            }
            None => {
                for batch in barriers.batches(self.config.max_barriers_per_batch) {
                    stream.pipeline_barrier2(batch);
                }
            }
        }
    }

    fn record_legacy(&self, stream: &mut impl CommandStream, transitions: &[&Transition]) {
        let batcher = BarrierBatcher::new(&self.capabilities, &self.config);
        let mut barriers = BarrierSet::new();
        for transition in transitions {
            assert!(
                transition.is_single_queue(),
                "devices without synchronization2 only support single-queue transitions"
            );
            for barrier in batcher.batch_transition(transition).iter() {
                barriers.push(*barrier);
            }
        }
        let legacy = barriers.to_legacy();
        if legacy.is_empty() {
            return;
        }
        tracing::trace!(pipeline = ?self.executing, count = legacy.len(), "record legacy barriers");
        for batch in legacy.batches(self.config.max_barriers_per_batch) {
            stream.pipeline_barrier(batch);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access::AccessState;
    use crate::testing::{command_buffer, FakeGpu, RecordedCommand, RecordingStream};
    use crate::transition::{
        BufferDesc, Resource, TextureDesc, TransitionCreateFlags, TransitionCreateInfo, TransitionInfo,
    };
    use ash::vk::Handle;

    fn topology(capabilities: &DeviceCapabilities) -> QueueTopology {
        let (compute_stage_mask, compute_access_mask) =
            capabilities.supported_masks(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER);
        QueueTopology {
            graphics_family: 0,
            compute_family: 1,
            compute_stage_mask,
            compute_access_mask,
        }
    }

    fn buffer_transition(
        gpu: &FakeGpu,
        config: &SyncConfig,
        src: Pipelines,
        dst: Pipelines,
        before: AccessState,
        after: AccessState,
    ) -> Transition {
        let info = TransitionInfo::new(
            Resource::Buffer(BufferDesc::whole(
                vk::Buffer::from_raw(7),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )),
            before,
            after,
        );
        Transition::create(
            TransitionCreateInfo {
                src_pipelines: src,
                dst_pipelines: dst,
                flags: TransitionCreateFlags::empty(),
                infos: vec![info],
            },
            &gpu.device(),
            config,
        )
        .unwrap()
    }

    #[test]
    fn split_barriers_set_and_wait_the_event() {
        crate::testing::init_tracing();
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let transition = buffer_transition(
            &gpu,
            &config,
            Pipelines::GRAPHICS,
            Pipelines::GRAPHICS,
            AccessState::UAV_COMPUTE,
            AccessState::SRV_COMPUTE,
        );
        let event = transition.event().unwrap().raw();

        let mut context = TransitionContext::new(Pipelines::GRAPHICS, caps.clone(), config, topology(&caps));
        let mut stream = RecordingStream::default();
        context.begin_transitions(&mut stream, &[&transition]);
        context.end_transitions(&mut stream, &[&transition]);
        match stream.commands.as_slice() {
            [RecordedCommand::SetEvent { event: set, memory, .. }, RecordedCommand::WaitEvent { event: wait, .. }] => {
                assert_eq!(*set, event);
                assert_eq!(*wait, event);
                assert_eq!(memory.len(), 1);
            }
            other => panic!("unexpected commands {other:?}"),
        }
        let payload = context.take_submission([command_buffer(1)]);
        assert!(payload.wait_semaphores.is_empty());
        assert!(payload.signal_semaphores.is_empty());
    }

    #[test]
    fn unsplit_same_queue_barriers_are_recorded_at_the_end() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let caps = DeviceCapabilities::default();
        let config = SyncConfig {
            allow_split_barriers: false,
            ..Default::default()
        };
        let transition = buffer_transition(
            &gpu,
            &config,
            Pipelines::GRAPHICS,
            Pipelines::GRAPHICS,
            AccessState::UAV_COMPUTE,
            AccessState::SRV_COMPUTE,
        );
        assert!(transition.event().is_none());

        let mut context = TransitionContext::new(Pipelines::GRAPHICS, caps.clone(), config, topology(&caps));
        let mut stream = RecordingStream::default();
        context.begin_transitions(&mut stream, &[&transition]);
        assert!(stream.commands.is_empty());
        context.end_transitions(&mut stream, &[&transition]);
        assert!(matches!(
            stream.commands.as_slice(),
            [RecordedCommand::Barrier2 { memory, .. }] if memory.len() == 1
        ));
    }

    #[test]
    fn cross_queue_transitions_release_and_acquire_ownership() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let caps = DeviceCapabilities::default();
        let config = SyncConfig::default();
        let transition = buffer_transition(
            &gpu,
            &config,
            Pipelines::ASYNC_COMPUTE,
            Pipelines::GRAPHICS,
            AccessState::UAV_COMPUTE,
            AccessState::SRV_GRAPHICS,
        );
        let semaphore = transition.semaphore().unwrap().raw();

        let mut compute = TransitionContext::new(
            Pipelines::ASYNC_COMPUTE,
            caps.clone(),
            config.clone(),
            topology(&caps),
        );
        let mut stream = RecordingStream::default();
        compute.begin_transitions(&mut stream, &[&transition]);
        match stream.commands.as_slice() {
            [RecordedCommand::Barrier2 { buffer, .. }] => {
                assert_eq!(buffer[0].src_queue_family_index, 1);
                assert_eq!(buffer[0].dst_queue_family_index, 0);
                assert_eq!(buffer[0].dst_access_mask, vk::AccessFlags2::NONE);
            }
            other => panic!("unexpected release {other:?}"),
        }
        let release = compute.take_submission([command_buffer(1)]);
        assert!(release.wait_semaphores.is_empty());
        assert_eq!(release.signal_semaphores[0].raw(), semaphore);

        let mut graphics = TransitionContext::new(Pipelines::GRAPHICS, caps.clone(), config, topology(&caps));
        let mut stream = RecordingStream::default();
        graphics.end_transitions(&mut stream, &[&transition]);
        match stream.commands.as_slice() {
            [RecordedCommand::Barrier2 { buffer, .. }] => {
                assert_eq!(buffer[0].src_queue_family_index, 1);
                assert_eq!(buffer[0].dst_queue_family_index, 0);
                assert_eq!(buffer[0].src_access_mask, vk::AccessFlags2::NONE);
            }
            other => panic!("unexpected acquire {other:?}"),
        }
        let acquire = graphics.take_submission([command_buffer(2)]);
        assert_eq!(acquire.wait_semaphores[0].0.raw(), semaphore);
        assert!(acquire.signal_semaphores.is_empty());
    }

    #[test]
    fn legacy_devices_record_everything_at_the_end() {
        let caps = DeviceCapabilities {
            synchronization2: false,
            ..Default::default()
        };
        let gpu = FakeGpu::new(caps.clone());
        let config = SyncConfig {
            fold_memory_barriers: false,
            ..Default::default()
        };
        let transition = buffer_transition(
            &gpu,
            &config,
            Pipelines::GRAPHICS,
            Pipelines::GRAPHICS,
            AccessState::COPY_DEST,
            AccessState::SRV_GRAPHICS,
        );

        let mut context = TransitionContext::new(Pipelines::GRAPHICS, caps.clone(), config, topology(&caps));
        let mut stream = RecordingStream::default();
        context.begin_transitions(&mut stream, &[&transition]);
        assert!(stream.commands.is_empty());
        context.end_transitions(&mut stream, &[&transition]);
        match stream.commands.as_slice() {
            [RecordedCommand::Barrier { src_stage_mask, buffer, .. }] => {
                assert!(src_stage_mask.contains(vk::PipelineStageFlags::TRANSFER));
                assert_eq!(buffer.len(), 1);
            }
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn plane_tracking_follows_recorded_transitions() {
        let gpu = FakeGpu::new(DeviceCapabilities::default());
        let caps = DeviceCapabilities::default();
        let config = SyncConfig {
            allow_split_barriers: false,
            ..Default::default()
        };
        let texture = TextureDesc::depth_stencil(
            vk::Image::from_raw(9),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            true,
            AccessState::DSV_WRITE,
        );
        let planes = texture.planes.clone().unwrap();
        let plane_transition = |plane: u32| {
            Transition::create(
                TransitionCreateInfo {
                    src_pipelines: Pipelines::GRAPHICS,
                    dst_pipelines: Pipelines::GRAPHICS,
                    flags: TransitionCreateFlags::empty(),
                    infos: vec![TransitionInfo::new(
                        Resource::Texture(texture.clone()),
                        AccessState::DSV_WRITE,
                        AccessState::SRV_GRAPHICS,
                    )
                    .plane(plane)],
                },
                &gpu.device(),
                &config,
            )
            .unwrap()
        };
        let mut context = TransitionContext::new(Pipelines::GRAPHICS, caps.clone(), config.clone(), topology(&caps));

        let depth = plane_transition(0);
        let mut stream = RecordingStream::default();
        context.begin_transitions(&mut stream, &[&depth]);
        assert_eq!(planes.get(0), AccessState::DSV_WRITE);
        context.end_transitions(&mut stream, &[&depth]);
        assert_eq!(planes.get(0), AccessState::SRV_GRAPHICS);
        assert_eq!(planes.get(1), AccessState::DSV_WRITE);

        // The stencil transition sees the depth plane already read-only.
        let stencil = plane_transition(1);
        let mut stream = RecordingStream::default();
        context.end_transitions(&mut stream, &[&stencil]);
        match stream.commands.as_slice() {
            [RecordedCommand::Barrier2 { image, .. }] => {
                assert_eq!(image.len(), 1);
                assert_eq!(
                    image[0].old_layout,
                    vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
                );
                assert_eq!(image[0].new_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
            }
            other => panic!("unexpected commands {other:?}"),
        }
        assert_eq!(planes.get(1), AccessState::SRV_GRAPHICS);
    }
}
