//! A simulated GPU and a recording command stream for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};
use ash::prelude::VkResult;
use parking_lot::{Condvar, Mutex};

use crate::backend::{DeviceBackend, QueueBackend, SubmitBatch};
use crate::barrier::{LegacyBatch, Sync2Batch};
use crate::capabilities::DeviceCapabilities;
use crate::command::CommandStream;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

struct QueuedBatch {
    batch: SubmitBatch,
    /// Signaled once this batch, the last of its driver call, executed.
    fence: Option<vk::Fence>,
}

#[derive(Default)]
struct GpuState {
    next_handle: u64,
    binary_semaphores: HashMap<vk::Semaphore, bool>,
    timelines: HashMap<vk::Semaphore, u64>,
    fences: HashMap<vk::Fence, bool>,
    events: HashSet<vk::Event>,
    queues: BTreeMap<u32, VecDeque<QueuedBatch>>,
    submitted: Vec<vk::CommandBuffer>,
    executed: Vec<vk::CommandBuffer>,
    submit_calls: usize,
    fail_next_submit: Option<vk::Result>,
}

impl GpuState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Execute batches of `family` in order until one waits on an unsignaled semaphore.
    fn execute(&mut self, family: u32) -> usize {
        let mut executed = 0;
        loop {
            let Some(front) = self.queues.get(&family).and_then(|queue| queue.front()) else {
                return executed;
            };
            let ready = front
                .batch
                .wait_semaphores
                .iter()
                .all(|(semaphore, _)| self.binary_semaphores.get(semaphore).copied().unwrap_or(false));
            if !ready {
                return executed;
            }
            let queued = self.queues.get_mut(&family).unwrap().pop_front().unwrap();
            for (semaphore, _) in queued.batch.wait_semaphores.iter() {
                self.binary_semaphores.insert(*semaphore, false);
            }
            self.executed.extend(queued.batch.command_buffers.iter().copied());
            for semaphore in queued.batch.signal_semaphores.iter() {
                self.binary_semaphores.insert(*semaphore, true);
            }
            if let Some((timeline, value)) = queued.batch.timeline_signal {
                let counter = self.timelines.entry(timeline).or_insert(0);
                *counter = (*counter).max(value);
            }
            if let Some(fence) = queued.fence {
                self.fences.insert(fence, true);
            }
            executed += 1;
        }
    }
}

struct FakeDevice {
    capabilities: DeviceCapabilities,
    state: Mutex<GpuState>,
    progress: Condvar,
}

impl FakeDevice {
    /// Block until `done` holds or `timeout_ns` elapsed.
    fn wait_until(&self, timeout_ns: u64, mut done: impl FnMut(&GpuState) -> bool) -> bool {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        let mut state = self.state.lock();
        loop {
            if done(&state) {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.progress.wait_until(&mut state, deadline).timed_out() {
                        return done(&state);
                    }
                }
                None => self.progress.wait(&mut state),
            }
        }
    }
}

impl DeviceBackend for FakeDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_semaphore(&self, timeline_initial_value: Option<u64>) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = vk::Semaphore::from_raw(state.handle());
        if let Some(value) = timeline_initial_value {
            state.timelines.insert(semaphore, value);
        } else {
            state.binary_semaphores.insert(semaphore, false);
        }
        Ok(semaphore)
    }
    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.binary_semaphores.remove(&semaphore);
        state.timelines.remove(&semaphore);
    }
    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> VkResult<u64> {
        self.state
            .lock()
            .timelines
            .get(&semaphore)
            .copied()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }
    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> VkResult<bool> {
        Ok(self.wait_until(timeout_ns, |state| {
            state.timelines.get(&semaphore).map_or(true, |&counter| counter >= value)
        }))
    }

    fn create_fence(&self) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(state.handle());
        state.fences.insert(fence, false);
        Ok(fence)
    }
    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().fences.remove(&fence);
    }
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.state.lock().fences.insert(fence, false);
        Ok(())
    }
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        Ok(self.state.lock().fences.get(&fence).copied().unwrap_or(false))
    }
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<bool> {
        Ok(self.wait_until(timeout_ns, |state| state.fences.get(&fence).copied().unwrap_or(false)))
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        let mut state = self.state.lock();
        let event = vk::Event::from_raw(state.handle());
        state.events.insert(event);
        Ok(event)
    }
    fn destroy_event(&self, event: vk::Event) {
        self.state.lock().events.remove(&event);
    }
}

struct FakeQueue {
    device: Arc<FakeDevice>,
    family_index: u32,
}

impl QueueBackend for FakeQueue {
    fn family_index(&self) -> u32 {
        self.family_index
    }
    fn submit(&self, batches: &[SubmitBatch], fence: vk::Fence) -> VkResult<()> {
        let mut state = self.device.state.lock();
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }
        state.submit_calls += 1;
        for (i, batch) in batches.iter().enumerate() {
            state.submitted.extend(batch.command_buffers.iter().copied());
            let fence = (i + 1 == batches.len() && fence != vk::Fence::null()).then_some(fence);
            state
                .queues
                .entry(self.family_index)
                .or_default()
                .push_back(QueuedBatch {
                    batch: batch.clone(),
                    fence,
                });
        }
        Ok(())
    }
    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.device.state.lock();
        state.execute(self.family_index);
        self.device.progress.notify_all();
        Ok(())
    }
}

/// A GPU that only runs submitted work when told to.
pub(crate) struct FakeGpu {
    device: Arc<FakeDevice>,
}

impl FakeGpu {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            device: Arc::new(FakeDevice {
                capabilities,
                state: Mutex::new(GpuState::default()),
                progress: Condvar::new(),
            }),
        }
    }
    pub fn device(&self) -> Arc<dyn DeviceBackend> {
        self.device.clone()
    }
    pub fn queue(&self, family_index: u32) -> Arc<dyn QueueBackend> {
        Arc::new(FakeQueue {
            device: self.device.clone(),
            family_index,
        })
    }

    pub fn is_live_semaphore(&self, semaphore: vk::Semaphore) -> bool {
        let state = self.device.state.lock();
        state.binary_semaphores.contains_key(&semaphore) || state.timelines.contains_key(&semaphore)
    }
    pub fn is_live_event(&self, event: vk::Event) -> bool {
        self.device.state.lock().events.contains(&event)
    }
    pub fn live_fences(&self) -> usize {
        self.device.state.lock().fences.len()
    }

    /// Run everything runnable on every queue. Returns how many batches executed.
    pub fn complete_all(&self) -> usize {
        let mut state = self.device.state.lock();
        let families: Vec<u32> = state.queues.keys().copied().collect();
        let mut total = 0;
        loop {
            let executed: usize = families.iter().map(|&family| state.execute(family)).sum();
            if executed == 0 {
                break;
            }
            total += executed;
        }
        self.device.progress.notify_all();
        total
    }

    /// Command buffers in the order they were handed to the driver.
    pub fn submitted(&self) -> Vec<vk::CommandBuffer> {
        self.device.state.lock().submitted.clone()
    }
    /// Command buffers in the order they were executed.
    pub fn executed(&self) -> Vec<vk::CommandBuffer> {
        self.device.state.lock().executed.clone()
    }
    pub fn submit_calls(&self) -> usize {
        self.device.state.lock().submit_calls
    }
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.device.state.lock().fail_next_submit = Some(result);
    }
}

pub(crate) fn command_buffer(raw: u64) -> vk::CommandBuffer {
    vk::CommandBuffer::from_raw(raw)
}

#[derive(Debug)]
pub(crate) enum RecordedCommand {
    Barrier2 {
        memory: Vec<vk::MemoryBarrier2>,
        buffer: Vec<vk::BufferMemoryBarrier2>,
        image: Vec<vk::ImageMemoryBarrier2>,
    },
    Barrier {
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        memory: Vec<vk::MemoryBarrier>,
        buffer: Vec<vk::BufferMemoryBarrier>,
        image: Vec<vk::ImageMemoryBarrier>,
    },
    SetEvent {
        event: vk::Event,
        memory: Vec<vk::MemoryBarrier2>,
        buffer: Vec<vk::BufferMemoryBarrier2>,
        image: Vec<vk::ImageMemoryBarrier2>,
    },
    WaitEvent {
        event: vk::Event,
        memory: Vec<vk::MemoryBarrier2>,
        buffer: Vec<vk::BufferMemoryBarrier2>,
        image: Vec<vk::ImageMemoryBarrier2>,
    },
}

/// A command stream that keeps every recorded barrier for inspection.
#[derive(Debug, Default)]
pub(crate) struct RecordingStream {
    pub commands: Vec<RecordedCommand>,
}

impl CommandStream for RecordingStream {
    fn pipeline_barrier2(&mut self, batch: Sync2Batch<'_>) {
        self.commands.push(RecordedCommand::Barrier2 {
            memory: batch.memory.to_vec(),
            buffer: batch.buffer.to_vec(),
            image: batch.image.to_vec(),
        });
    }
    fn pipeline_barrier(&mut self, batch: LegacyBatch<'_>) {
        self.commands.push(RecordedCommand::Barrier {
            src_stage_mask: batch.src_stage_mask,
            dst_stage_mask: batch.dst_stage_mask,
            memory: batch.memory.to_vec(),
            buffer: batch.buffer.to_vec(),
            image: batch.image.to_vec(),
        });
    }
    fn set_event2(&mut self, event: vk::Event, batch: Sync2Batch<'_>) {
        self.commands.push(RecordedCommand::SetEvent {
            event,
            memory: batch.memory.to_vec(),
            buffer: batch.buffer.to_vec(),
            image: batch.image.to_vec(),
        });
    }
    fn wait_event2(&mut self, event: vk::Event, batch: Sync2Batch<'_>) {
        self.commands.push(RecordedCommand::WaitEvent {
            event,
            memory: batch.memory.to_vec(),
            buffer: batch.buffer.to_vec(),
            image: batch.image.to_vec(),
        });
    }
}
