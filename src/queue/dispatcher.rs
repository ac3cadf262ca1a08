use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use ash::vk;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::payload::{SemaphoreRegistry, SubmissionHandle, SubmissionPayload, SubmissionStatus, CANCELLED, UNSUBMITTED};
use super::{Fence, QueueType, Semaphore, TimelineSemaphore};
use crate::backend::{DeviceBackend, QueueBackend, SubmitBatch};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

struct PendingSubmission {
    state: Arc<AtomicU64>,
    payload: SubmissionPayload,
}

struct InFlight {
    value: u64,
    /// Only used when the device has no timeline semaphores.
    fence: Option<Arc<Fence>>,
    payload: SubmissionPayload,
}

/// The submission engine of one hardware queue.
///
/// Any thread may `submit`. Payloads are handed to the driver by `flush` strictly in the order
/// they were submitted; a payload whose wait semaphores were not signaled yet stalls everything
/// behind it. Completions are retired in order by `process_completions`, usually on the
/// interrupt thread.
///
/// The producer side only ever writes `next_value`, the completion side only `completed_value`.
pub struct QueueDispatcher {
    ty: QueueType,
    queue: Arc<dyn QueueBackend>,
    device: Arc<dyn DeviceBackend>,
    config: SyncConfig,
    registry: Arc<SemaphoreRegistry>,

    incoming: SegQueue<PendingSubmission>,
    pending: Mutex<VecDeque<PendingSubmission>>,
    /// Held by `flush` until the driver accepted the payloads.
    submit_lock: Mutex<()>,
    next_value: AtomicU64,

    interrupts: SegQueue<InFlight>,
    in_flight: Mutex<VecDeque<InFlight>>,
    completed_value: AtomicU64,

    timeline: Option<TimelineSemaphore>,
    free_fences: SegQueue<Fence>,
    lost: AtomicBool,
}

impl QueueDispatcher {
    pub fn new(
        ty: QueueType,
        queue: Arc<dyn QueueBackend>,
        device: Arc<dyn DeviceBackend>,
        config: SyncConfig,
        registry: Arc<SemaphoreRegistry>,
    ) -> Result<Self> {
        let timeline = if device.capabilities().timeline_semaphore {
            Some(TimelineSemaphore::new(device.clone(), UNSUBMITTED)?)
        } else {
            None
        };
        tracing::info!(
            queue = ?ty,
            family = queue.family_index(),
            timeline = timeline.is_some(),
            "create queue dispatcher"
        );
        Ok(Self {
            ty,
            queue,
            device,
            config,
            registry,
            incoming: SegQueue::new(),
            pending: Mutex::new(VecDeque::new()),
            submit_lock: Mutex::new(()),
            next_value: AtomicU64::new(UNSUBMITTED),
            interrupts: SegQueue::new(),
            in_flight: Mutex::new(VecDeque::new()),
            completed_value: AtomicU64::new(UNSUBMITTED),
            timeline,
            free_fences: SegQueue::new(),
            lost: AtomicBool::new(false),
        })
    }

    pub fn queue_type(&self) -> QueueType {
        self.ty
    }
    pub fn family_index(&self) -> u32 {
        self.queue.family_index()
    }
    /// The last timeline value whose payload was retired.
    pub fn completed_value(&self) -> u64 {
        self.completed_value.load(Ordering::Acquire)
    }
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Enqueue `payload`. Nothing reaches the driver before the next `flush`.
    pub fn submit(&self, payload: SubmissionPayload) -> Result<SubmissionHandle> {
        if self.is_lost() {
            return Err(Error::ContextLost(self.ty));
        }
        let handle = SubmissionHandle::new(self.ty);
        self.incoming.push(PendingSubmission {
            state: handle.state.clone(),
            payload,
        });
        Ok(handle)
    }

    /// Hand every payload whose wait semaphores are signaled to the driver, in enqueue order.
    /// Returns how many payloads were submitted.
    ///
    /// Concurrent flushes are serialized from selection through the driver call, so payloads
    /// reach the driver and get their timeline values in enqueue order.
    pub fn flush(&self) -> Result<usize> {
        if self.is_lost() {
            return Err(Error::ContextLost(self.ty));
        }
        let _submitting = self.submit_lock.lock();
        let (ready, signals) = {
            let mut pending = self.pending.lock();
            while let Some(submission) = self.incoming.pop() {
                pending.push_back(submission);
            }
            let mut registered = self.registry.lock();
            // Signaled by payloads of this flush. Other queues only see them once the driver
            // accepted the submission.
            let mut signals: HashMap<vk::Semaphore, Arc<Semaphore>> = HashMap::new();
            let mut ready: Vec<PendingSubmission> = Vec::new();
            while let Some(front) = pending.front() {
                let satisfied = front.payload.wait_semaphores.iter().all(|(semaphore, _)| {
                    registered.contains(&semaphore.raw()) || signals.contains_key(&semaphore.raw())
                });
                if !satisfied {
                    tracing::debug!(
                        queue = ?self.ty,
                        stalled = pending.len(),
                        "submission waits on a semaphore that was not signaled yet"
                    );
                    break;
                }
                let Some(submission) = pending.pop_front() else {
                    break;
                };
                // Binary semaphores are consumed by their wait.
                for (semaphore, _) in submission.payload.wait_semaphores.iter() {
                    if signals.remove(&semaphore.raw()).is_none() {
                        registered.remove(&semaphore.raw());
                    }
                }
                for semaphore in submission.payload.signal_semaphores.iter() {
                    signals.insert(semaphore.raw(), semaphore.clone());
                }
                ready.push(submission);
            }
            (ready, signals)
        };
        if ready.is_empty() {
            return Ok(0);
        }
        let count = ready.len();
        match &self.timeline {
            Some(timeline) => self.submit_timeline(timeline, ready)?,
            None => self.submit_fenced(ready)?,
        }
        for semaphore in signals.values() {
            self.registry.register(semaphore);
        }
        tracing::trace!(queue = ?self.ty, count, "flushed submissions");
        Ok(count)
    }

    // One driver call for the whole flush, each payload signaling its own timeline value.
    fn submit_timeline(&self, timeline: &TimelineSemaphore, ready: Vec<PendingSubmission>) -> Result<()> {
        let mut values: SmallVec<[u64; 8]> = SmallVec::with_capacity(ready.len());
        let batches: Vec<SubmitBatch> = ready
            .iter()
            .map(|submission| {
                let value = self.next_value.fetch_add(1, Ordering::AcqRel) + 1;
                values.push(value);
                let mut batch = submission.payload.to_batch();
                batch.timeline_signal = Some((timeline.raw(), value));
                batch
            })
            .collect();
        self.check_submit(self.queue.submit(&batches, vk::Fence::null()))?;
        for (submission, value) in ready.into_iter().zip(values) {
            submission.state.store(value, Ordering::Release);
            self.interrupts.push(InFlight {
                value,
                fence: None,
                payload: submission.payload,
            });
        }
        Ok(())
    }

    // Only one fence fits into a driver call, so every payload is its own call.
    fn submit_fenced(&self, ready: Vec<PendingSubmission>) -> Result<()> {
        for submission in ready {
            let fence = match self.free_fences.pop() {
                Some(fence) => fence,
                None => Fence::new(self.device.clone())?,
            };
            let value = self.next_value.fetch_add(1, Ordering::AcqRel) + 1;
            self.check_submit(self.queue.submit(&[submission.payload.to_batch()], fence.fence))?;
            submission.state.store(value, Ordering::Release);
            self.interrupts.push(InFlight {
                value,
                fence: Some(Arc::new(fence)),
                payload: submission.payload,
            });
            if self.config.wait_for_idle_on_submit {
                self.queue.wait_idle()?;
            }
        }
        Ok(())
    }

    fn check_submit(&self, result: ash::prelude::VkResult<()>) -> Result<()> {
        if let Err(err) = result {
            self.lost.store(true, Ordering::Release);
            tracing::error!(queue = ?self.ty, error = ?err, "queue submission failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Retire every payload the GPU finished, in submission order. Returns how many were retired.
    pub fn process_completions(&self) -> Result<usize> {
        let mut in_flight = self.in_flight.lock();
        while let Some(submission) = self.interrupts.pop() {
            in_flight.push_back(submission);
        }
        if in_flight.is_empty() {
            return Ok(0);
        }
        let observed = match &self.timeline {
            Some(timeline) => timeline.value()?,
            None => UNSUBMITTED,
        };
        let mut retired = 0;
        while let Some(front) = in_flight.front() {
            let done = match &front.fence {
                Some(fence) => fence.signaled()?,
                None => front.value <= observed,
            };
            if !done {
                break;
            }
            let Some(submission) = in_flight.pop_front() else {
                break;
            };
            self.completed_value.store(submission.value, Ordering::Release);
            self.retire(submission);
            retired += 1;
        }
        if retired > 0 {
            tracing::trace!(queue = ?self.ty, retired, completed = self.completed_value(), "retired submissions");
        }
        Ok(retired)
    }

    fn retire(&self, submission: InFlight) {
        if let Some(fence) = submission.fence {
            // A poller may still hold the fence; it is destroyed once they let go.
            if let Ok(mut fence) = Arc::try_unwrap(fence) {
                match fence.reset() {
                    Ok(()) => self.free_fences.push(fence),
                    Err(err) => tracing::warn!(error = ?err, "failed to reset fence"),
                }
            }
        }
        drop(submission.payload);
    }

    /// Current status of `handle`, blocking up to `timeout` for an in-flight payload.
    /// A zero timeout never blocks. Timing out yields `Pending`.
    pub fn poll_or_wait(&self, handle: &SubmissionHandle, timeout: Duration) -> Result<SubmissionStatus> {
        let value = handle.value();
        if value == CANCELLED {
            return Ok(SubmissionStatus::Cancelled);
        }
        self.process_completions()?;
        if value == UNSUBMITTED {
            // Handed to the driver in the meantime.
            if handle.is_submitted() && handle.value() <= self.completed_value() {
                return Ok(SubmissionStatus::Complete);
            }
            return Ok(SubmissionStatus::Pending);
        }
        if value <= self.completed_value() {
            return Ok(SubmissionStatus::Complete);
        }
        if timeout.is_zero() {
            return Ok(SubmissionStatus::Pending);
        }

        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let done = match &self.timeline {
            Some(timeline) => timeline.wait(value, timeout_ns)?,
            None => {
                let fence = self
                    .in_flight
                    .lock()
                    .iter()
                    .find(|submission| submission.value == value)
                    .and_then(|submission| submission.fence.clone());
                match fence {
                    Some(fence) => fence.wait(timeout_ns)?,
                    // Retired while we were looking.
                    None => true,
                }
            }
        };
        if !done {
            return Ok(SubmissionStatus::Pending);
        }
        self.process_completions()?;
        Ok(if value <= self.completed_value() {
            SubmissionStatus::Complete
        } else {
            SubmissionStatus::Pending
        })
    }

    /// Remove a payload that was not handed to the driver yet. Returns whether it was found.
    pub fn cancel(&self, handle: &SubmissionHandle) -> bool {
        let mut pending = self.pending.lock();
        while let Some(submission) = self.incoming.pop() {
            pending.push_back(submission);
        }
        let Some(index) = pending
            .iter()
            .position(|submission| handle.same_payload(&submission.state))
        else {
            return false;
        };
        if let Some(submission) = pending.remove(index) {
            submission.state.store(CANCELLED, Ordering::Release);
            tracing::debug!(queue = ?self.ty, "cancelled pending submission");
        }
        true
    }

    /// Block until the queue is idle and retire everything.
    pub fn wait_idle(&self) -> Result<()> {
        self.queue.wait_idle()?;
        self.process_completions()?;
        Ok(())
    }

    /// Payloads waiting for `flush` or for their wait semaphores.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len() + self.incoming.len()
    }
}

impl Drop for QueueDispatcher {
    fn drop(&mut self) {
        if !self.is_lost() {
            if let Err(err) = self.wait_idle() {
                tracing::error!(queue = ?self.ty, error = ?err, "failed to drain queue");
            }
        }
        tracing::info!(queue = ?self.ty, "drop queue dispatcher");
    }
}
