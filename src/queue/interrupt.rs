use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use super::QueueDispatcher;
use crate::error::Result;

/// Retires completed submissions of every queue on a dedicated thread, so that resources held by
/// payloads are released without the submitting thread polling for them.
pub struct InterruptThread {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InterruptThread {
    pub fn spawn(dispatchers: Vec<Arc<QueueDispatcher>>, interval: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = std::thread::Builder::new()
            .name("dustash-sync-interrupt".into())
            .spawn({
                let stop = stop.clone();
                move || {
                    tracing::debug!(queues = dispatchers.len(), "interrupt thread started");
                    while !stop.load(Ordering::Acquire) {
                        for dispatcher in dispatchers.iter() {
                            if let Err(err) = dispatcher.process_completions() {
                                tracing::error!(
                                    queue = ?dispatcher.queue_type(),
                                    error = ?err,
                                    "failed to process completions"
                                );
                            }
                        }
                        std::thread::park_timeout(interval);
                    }
                    tracing::debug!("interrupt thread stopped");
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for InterruptThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::error!("interrupt thread panicked");
            }
        }
    }
}
