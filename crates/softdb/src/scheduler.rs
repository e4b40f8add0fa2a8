use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use tracing::warn;


/// A unit of background work submitted by the version set.
pub type BackgroundJob = Box<dyn FnOnce() + Send + 'static>;

/// Host-provided background execution.
///
/// The version set enforces single-compaction-at-a-time itself (via its
/// scheduled flag), so implementations only need to run jobs eventually;
/// they may run them on any thread, including the caller's.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, job: BackgroundJob);
}

/// Runs jobs on one dedicated background thread, in submission order.
#[derive(Debug)]
pub struct ThreadScheduler {
    sender: Option<Sender<BackgroundJob>>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<BackgroundJob>();
        let worker = std::thread::Builder::new()
            .name("softdb-bg".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("spawning the background thread");
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: BackgroundJob) {
        let alive = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !alive {
            warn!("background job dropped: scheduler is shut down");
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain pending jobs and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Runs jobs inline on the submitting thread. Deterministic; used by tests
/// and by hosts that drive compaction from their own threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialScheduler;

impl Scheduler for SerialScheduler {
    fn schedule(&self, job: BackgroundJob) {
        job();
    }
}
