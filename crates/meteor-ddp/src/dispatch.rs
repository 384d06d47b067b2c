//! Where observer and listener callbacks run.
//!
//! The engine never calls application code while holding its lock, and it
//! never calls it from whatever thread happened to deliver a frame. Every
//! callback is handed to a [`Dispatcher`] as a job instead; the dispatcher
//! decides where it runs.

use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// A unit of callback work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs callback jobs.
///
/// Implementations must run jobs one at a time, in the order they were
/// dispatched. Observers rely on seeing `on_connect` before the data that
/// follows it.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, job: Job);
}

/// Runs each job immediately on the dispatching thread.
///
/// Handy for tests and single-threaded hosts. Jobs dispatched from inside a
/// job run nested, which keeps ordering as long as only one thread drives
/// the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs jobs on a single tokio task, in order.
///
/// The task drains an unbounded channel; it stops when the last
/// `TokioDispatcher` clone is dropped.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    sender: mpsc::UnboundedSender<Job>,
}

impl TokioDispatcher {
    /// Spawns the dispatcher task on the given runtime.
    pub fn new(runtime: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            tracing::debug!("callback dispatcher started");
            while let Some(job) = receiver.recv().await {
                job();
            }
            tracing::debug!("callback dispatcher stopped");
        });
        Self { sender }
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            // Only happens while the runtime is shutting down.
            tracing::warn!("callback dispatcher is gone, dropping job");
        }
    }
}
