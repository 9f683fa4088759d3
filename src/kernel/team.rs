//! Teams - pools of worker threads draining one job queue each.
//!
//! Each worker loops: bounded dequeue, execute if something arrived, otherwise
//! re-check the liveness flag. Teams share nothing but what their jobs share,
//! so a team whose workers are all stuck never holds up another team.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::queue::JobQueue;
use crate::types::{Result, TeamName};

/// Executes one dequeued item on a worker thread.
pub type TeamExecutor<T> = Arc<dyn Fn(T) + Send + Sync>;

type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool bound to a single [`JobQueue`].
pub struct Team<T: Send + 'static> {
    name: TeamName,
    queue: Arc<JobQueue<T>>,
    running: Arc<AtomicBool>,
    executed: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> Team<T> {
    /// Spawn `workers` threads draining `queue`.
    pub fn start(
        name: TeamName,
        workers: usize,
        poll_interval: Duration,
        queue: Arc<JobQueue<T>>,
        executor: TeamExecutor<T>,
    ) -> Result<Self> {
        Self::start_with(name, workers, poll_interval, queue, executor, |builder, body| {
            builder.spawn(body)
        })
    }

    fn start_with<S>(
        name: TeamName,
        workers: usize,
        poll_interval: Duration,
        queue: Arc<JobQueue<T>>,
        executor: TeamExecutor<T>,
        mut spawn: S,
    ) -> Result<Self>
    where
        S: FnMut(std::thread::Builder, WorkerBody) -> std::io::Result<JoinHandle<()>>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let executed = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let worker_queue = queue.clone();
            let worker_running = running.clone();
            let executed = executed.clone();
            let executor = executor.clone();
            let team = name.clone();

            let builder = std::thread::Builder::new().name(format!("{}-{}", name, worker));
            let body: WorkerBody = Box::new(move || {
                let span = tracing::debug_span!("team_worker", team = %team, worker);
                let _entered = span.enter();
                while worker_running.load(Ordering::Acquire) {
                    if let Some(item) = worker_queue.dequeue_timeout(poll_interval) {
                        executor(item);
                        executed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                tracing::debug!("worker_exited");
            });
            match spawn(builder, body) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Workers already started must not outlive the failed team.
                    running.store(false, Ordering::Release);
                    queue.wake_all();
                    tracing::error!(team = %name, worker, error = %err, "team_start_failed");
                    return Err(err.into());
                }
            }
        }

        tracing::info!(team = %name, workers, "team_started");

        Ok(Self {
            name,
            queue,
            running,
            executed,
            workers: handles,
        })
    }

    pub fn name(&self) -> &TeamName {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue(&self) -> &Arc<JobQueue<T>> {
        &self.queue
    }

    /// Number of items executed by this team's workers.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the workers, waiting up to `timeout` for them to exit.
    ///
    /// Workers still inside a job when the timeout elapses are detached.
    /// Returns the number of workers that were detached.
    pub fn shutdown(&mut self, timeout: Duration) -> usize {
        self.running.store(false, Ordering::Release);
        self.queue.wake_all();

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && self.workers.iter().any(|h| !h.is_finished()) {
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut detached = 0;
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!(team = %self.name, "worker_panicked");
                }
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            tracing::warn!(team = %self.name, detached, "team_stopped_with_busy_workers");
        } else {
            tracing::info!(team = %self.name, "team_stopped");
        }
        detached
    }
}

impl<T: Send + 'static> Drop for Team<T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.queue.wake_all();
    }
}

impl<T: Send + 'static> fmt::Debug for Team<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Team")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("queued", &self.queue.len())
            .field("running", &self.is_running())
            .finish()
    }
}
