//! FIFO task pool for background (non-deadline) work
//!
//! Independent from the real-time [`WorkerPool`](crate::WorkerPool): tasks
//! are boxed closures served in push order by N threads.

use crate::threads::{self, ThreadError, ThreadParams, DEFAULT_AFFINITY_MASK};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Number of threads of the process-wide background pool when nobody
/// configured it before first use
pub const DEFAULT_BACKGROUND_WORKERS: usize = 2;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    tasks: VecDeque<Task>,
    running: bool,
    /// Set by `stop`, never cleared
    stopped: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    cv_empty: Condvar,
}

/// Pool of background threads serving a FIFO task queue
pub struct TaskThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    target_workers: Mutex<usize>,
    priority: i32,
    affinity_mask: u32,
}

impl TaskThreadPool {
    /// Create a pool; unless `start_deferred`, its threads start immediately
    ///
    /// Spawn failures are logged; call [`start`](Self::start) to observe them.
    pub fn new(nof_workers: usize, start_deferred: bool, priority: i32, affinity_mask: u32) -> Self {
        let pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    running: false,
                    stopped: false,
                }),
                cv_empty: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(nof_workers)),
            target_workers: Mutex::new(nof_workers),
            priority,
            affinity_mask,
        };

        if !start_deferred {
            if let Err(e) = pool.start() {
                error!("Failed to start task pool: {}", e);
            }
        }
        pool
    }

    /// Spawn the worker threads
    ///
    /// A stopped pool cannot be restarted.
    pub fn start(&self) -> Result<(), ThreadError> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopped {
                return Err(ThreadError::NotRunning);
            }
            queue.running = true;
        }
        let target = *self.target_workers.lock();
        self.spawn_up_to(target)?;
        info!("Task pool started with {} workers", self.nof_workers());
        Ok(())
    }

    /// Grow the pool to `nof_workers` threads
    ///
    /// Shrinking is not supported; smaller values are ignored.
    pub fn set_nof_workers(&self, nof_workers: usize) -> Result<(), ThreadError> {
        {
            let mut target = self.target_workers.lock();
            if nof_workers < *target {
                warn!("Task pool cannot shrink from {} to {} workers", *target, nof_workers);
                return Ok(());
            }
            *target = nof_workers;
        }
        if self.shared.queue.lock().running {
            self.spawn_up_to(nof_workers)?;
        }
        Ok(())
    }

    /// Enqueue a task
    ///
    /// Tasks pushed after [`stop`](Self::stop) are discarded.
    pub fn push_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            warn!("Discarding task pushed to a stopped task pool");
            return;
        }
        queue.tasks.push_back(Box::new(task));
        self.shared.cv_empty.notify_one();
    }

    /// Instantaneous number of queued tasks
    pub fn nof_pending_tasks(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Number of spawned threads
    pub fn nof_workers(&self) -> usize {
        self.workers.lock().len()
    }

    /// Drain the queue, then join every thread
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.running = false;
            queue.stopped = true;
            self.shared.cv_empty.notify_all();
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("Task worker thread panicked");
            }
        }
        info!("Task pool stopped");
    }

    fn spawn_up_to(&self, target: usize) -> Result<(), ThreadError> {
        let mut workers = self.workers.lock();
        while workers.len() < target {
            let id = workers.len();
            let params = ThreadParams::new(format!("TASK-WORKER-{}", id))
                .with_priority(self.priority.max(0))
                .with_affinity(self.affinity_mask);
            let shared = self.shared.clone();
            workers.push(threads::spawn(params, move || run_task_worker(shared, id))?);
        }
        Ok(())
    }
}

impl Drop for TaskThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_task_worker(shared: Arc<Shared>, id: usize) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if !queue.running {
                    debug!("Task worker {} exiting", id);
                    return;
                }
                shared.cv_empty.wait(&mut queue);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Task panicked on task worker {}", id);
        }
    }
}

static BACKGROUND_WORKERS: OnceLock<TaskThreadPool> = OnceLock::new();

/// Process-wide pool for fire-and-forget background work
///
/// Built on first use with [`DEFAULT_BACKGROUND_WORKERS`] threads unless
/// [`init_background_workers`] ran first. It lives until process exit.
pub fn background_workers() -> &'static TaskThreadPool {
    BACKGROUND_WORKERS.get_or_init(|| {
        TaskThreadPool::new(DEFAULT_BACKGROUND_WORKERS, false, 0, DEFAULT_AFFINITY_MASK)
    })
}

/// Build the process-wide pool with `nof_workers` threads
///
/// Returns `false` if the pool already existed (first use wins).
pub fn init_background_workers(nof_workers: usize) -> bool {
    let mut initialised = false;
    BACKGROUND_WORKERS.get_or_init(|| {
        initialised = true;
        TaskThreadPool::new(nof_workers, false, 0, DEFAULT_AFFINITY_MASK)
    });
    initialised
}
