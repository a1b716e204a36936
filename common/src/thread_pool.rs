//! Index-addressable pool of long-lived real-time workers
//!
//! Every slot runs one OS thread bound to one worker implementation. A
//! driver thread reserves a worker, configures it, starts it and later
//! synchronises on it, either by slot id or by asking for any finished one.
//!
//! Slot state machine (single mutex, one condition variable per slot plus
//! one for "any slot finished"):
//!
//! | from             | to               | written by |
//! |------------------|------------------|------------|
//! | Stopped          | Idle             | `init_worker` |
//! | Idle             | Ready            | dispatcher (`wait_worker*` reserves) |
//! | Ready            | Idle             | dispatcher (reservation dropped) |
//! | Ready            | StartRequested   | dispatcher (`start_worker`) |
//! | StartRequested   | Working          | worker thread |
//! | Working          | Idle             | worker thread (work done) |
//! | any              | Stopped          | dispatcher (`stop`) |
//!
//! While a worker is Ready its implementation is moved out to the
//! dispatcher inside a [`ReservedWorker`]; while it is Working it is moved
//! to the worker thread. Nobody else can reach it, so configuring a working
//! worker is impossible rather than merely forbidden.

use crate::threads::{self, ThreadError, ThreadParams};
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info};

/// Unit of real-time work run by a pool slot
pub trait Worker: Send + 'static {
    /// Run one unit of work on the slot's own thread
    ///
    /// Must return in bounded time: a worker that never returns starves the
    /// pool and hangs [`WorkerPool::stop`].
    fn work_imp(&mut self);
}

/// State of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Stopped,
    Idle,
    StartRequested,
    Ready,
    Working,
}

struct Slot<W> {
    status: WorkerStatus,
    worker: Option<Box<W>>,
    initialised: bool,
}

struct PoolState<W> {
    running: bool,
    slots: Vec<Slot<W>>,
}

struct Shared<W> {
    state: Mutex<PoolState<W>>,
    cvar_worker: Vec<Condvar>,
    cvar_queue: Condvar,
}

/// Fixed pool of worker slots
pub struct WorkerPool<W: Worker> {
    shared: Arc<Shared<W>>,
    threads: Mutex<Vec<Option<JoinHandle<()>>>>,
    nof_workers: u32,
}

/// A worker checked out to the dispatcher
///
/// Dereferences to the worker implementation. Hand it back with
/// [`WorkerPool::start_worker`]; dropping it instead returns the slot to
/// Idle without running any work.
pub struct ReservedWorker<'a, W: Worker> {
    pool: &'a WorkerPool<W>,
    id: u32,
    worker: Option<Box<W>>,
}

impl<'a, W: Worker> ReservedWorker<'a, W> {
    /// Slot id of this worker
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl<'a, W: Worker> Deref for ReservedWorker<'a, W> {
    type Target = W;

    fn deref(&self) -> &W {
        match &self.worker {
            Some(worker) => worker,
            None => unreachable!("reserved worker consumed"),
        }
    }
}

impl<'a, W: Worker> DerefMut for ReservedWorker<'a, W> {
    fn deref_mut(&mut self) -> &mut W {
        match &mut self.worker {
            Some(worker) => worker,
            None => unreachable!("reserved worker consumed"),
        }
    }
}

impl<'a, W: Worker> Drop for ReservedWorker<'a, W> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.return_worker(self.id, worker);
        }
    }
}

impl<W: Worker> WorkerPool<W> {
    /// Create a pool with `nof_workers` empty slots
    pub fn new(nof_workers: u32) -> Self {
        let slots = (0..nof_workers)
            .map(|_| Slot {
                status: WorkerStatus::Stopped,
                worker: None,
                initialised: false,
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState { running: true, slots }),
                cvar_worker: (0..nof_workers).map(|_| Condvar::new()).collect(),
                cvar_queue: Condvar::new(),
            }),
            threads: Mutex::new((0..nof_workers).map(|_| None).collect()),
            nof_workers,
        }
    }

    /// Number of slots
    pub fn nof_workers(&self) -> u32 {
        self.nof_workers
    }

    /// Snapshot of a slot's state
    pub fn status(&self, id: u32) -> Option<WorkerStatus> {
        let state = self.shared.state.lock();
        state.slots.get(id as usize).map(|slot| slot.status)
    }

    /// Bind `worker` to slot `id` and start its thread in Idle
    pub fn init_worker(&self, id: u32, worker: W, priority: i32, affinity_mask: u32) -> Result<(), ThreadError> {
        if id >= self.nof_workers {
            return Err(ThreadError::InvalidSlot { id, nof_workers: self.nof_workers });
        }

        {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Err(ThreadError::NotRunning);
            }
            let slot = &mut state.slots[id as usize];
            if slot.initialised {
                return Err(ThreadError::SlotInUse(id));
            }
            slot.worker = Some(Box::new(worker));
            slot.status = WorkerStatus::Idle;
            slot.initialised = true;
        }

        let params = ThreadParams::new(format!("PHY-WORKER-{}", id))
            .with_priority(priority)
            .with_affinity(affinity_mask);
        let shared = self.shared.clone();
        let handle = match threads::spawn(params, move || run_worker(shared, id as usize)) {
            Ok(handle) => handle,
            Err(e) => {
                let mut state = self.shared.state.lock();
                let slot = &mut state.slots[id as usize];
                slot.worker = None;
                slot.status = WorkerStatus::Stopped;
                slot.initialised = false;
                return Err(e);
            }
        };
        self.threads.lock()[id as usize] = Some(handle);

        debug!("Worker slot {} initialised (prio={}, mask={:#x})", id, priority, affinity_mask);
        Ok(())
    }

    /// Request slot `worker.id()` to run one unit of work
    pub fn start_worker(&self, mut worker: ReservedWorker<'_, W>) {
        debug_assert!(std::ptr::eq(worker.pool, self), "Reserved worker belongs to another pool");

        let Some(inner) = worker.worker.take() else {
            return;
        };
        let id = worker.id as usize;

        let mut state = self.shared.state.lock();
        let slot = &mut state.slots[id];
        slot.worker = Some(inner);
        if slot.status == WorkerStatus::Ready {
            slot.status = WorkerStatus::StartRequested;
            self.shared.cvar_worker[id].notify_one();
        } else {
            // Pool was stopped while the dispatcher held the worker
            debug!("Not starting worker {}: slot is {:?}", id, slot.status);
        }
    }

    /// Block until slot `id` has finished its work, then reserve it
    ///
    /// Returns `None` once the pool is stopped or if `id` is not a slot.
    /// Waiting on a slot that was never initialised is a dispatcher bug.
    pub fn wait_worker_id(&self, id: u32) -> Option<ReservedWorker<'_, W>> {
        let idx = id as usize;
        let mut state = self.shared.state.lock();
        if idx >= state.slots.len() {
            return None;
        }
        if !state.slots[idx].initialised {
            debug_assert!(false, "Waiting on worker slot {} that was never initialised", id);
            error!("Waiting on worker slot {} that was never initialised", id);
            return None;
        }

        while state.running && state.slots[idx].status != WorkerStatus::Idle {
            self.shared.cvar_worker[idx].wait(&mut state);
        }

        if !state.running {
            return None;
        }
        self.reserve(&mut state, idx)
    }

    /// Block until any slot is free, searching from `tti % nof_workers`
    pub fn wait_worker(&self, tti: u32) -> Option<ReservedWorker<'_, W>> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(idx) = self.find_finished_worker(&state, tti) {
                return self.reserve(&mut state, idx);
            }
            self.shared.cvar_queue.wait(&mut state);
        }
    }

    /// Like [`wait_worker`](Self::wait_worker) but gives up at `deadline`
    pub fn wait_worker_until(&self, tti: u32, deadline: Instant) -> Option<ReservedWorker<'_, W>> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(idx) = self.find_finished_worker(&state, tti) {
                return self.reserve(&mut state, idx);
            }
            if self.shared.cvar_queue.wait_until(&mut state, deadline).timed_out() {
                return match self.find_finished_worker(&state, tti) {
                    Some(idx) if state.running => self.reserve(&mut state, idx),
                    _ => None,
                };
            }
        }
    }

    /// Reserve a free slot if one exists, without blocking
    pub fn wait_worker_nb(&self, tti: u32) -> Option<ReservedWorker<'_, W>> {
        let mut state = self.shared.state.lock();
        if !state.running {
            return None;
        }
        let idx = self.find_finished_worker(&state, tti)?;
        self.reserve(&mut state, idx)
    }

    /// Stop all slots and join their threads
    ///
    /// Idempotent. Work units already running are allowed to finish.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                info!("Stopping worker pool with {} workers", self.nof_workers);
            }
            state.running = false;
            for (idx, slot) in state.slots.iter_mut().enumerate() {
                slot.status = WorkerStatus::Stopped;
                self.shared.cvar_worker[idx].notify_all();
            }
            self.shared.cvar_queue.notify_all();
        }

        let handles: Vec<JoinHandle<()>> = self.threads.lock().iter_mut().filter_map(Option::take).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }

    fn find_finished_worker(&self, state: &PoolState<W>, tti: u32) -> Option<usize> {
        let n = state.slots.len();
        if n == 0 {
            return None;
        }
        (0..n)
            .map(|i| (i + tti as usize) % n)
            .find(|&idx| state.slots[idx].status == WorkerStatus::Idle)
    }

    fn reserve(&self, state: &mut PoolState<W>, idx: usize) -> Option<ReservedWorker<'_, W>> {
        let slot = &mut state.slots[idx];
        let worker = slot.worker.take()?;
        slot.status = WorkerStatus::Ready;
        Some(ReservedWorker {
            pool: self,
            id: idx as u32,
            worker: Some(worker),
        })
    }

    fn return_worker(&self, id: u32, worker: Box<W>) {
        let idx = id as usize;
        let mut state = self.shared.state.lock();
        let slot = &mut state.slots[idx];
        slot.worker = Some(worker);
        if slot.status == WorkerStatus::Ready {
            slot.status = WorkerStatus::Idle;
        }
        self.shared.cvar_worker[idx].notify_all();
        self.shared.cvar_queue.notify_all();
    }
}

impl<W: Worker> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<W: Worker>(shared: Arc<Shared<W>>, id: usize) {
    loop {
        // Wait for a start request
        let mut worker = {
            let mut state = shared.state.lock();
            loop {
                match state.slots[id].status {
                    WorkerStatus::StartRequested => break,
                    WorkerStatus::Stopped => {
                        debug!("Worker {} exiting", id);
                        return;
                    }
                    _ => shared.cvar_worker[id].wait(&mut state),
                }
            }
            let slot = &mut state.slots[id];
            match slot.worker.take() {
                Some(worker) => {
                    slot.status = WorkerStatus::Working;
                    worker
                }
                None => {
                    error!("Worker {} started without an implementation", id);
                    slot.status = WorkerStatus::Idle;
                    continue;
                }
            }
        };

        worker.work_imp();

        let mut state = shared.state.lock();
        let slot = &mut state.slots[id];
        slot.worker = Some(worker);
        if slot.status != WorkerStatus::Stopped {
            slot.status = WorkerStatus::Idle;
        }
        shared.cvar_worker[id].notify_all();
        shared.cvar_queue.notify_all();
    }
}
