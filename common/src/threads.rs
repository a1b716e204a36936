//! Named OS threads with optional real-time priority and CPU affinity

use std::io;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, warn};

/// Affinity mask meaning "run on any core"
pub const DEFAULT_AFFINITY_MASK: u32 = 255;

/// Thread and pool errors
#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Worker slot {id} out of range (pool has {nof_workers} slots)")]
    InvalidSlot { id: u32, nof_workers: u32 },

    #[error("Worker slot {0} already initialised")]
    SlotInUse(u32),

    #[error("Pool is not running")]
    NotRunning,
}

/// Scheduling parameters for a spawned thread
#[derive(Debug, Clone)]
pub struct ThreadParams {
    /// Thread name, shown in logs and `top -H`
    pub name: String,
    /// 0 keeps the default scheduler; N > 0 requests SCHED_FIFO at (max - N)
    pub priority: i32,
    /// Bit i set pins the thread to CPU i; 0 or 255 leaves it unpinned
    pub affinity_mask: u32,
}

impl ThreadParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            affinity_mask: DEFAULT_AFFINITY_MASK,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_affinity(mut self, affinity_mask: u32) -> Self {
        self.affinity_mask = affinity_mask;
        self
    }
}

/// Spawn a named thread and apply its scheduling parameters from inside it
pub fn spawn<F, T>(params: ThreadParams, f: F) -> Result<JoinHandle<T>, ThreadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = params.name.clone();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            apply_params(&params);
            f()
        })
        .map_err(|source| ThreadError::Spawn { name, source })
}

fn apply_params(params: &ThreadParams) {
    if params.priority > 0 {
        match set_realtime_priority(params.priority) {
            Ok(()) => debug!("{}: real-time priority {}", params.name, params.priority),
            Err(e) => warn!("{}: could not set real-time priority {}: {}", params.name, params.priority, e),
        }
    }

    if params.affinity_mask != 0 && params.affinity_mask != DEFAULT_AFFINITY_MASK {
        match set_affinity(params.affinity_mask) {
            Ok(()) => debug!("{}: pinned to CPU mask {:#x}", params.name, params.affinity_mask),
            Err(e) => warn!("{}: could not set CPU mask {:#x}: {}", params.name, params.affinity_mask, e),
        }
    }
}

#[cfg(target_os = "linux")]
fn set_realtime_priority(priority: i32) -> io::Result<()> {
    // SAFETY: plain libc calls on the current thread with a zero-initialised param
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = (max - priority).max(1);
        let ret = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_affinity(mask: u32) -> io::Result<()> {
    // SAFETY: cpu_set_t is plain data; sched_setaffinity(0, ..) targets the calling thread
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for cpu in 0..32usize {
            if mask & (1 << cpu) != 0 {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_realtime_priority(_priority: i32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "real-time priority requires Linux"))
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_mask: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "CPU affinity requires Linux"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_named_thread() {
        let handle = spawn(ThreadParams::new("TEST-THREAD"), || {
            std::thread::current().name().map(str::to_owned)
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("TEST-THREAD"));
    }

    #[test]
    fn test_unprivileged_priority_still_runs() {
        // Without CAP_SYS_NICE the priority request fails and is only logged
        let params = ThreadParams::new("TEST-RT").with_priority(2).with_affinity(0x1);
        let handle = spawn(params, || 42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }
}
