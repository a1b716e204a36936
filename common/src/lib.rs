//! Common Utilities and Types Library
//! 
//! This crate provides shared types, utilities and the real-time
//! building blocks (buffer pool, worker pool, task pool) used across the
//! GNodeB baseband implementation.

pub mod types;
pub mod utils;
pub mod buffer_pool;
pub mod threads;
pub mod thread_pool;
pub mod task_pool;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
pub use buffer_pool::{BufferPool, PoolError, PoolHandle, PoolGuard};
pub use threads::{ThreadError, ThreadParams};
pub use thread_pool::{ReservedWorker, Worker, WorkerPool, WorkerStatus};
pub use task_pool::{background_workers, init_background_workers, TaskThreadPool};
