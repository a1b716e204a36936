//! Fixed-capacity buffer pool
//!
//! Pre-allocates `capacity` buffers at construction and hands out move-only
//! index handles through a lock-free free list. The pool never grows, so
//! nothing on the real-time path allocates.

use crossbeam_queue::ArrayQueue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, error};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Buffer pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Buffer pool exhausted: all {capacity} buffers in use")]
    Exhausted { capacity: usize },
}

/// Exclusive claim on one pool slot
///
/// Not `Clone`: at most one owner exists per checked-out buffer. Every
/// handle must go back through [`BufferPool::release`]; dropping one
/// instead leaks its slot for the life of the pool, which asserts in debug
/// builds and logs an error in release builds.
#[derive(Debug, PartialEq, Eq)]
pub struct PoolHandle {
    pool_id: u32,
    index: u32,
}

impl PoolHandle {
    /// Slot index inside the owning pool
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Consume the handle without tripping the leak check
    fn into_parts(self) -> (u32, u32) {
        let parts = (self.pool_id, self.index);
        std::mem::forget(self);
        parts
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        // Unwinding already reports the real failure
        if !std::thread::panicking() {
            debug_assert!(false, "Buffer {} of pool #{} dropped without release", self.index, self.pool_id);
            error!("Buffer {} of pool #{} dropped without release, slot leaked", self.index, self.pool_id);
        }
    }
}

/// Access guard to a checked-out buffer
pub type PoolGuard<'a, T> = MutexGuard<'a, T>;

/// Arena of `T` with a free list of indices
pub struct BufferPool<T> {
    id: u32,
    slots: Box<[Mutex<T>]>,
    in_use: Box<[AtomicBool]>,
    free_list: ArrayQueue<u32>,
    exhausted_count: AtomicU64,
}

impl<T> BufferPool<T> {
    /// Create a pool of `capacity` buffers built by `init`
    ///
    /// # Panics
    /// Panics if `capacity` is zero or does not fit a `u32` index.
    pub fn new(capacity: usize, mut init: impl FnMut() -> T) -> Self {
        assert!(
            capacity > 0 && capacity <= u32::MAX as usize,
            "BufferPool capacity must be 1..=u32::MAX"
        );

        let slots: Box<[Mutex<T>]> = (0..capacity).map(|_| Mutex::new(init())).collect();
        let in_use: Box<[AtomicBool]> = (0..capacity).map(|_| AtomicBool::new(false)).collect();

        let free_list = ArrayQueue::new(capacity);
        for index in 0..capacity as u32 {
            // Queue capacity matches the loop count
            let _ = free_list.push(index);
        }

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Created buffer pool #{} with {} buffers", id, capacity);

        Self {
            id,
            slots,
            in_use,
            free_list,
            exhausted_count: AtomicU64::new(0),
        }
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Buffers currently available for checkout
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Number of failed acquisitions since creation
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted_count.load(Ordering::Relaxed)
    }

    /// Check out a buffer; never blocks
    pub fn acquire(&self) -> Result<PoolHandle, PoolError> {
        match self.free_list.pop() {
            Some(index) => {
                self.in_use[index as usize].store(true, Ordering::Release);
                Ok(PoolHandle { pool_id: self.id, index })
            }
            None => {
                self.exhausted_count.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::Exhausted { capacity: self.capacity() })
            }
        }
    }

    /// Return a buffer to the pool
    ///
    /// Releasing a handle that is not checked out from this pool is a
    /// contract violation: it asserts in debug builds and is ignored (with
    /// an error log) in release builds.
    pub fn release(&self, handle: PoolHandle) {
        let (pool_id, index) = handle.into_parts();
        if pool_id != self.id {
            debug_assert!(false, "Handle from pool #{} released into pool #{}", pool_id, self.id);
            error!("Ignoring release of foreign handle (pool #{} into #{})", pool_id, self.id);
            return;
        }

        let was_in_use = self.in_use[index as usize].swap(false, Ordering::AcqRel);
        if !was_in_use {
            debug_assert!(false, "Double release of buffer {} in pool #{}", index, self.id);
            error!("Ignoring double release of buffer {} in pool #{}", index, self.id);
            return;
        }

        if self.free_list.push(index).is_err() {
            error!("Free list overflow in pool #{}", self.id);
        }
    }

    /// Access the buffer behind a handle
    pub fn get(&self, handle: &PoolHandle) -> PoolGuard<'_, T> {
        debug_assert_eq!(handle.pool_id, self.id, "Handle does not belong to this pool");
        debug_assert!(self.in_use[handle.index()].load(Ordering::Acquire));
        self.slots[handle.index()].lock()
    }
}

impl<T: Default> BufferPool<T> {
    /// Create a pool of default-constructed buffers
    pub fn with_default(capacity: usize) -> Self {
        Self::new(capacity, T::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pool_creation() {
        let pool: BufferPool<Vec<u8>> = BufferPool::new(16, || vec![0u8; 1500]);
        assert_eq!(pool.capacity(), 16);
        assert_eq!(pool.available(), 16);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let pool: BufferPool<[u8; 64]> = BufferPool::new(4, || [0u8; 64]);
        let mut handles: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.available(), 0);

        assert_eq!(pool.acquire(), Err(PoolError::Exhausted { capacity: 4 }));
        assert_eq!(pool.exhausted_count(), 1);

        pool.release(handles.pop().unwrap());
        let again = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());

        pool.release(again);
        for handle in handles {
            pool.release(handle);
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_buffer_contents_survive_checkout() {
        let pool: BufferPool<Vec<u8>> = BufferPool::with_default(2);
        let handle = pool.acquire().unwrap();
        pool.get(&handle).extend_from_slice(&[1, 2, 3]);
        assert_eq!(&pool.get(&handle)[..], &[1, 2, 3]);
        pool.release(handle);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool: Arc<BufferPool<u64>> = Arc::new(BufferPool::with_default(8));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Ok(handle) = pool.acquire() {
                            *pool.get(&handle) += 1;
                            pool.release(handle);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(pool.available(), 8);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Double release")]
    fn test_double_release_traps_in_debug() {
        let pool: BufferPool<u8> = BufferPool::with_default(2);
        let handle = pool.acquire().unwrap();
        let forged = PoolHandle { pool_id: handle.pool_id, index: handle.index };
        pool.release(handle);
        pool.release(forged);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "dropped without release")]
    fn test_leaked_handle_traps_in_debug() {
        let pool: BufferPool<u8> = BufferPool::with_default(2);
        let handle = pool.acquire().unwrap();
        drop(handle);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released into pool")]
    fn test_foreign_release_traps_in_debug() {
        let a: BufferPool<u8> = BufferPool::with_default(1);
        let b: BufferPool<u8> = BufferPool::with_default(1);
        let handle = a.acquire().unwrap();
        b.release(handle);
    }
}
