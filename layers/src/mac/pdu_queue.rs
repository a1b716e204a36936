//! MAC PDU Queue
//!
//! Hands decoded MAC PDUs from the PHY workers to the MAC without
//! allocating on the real-time path. Buffers come from a fixed pool whose
//! size equals the queue capacity; a producer requests a buffer, fills it
//! and pushes it, and the consumer delivers it to the registered callback
//! before returning it to the pool.
//!
//! The queue is single producer per push call site and single consumer:
//! `process_pdus` must only be driven from one thread.

use crate::LayerError;
use common::{BufferPool, PoolHandle};
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default number of PDU buffers
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Largest MAC PDU in bytes
pub const MAX_PDU_LEN: usize = 150 * 1024 / 8;

/// Logical channel class a PDU was received on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Dedicated channel
    Dch,
    /// Broadcast channel
    Bch,
    /// Multicast channel
    Mch,
}

/// Receiver of queued PDUs
pub trait PduCallback: Send + Sync {
    fn process_pdu(&self, pdu: &[u8], channel: Channel);
}

/// Behaviour of [`PduQueue::push_bytes`] when no buffer is free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    /// Wait up to `timeout` for the consumer to return a buffer
    Block { timeout: Duration },
    /// Fail immediately
    Drop,
}

/// Queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduQueueConfig {
    pub capacity: usize,
    pub max_pdu_len: usize,
    pub full_policy: FullPolicy,
}

impl Default for PduQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_SIZE,
            max_pdu_len: MAX_PDU_LEN,
            full_policy: FullPolicy::Drop,
        }
    }
}

/// Pooled PDU storage
#[derive(Debug)]
struct Pdu {
    data: Box<[u8]>,
    len: usize,
    channel: Channel,
}

/// A checked-out PDU buffer
///
/// Must be given back through [`PduQueue::push`] or [`PduQueue::deallocate`];
/// dropping it leaks the pool slot and asserts in debug builds.
#[derive(Debug)]
pub struct PduBuffer {
    handle: PoolHandle,
}

/// Bounded PDU queue backed by a buffer pool
pub struct PduQueue {
    config: PduQueueConfig,
    pool: BufferPool<Pdu>,
    pending: Mutex<VecDeque<PoolHandle>>,
    /// Signalled on push
    not_empty: Condvar,
    /// Signalled when a buffer goes back to the pool
    buffer_returned: Condvar,
    callback: RwLock<Option<Arc<dyn PduCallback>>>,
}

impl PduQueue {
    /// Create a queue; zero capacity or PDU length is rejected
    pub fn new(config: PduQueueConfig) -> Result<Self, LayerError> {
        if config.capacity == 0 || config.max_pdu_len == 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "PDU queue of {} buffers x {} bytes", config.capacity, config.max_pdu_len
            )));
        }

        let max_pdu_len = config.max_pdu_len;
        let pool = BufferPool::new(config.capacity, || Pdu {
            data: vec![0u8; max_pdu_len].into_boxed_slice(),
            len: 0,
            channel: Channel::Dch,
        });

        debug!("PDU queue created: {} buffers of {} bytes", config.capacity, config.max_pdu_len);

        Ok(Self {
            config,
            pool,
            pending: Mutex::new(VecDeque::with_capacity(config.capacity)),
            not_empty: Condvar::new(),
            buffer_returned: Condvar::new(),
            callback: RwLock::new(None),
        })
    }

    /// Register the consumer callback
    pub fn init(&self, callback: Arc<dyn PduCallback>) {
        *self.callback.write() = Some(callback);
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// PDUs pushed and not yet processed
    pub fn nof_pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Buffers free in the pool
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Check out an empty buffer able to hold `len` bytes; never blocks
    ///
    /// An oversized request fails with `InvalidPdu` without taking a buffer.
    pub fn request(&self, len: usize) -> Result<PduBuffer, LayerError> {
        if len > self.config.max_pdu_len {
            return Err(LayerError::InvalidPdu(format!(
                "PDU of {} bytes exceeds {}", len, self.config.max_pdu_len
            )));
        }
        let handle = self.pool.acquire()?;
        self.pool.get(&handle).len = 0;
        Ok(PduBuffer { handle })
    }

    /// Writable view of a buffer's full storage
    pub fn buffer_mut<'a>(&'a self, buffer: &'a mut PduBuffer) -> MappedMutexGuard<'a, [u8]> {
        MutexGuard::map(self.pool.get(&buffer.handle), |pdu| &mut pdu.data[..])
    }

    /// Copy `data` into a buffer, returning its length
    pub fn write(&self, buffer: &mut PduBuffer, data: &[u8]) -> Result<usize, LayerError> {
        if data.len() > self.config.max_pdu_len {
            return Err(LayerError::InvalidPdu(format!(
                "PDU of {} bytes exceeds {}", data.len(), self.config.max_pdu_len
            )));
        }
        let mut pdu = self.pool.get(&buffer.handle);
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(data.len())
    }

    /// Return a buffer without queuing it
    pub fn deallocate(&self, buffer: PduBuffer) {
        self.release(buffer.handle);
    }

    fn release(&self, handle: PoolHandle) {
        self.pool.release(handle);
        // Take the lock so a producer between its check and its wait sees the wakeup
        let _pending = self.pending.lock();
        self.buffer_returned.notify_all();
    }

    /// Queue a filled buffer of `len` bytes
    ///
    /// On error the buffer has already been returned to the pool.
    pub fn push(&self, buffer: PduBuffer, len: usize, channel: Channel) -> Result<(), LayerError> {
        if len > self.config.max_pdu_len {
            self.release(buffer.handle);
            return Err(LayerError::InvalidPdu(format!(
                "PDU of {} bytes exceeds {}", len, self.config.max_pdu_len
            )));
        }

        {
            let mut pdu = self.pool.get(&buffer.handle);
            pdu.len = len;
            pdu.channel = channel;
        }

        let mut pending = self.pending.lock();
        if pending.len() >= self.config.capacity {
            drop(pending);
            warn!("PDU queue full, dropping {} byte PDU", len);
            self.release(buffer.handle);
            return Err(LayerError::QueueFull);
        }
        pending.push_back(buffer.handle);
        trace!("Queued {} byte PDU on {:?}, {} pending", len, channel, pending.len());
        drop(pending);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Request, fill and push in one call, honouring the full policy
    pub fn push_bytes(&self, data: &[u8], channel: Channel) -> Result<(), LayerError> {
        let deadline = match self.config.full_policy {
            FullPolicy::Block { timeout } => Some(Instant::now() + timeout),
            FullPolicy::Drop => None,
        };

        let mut buffer = loop {
            match self.request(data.len()) {
                Ok(buffer) => break buffer,
                Err(LayerError::PoolExhausted) => {
                    let Some(deadline) = deadline else {
                        return Err(LayerError::QueueFull);
                    };
                    let mut pending = self.pending.lock();
                    if self.pool.available() > 0 {
                        continue;
                    }
                    if self.buffer_returned.wait_until(&mut pending, deadline).timed_out()
                        && self.pool.available() == 0
                    {
                        return Err(LayerError::QueueFull);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        match self.write(&mut buffer, data) {
            Ok(len) => self.push(buffer, len, channel),
            Err(e) => {
                self.deallocate(buffer);
                Err(e)
            }
        }
    }

    /// Take the oldest PDU, waiting for one to be pushed
    pub fn pop(&self) -> (PduBuffer, Channel) {
        let mut pending = self.pending.lock();
        let handle = loop {
            match pending.pop_front() {
                Some(handle) => break handle,
                None => self.not_empty.wait(&mut pending),
            }
        };
        drop(pending);

        let channel = self.pool.get(&handle).channel;
        (PduBuffer { handle }, channel)
    }

    /// Take the oldest PDU, waiting up to `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<(PduBuffer, Channel)> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while pending.is_empty() {
            if self.not_empty.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        let handle = pending.pop_front()?;
        drop(pending);

        let channel = self.pool.get(&handle).channel;
        Some((PduBuffer { handle }, channel))
    }

    /// Read the payload of a popped buffer
    pub fn read<'a>(&'a self, buffer: &'a PduBuffer) -> MappedMutexGuard<'a, [u8]> {
        MutexGuard::map(self.pool.get(&buffer.handle), |pdu| {
            let len = pdu.len;
            &mut pdu.data[..len]
        })
    }

    /// Deliver every pending PDU to the callback in push order
    ///
    /// Returns whether any PDU was processed. Without a callback the PDUs
    /// are discarded.
    pub fn process_pdus(&self) -> bool {
        let callback = self.callback.read().clone();
        let mut processed = false;

        loop {
            let Some(handle) = self.pending.lock().pop_front() else {
                break;
            };

            {
                let pdu = self.pool.get(&handle);
                match &callback {
                    Some(callback) => callback.process_pdu(&pdu.data[..pdu.len], pdu.channel),
                    None => warn!("No PDU callback registered, discarding {} byte PDU", pdu.len),
                }
            }

            self.release(handle);
            processed = true;
        }

        processed
    }

    /// Wait up to `timeout` for a PDU, then process everything pending
    pub fn process_pdus_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut pending = self.pending.lock();
            while pending.is_empty() {
                if self.not_empty.wait_until(&mut pending, deadline).timed_out() {
                    return false;
                }
            }
        }
        self.process_pdus()
    }

    /// Drop every pending PDU and return its buffer
    pub fn reset(&self) {
        let drained: Vec<PoolHandle> = self.pending.lock().drain(..).collect();
        let count = drained.len();
        for handle in drained {
            self.release(handle);
        }
        if count > 0 {
            debug!("PDU queue reset, {} PDUs discarded", count);
        }
    }
}

impl Drop for PduQueue {
    fn drop(&mut self) {
        // Queued buffers still belong to the pool
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Collector {
        pdus: Mutex<Vec<(Vec<u8>, Channel)>>,
    }

    impl PduCallback for Collector {
        fn process_pdu(&self, pdu: &[u8], channel: Channel) {
            self.pdus.lock().push((pdu.to_vec(), channel));
        }
    }

    fn queue(capacity: usize, full_policy: FullPolicy) -> PduQueue {
        PduQueue::new(PduQueueConfig { capacity, max_pdu_len: 64, full_policy }).unwrap()
    }

    #[test]
    fn test_push_process_in_order() {
        let queue = queue(8, FullPolicy::Drop);
        let collector = Arc::new(Collector::default());
        queue.init(collector.clone());

        for i in 0..5u8 {
            let mut buffer = queue.request(3).unwrap();
            let len = queue.write(&mut buffer, &[i; 3]).unwrap();
            let channel = if i == 2 { Channel::Bch } else { Channel::Dch };
            queue.push(buffer, len, channel).unwrap();
        }
        assert_eq!(queue.nof_pending(), 5);

        assert!(queue.process_pdus());
        assert!(!queue.process_pdus());

        let pdus = collector.pdus.lock();
        assert_eq!(pdus.len(), 5);
        for (i, (data, channel)) in pdus.iter().enumerate() {
            assert_eq!(data, &vec![i as u8; 3]);
            assert_eq!(*channel, if i == 2 { Channel::Bch } else { Channel::Dch });
        }
        assert_eq!(queue.available(), 8);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let queue = queue(2, FullPolicy::Drop);
        let a = queue.request(3).unwrap();
        let b = queue.request(3).unwrap();
        assert!(matches!(queue.request(3), Err(LayerError::PoolExhausted)));
        assert_eq!(queue.push_bytes(&[1, 2, 3], Channel::Dch), Err(LayerError::QueueFull));

        queue.deallocate(a);
        let c = queue.request(64).unwrap();
        queue.deallocate(b);
        queue.deallocate(c);
        assert_eq!(queue.available(), 2);
    }

    #[test]
    fn test_push_bytes_blocks_until_buffer_returned() {
        let queue = Arc::new(queue(1, FullPolicy::Block { timeout: Duration::from_secs(5) }));
        let collector = Arc::new(Collector::default());
        queue.init(collector.clone());

        queue.push_bytes(&[1], Channel::Dch).unwrap();
        assert_eq!(queue.available(), 0);

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.process_pdus()
            })
        };

        queue.push_bytes(&[2], Channel::Dch).unwrap();
        assert!(consumer.join().unwrap());
        queue.process_pdus();

        let pdus = collector.pdus.lock();
        assert_eq!(pdus.iter().map(|(d, _)| d[0]).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_push_bytes_block_times_out() {
        let queue = queue(1, FullPolicy::Block { timeout: Duration::from_millis(20) });
        queue.push_bytes(&[1], Channel::Dch).unwrap();
        assert_eq!(queue.push_bytes(&[2], Channel::Dch), Err(LayerError::QueueFull));
        assert_eq!(queue.nof_pending(), 1);
    }

    #[test]
    fn test_oversized_pdu_rejected() {
        let queue = queue(2, FullPolicy::Drop);
        assert!(matches!(queue.request(65), Err(LayerError::InvalidPdu(_))));
        assert_eq!(queue.available(), 2);

        let mut buffer = queue.request(64).unwrap();
        assert!(queue.write(&mut buffer, &[0u8; 65]).is_err());
        assert!(matches!(queue.push(buffer, 65, Channel::Dch), Err(LayerError::InvalidPdu(_))));
        assert_eq!(queue.available(), 2);
        assert!(queue.push_bytes(&[0u8; 65], Channel::Dch).is_err());
        assert_eq!(queue.available(), 2);
    }

    #[test]
    fn test_pop_and_read() {
        let queue = queue(4, FullPolicy::Drop);
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());

        queue.push_bytes(b"hello", Channel::Mch).unwrap();
        let (buffer, channel) = queue.pop_timeout(Duration::from_millis(5)).unwrap();
        assert_eq!(channel, Channel::Mch);
        assert_eq!(&*queue.read(&buffer), b"hello");
        queue.deallocate(buffer);
        assert_eq!(queue.available(), 4);

        queue.push_bytes(&[1], Channel::Dch).unwrap();
        queue.push_bytes(&[2], Channel::Bch).unwrap();
        let (first, _) = queue.pop();
        let (second, channel) = queue.pop();
        assert_eq!(&*queue.read(&first), &[1]);
        assert_eq!(&*queue.read(&second), &[2]);
        assert_eq!(channel, Channel::Bch);
        queue.deallocate(first);
        queue.deallocate(second);
    }

    #[test]
    fn test_reset_returns_buffers() {
        let queue = queue(4, FullPolicy::Drop);
        for _ in 0..3 {
            queue.push_bytes(&[7], Channel::Dch).unwrap();
        }
        queue.reset();
        assert_eq!(queue.nof_pending(), 0);
        assert_eq!(queue.available(), 4);
        assert!(!queue.process_pdus());
    }

    #[test]
    fn test_drop_with_pending_pdus() {
        let queue = queue(2, FullPolicy::Drop);
        queue.push_bytes(&[1], Channel::Dch).unwrap();
        queue.push_bytes(&[2], Channel::Bch).unwrap();
        assert_eq!(queue.available(), 0);
        // Queued buffers go back to the pool rather than tripping the leak check
        drop(queue);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let queue = Arc::new(queue(8, FullPolicy::Block { timeout: Duration::from_secs(5) }));
        let received = Arc::new(AtomicUsize::new(0));

        struct Counter(Arc<AtomicUsize>);
        impl PduCallback for Counter {
            fn process_pdu(&self, _pdu: &[u8], _channel: Channel) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        queue.init(Arc::new(Counter(received.clone())));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..200u32 {
                    queue.push_bytes(&i.to_be_bytes(), Channel::Dch).unwrap();
                }
            })
        };

        while received.load(Ordering::SeqCst) < 200 {
            queue.process_pdus_timeout(Duration::from_millis(10));
        }
        producer.join().unwrap();
        assert_eq!(queue.available(), 8);
    }
}
