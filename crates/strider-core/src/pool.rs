//! Elastic buffer pool: several fixed-capacity buffers behind one queue.
//!
//! Buffers circulate through a rotation queue. A caller takes the next
//! buffer, tries it without blocking and hands it back. Sustained put
//! failures grow the pool by one buffer (up to the maximum), sustained get
//! failures on an empty buffer evict it (down to one).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

use crate::buffer::{Buffer, Rejected};
use crate::error::CrawlerError;
use crate::sync::lock;

/// Failed puts per buffer before the pool grows.
const PUT_RETRY_FACTOR: u32 = 5;
/// Failed gets per buffer before an empty buffer is evicted.
const GET_RETRY_FACTOR: u32 = 10;
/// Upper bound on how long a caller parks after a fruitless sweep.
const RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub buffer_cap: u32,
    pub max_buffer_number: u32,
    pub buffer_number: u32,
    pub total: u64,
    pub closed: bool,
}

pub struct BufferPool<T> {
    buffer_cap: u32,
    max_buffer_number: u32,
    buffer_number: AtomicU32,
    total: AtomicU64,
    closed: AtomicBool,
    rotation: Mutex<VecDeque<Arc<Buffer<T>>>>,
    activity: Notify,
    failed_puts: AtomicU64,
    failed_gets: AtomicU64,
}

impl<T> BufferPool<T> {
    /// Creates a pool holding a single buffer.
    pub fn new(buffer_cap: u32, max_buffer_number: u32) -> Result<Self, CrawlerError> {
        if buffer_cap == 0 {
            return Err(CrawlerError::illegal_parameter(
                "illegal buffer cap for buffer pool: 0",
            ));
        }
        if max_buffer_number == 0 {
            return Err(CrawlerError::illegal_parameter(
                "illegal max buffer number for buffer pool: 0",
            ));
        }
        let mut rotation = VecDeque::with_capacity(max_buffer_number as usize);
        rotation.push_back(Arc::new(Buffer::with_capacity(buffer_cap as usize)));
        Ok(Self {
            buffer_cap,
            max_buffer_number,
            buffer_number: AtomicU32::new(1),
            total: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            rotation: Mutex::new(rotation),
            activity: Notify::new(),
            failed_puts: AtomicU64::new(0),
            failed_gets: AtomicU64::new(0),
        })
    }

    pub fn buffer_cap(&self) -> u32 {
        self.buffer_cap
    }

    pub fn max_buffer_number(&self) -> u32 {
        self.max_buffer_number
    }

    pub fn buffer_number(&self) -> u32 {
        self.buffer_number.load(Ordering::Acquire)
    }

    /// Data currently held across all buffers.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            buffer_cap: self.buffer_cap,
            max_buffer_number: self.max_buffer_number,
            buffer_number: self.buffer_number(),
            total: self.total(),
            closed: self.is_closed(),
        }
    }

    /// Stores `datum`, waiting for room as long as the pool stays open.
    pub async fn put(&self, datum: T) -> Result<(), CrawlerError> {
        if self.is_closed() {
            return Err(CrawlerError::ClosedBufferPool);
        }
        let max_count = self.buffer_number() * PUT_RETRY_FACTOR;
        let mut count = 0u32;
        let mut misses = 0u32;
        let mut datum = datum;
        loop {
            let buf = self.take_buffer().await?;
            match buf.try_put(datum) {
                Ok(()) => {
                    self.total.fetch_add(1, Ordering::AcqRel);
                    self.give_back(buf)?;
                    return Ok(());
                }
                Err(Rejected::Closed(returned)) => {
                    datum = returned;
                    self.give_back(buf)?;
                }
                Err(Rejected::Full(returned)) => {
                    self.give_back(buf)?;
                    self.failed_puts.fetch_add(1, Ordering::Relaxed);
                    count += 1;
                    if count >= max_count {
                        count = 0;
                        match self.grow(returned)? {
                            None => return Ok(()),
                            Some(returned) => datum = returned,
                        }
                    } else {
                        datum = returned;
                    }
                }
            }
            misses += 1;
            if misses >= self.buffer_number() {
                misses = 0;
                self.park().await;
            }
        }
    }

    /// Takes the oldest datum of the next non-empty buffer, waiting as long
    /// as the pool stays open.
    pub async fn get(&self) -> Result<T, CrawlerError> {
        if self.is_closed() {
            return Err(CrawlerError::ClosedBufferPool);
        }
        let max_count = self.buffer_number() * GET_RETRY_FACTOR;
        let mut count = 0u32;
        let mut misses = 0u32;
        loop {
            let buf = self.take_buffer().await?;
            match buf.try_get() {
                Ok(Some(datum)) => {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    self.give_back(buf)?;
                    return Ok(datum);
                }
                Ok(None) => {
                    self.failed_gets.fetch_add(1, Ordering::Relaxed);
                    count += 1;
                    if count >= max_count && buf.is_empty() && self.evict(&buf) {
                        count = 0;
                    } else {
                        self.give_back(buf)?;
                    }
                }
                Err(_) => self.give_back(buf)?,
            }
            misses += 1;
            if misses >= self.buffer_number() {
                misses = 0;
                self.park().await;
            }
        }
    }

    /// Closes the pool and every buffer in it. Only the first call has an
    /// effect and returns true.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        {
            let mut rotation = lock(&self.rotation);
            for buf in rotation.drain(..) {
                buf.close();
            }
        }
        self.activity.notify_waiters();
        true
    }

    async fn take_buffer(&self) -> Result<Arc<Buffer<T>>, CrawlerError> {
        loop {
            let notified = self.activity.notified();
            {
                let mut rotation = lock(&self.rotation);
                if self.is_closed() {
                    return Err(CrawlerError::ClosedBufferPool);
                }
                if let Some(buf) = rotation.pop_front() {
                    return Ok(buf);
                }
            }
            // every buffer is out with another caller
            let _ = tokio::time::timeout(RETRY_INTERVAL, notified).await;
        }
    }

    fn give_back(&self, buf: Arc<Buffer<T>>) -> Result<(), CrawlerError> {
        {
            let mut rotation = lock(&self.rotation);
            if self.is_closed() {
                buf.close();
                return Err(CrawlerError::ClosedBufferPool);
            }
            rotation.push_back(buf);
        }
        self.activity.notify_waiters();
        Ok(())
    }

    /// Adds a buffer seeded with `datum`. Hands the datum back when the
    /// pool is already at its maximum size.
    fn grow(&self, datum: T) -> Result<Option<T>, CrawlerError> {
        {
            let mut rotation = lock(&self.rotation);
            if self.is_closed() {
                return Err(CrawlerError::ClosedBufferPool);
            }
            if self.buffer_number() >= self.max_buffer_number {
                return Ok(Some(datum));
            }
            let buf = Buffer::with_capacity(self.buffer_cap as usize);
            if let Err(rejected) = buf.try_put(datum) {
                return Ok(Some(rejected.into_inner()));
            }
            rotation.push_back(Arc::new(buf));
            self.buffer_number.fetch_add(1, Ordering::AcqRel);
            self.total.fetch_add(1, Ordering::AcqRel);
        }
        tracing::debug!(
            buffer_number = self.buffer_number(),
            max_buffer_number = self.max_buffer_number,
            "Buffer pool grown"
        );
        self.activity.notify_waiters();
        Ok(None)
    }

    /// Closes `buf` instead of returning it, unless it is the last buffer.
    fn evict(&self, buf: &Buffer<T>) -> bool {
        {
            let _rotation = lock(&self.rotation);
            if self.is_closed() || self.buffer_number() <= 1 {
                return false;
            }
            buf.close();
            self.buffer_number.fetch_sub(1, Ordering::AcqRel);
        }
        tracing::debug!(buffer_number = self.buffer_number(), "Buffer pool shrunk");
        true
    }

    /// Puts rejected by a full buffer so far.
    pub fn failed_puts(&self) -> u64 {
        self.failed_puts.load(Ordering::Relaxed)
    }

    /// Gets that found their buffer empty so far.
    pub fn failed_gets(&self) -> u64 {
        self.failed_gets.load(Ordering::Relaxed)
    }

    async fn park(&self) {
        let _ = tokio::time::timeout(RETRY_INTERVAL, self.activity.notified()).await;
    }
}

impl<T> std::fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    #[test]
    fn test_rejects_zero_parameters() {
        assert!(BufferPool::<u8>::new(0, 1).is_err());
        assert!(BufferPool::<u8>::new(1, 0).is_err());
    }

    #[tokio::test]
    async fn test_fifo_with_single_buffer() {
        let pool = BufferPool::new(10, 1).unwrap();
        for i in 0..5 {
            pool.put(i).await.unwrap();
        }
        assert_eq!(pool.total(), 5);
        for i in 0..5 {
            assert_eq!(pool.get().await.unwrap(), i);
        }
        assert_eq!(pool.total(), 0);
        assert_eq!(pool.buffer_number(), 1);
    }

    #[tokio::test]
    async fn test_grows_after_five_failed_puts_per_buffer() {
        let pool = BufferPool::new(1, 3).unwrap();
        pool.put(1).await.unwrap();
        assert_eq!(pool.failed_puts(), 0);

        // one full buffer: grows on the 5th rejection
        pool.put(2).await.unwrap();
        assert_eq!(pool.buffer_number(), 2);
        assert_eq!(pool.failed_puts(), 5);

        // two full buffers: 10 more rejections
        pool.put(3).await.unwrap();
        assert_eq!(pool.buffer_number(), 3);
        assert_eq!(pool.failed_puts(), 15);
        assert_eq!(pool.total(), 3);
    }

    #[tokio::test]
    async fn test_put_keeps_retrying_at_max() {
        let pool = Arc::new(BufferPool::new(1, 1).unwrap());
        pool.put(1).await.unwrap();

        let blocked = timeout(Duration::from_millis(50), pool.put(2)).await;
        assert!(blocked.is_err(), "put should wait while the pool is full");
        assert_eq!(pool.buffer_number(), 1);

        let putter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.put(2).await })
        };
        assert_eq!(pool.get().await.unwrap(), 1);
        putter.await.unwrap().unwrap();
        assert_eq!(pool.get().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shrinks_when_idle_but_keeps_one_buffer() {
        let pool = Arc::new(BufferPool::new(1, 4).unwrap());
        for i in 0..4 {
            pool.put(i).await.unwrap();
        }
        assert_eq!(pool.buffer_number(), 4);
        for _ in 0..4 {
            pool.get().await.unwrap();
        }

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pool.buffer_number(), 1);

        pool.put(42).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
        assert_eq!(pool.buffer_number(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinks_after_ten_failed_gets_per_buffer() {
        let pool = Arc::new(BufferPool::new(1, 4).unwrap());
        for i in 0..4 {
            pool.put(i).await.unwrap();
        }
        for _ in 0..4 {
            pool.get().await.unwrap();
        }
        let before = pool.failed_gets();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await })
        };
        // the waiter only yields when it parks, and it parks right after
        // an eviction, so the first shrink is observed at its exact count
        while pool.buffer_number() == 4 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(pool.buffer_number(), 3);
        assert_eq!(pool.failed_gets() - before, 40);

        pool.put(7).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_wakes_waiters() {
        let pool = Arc::new(BufferPool::<u32>::new(2, 2).unwrap());
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(pool.close());
        assert!(!pool.close());
        assert_eq!(waiter.await.unwrap(), Err(CrawlerError::ClosedBufferPool));
        assert_eq!(pool.put(1).await, Err(CrawlerError::ClosedBufferPool));
        assert!(pool.stats().closed);
    }

    #[tokio::test]
    async fn test_total_matches_puts_minus_gets_under_concurrency() {
        let pool = Arc::new(BufferPool::new(4, 4).unwrap());
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let pool = Arc::clone(&pool);
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    pool.put(p * 100 + i).await.unwrap();
                }
            }));
        }
        let consumer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..90 {
                    seen.push(pool.get().await.unwrap());
                }
                seen
            })
        };
        for producer in producers {
            producer.await.unwrap();
        }
        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 90);
        assert_eq!(pool.total(), 10);
    }
}
