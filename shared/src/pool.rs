//! Lock-free object pool for hot-path allocation avoidance
//!
//! Items are handed out as [`Pooled`] guards. Dropping a guard resets the item
//! through [`Recycle`] and pushes it back into the pool, so an item is
//! returned exactly once on every exit path, unwinding included. When the pool
//! is empty a new item is built with the pool's constructor; when it is full
//! on release the item is simply dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Resets an item before it goes back into a pool
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for BytesMut {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl Recycle for Vec<u8> {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// Counters describing how well a pool is absorbing allocations
#[derive(Debug, Default)]
pub struct PoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
}

impl PoolMetrics {
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

pub struct Pool<T> {
    queue: ArrayQueue<T>,
    init: Box<dyn Fn() -> T + Send + Sync>,
    metrics: PoolMetrics,
}

impl<T: Recycle> Pool<T> {
    /// Creates an empty pool holding at most `capacity` idle items
    pub fn new<F>(capacity: usize, init: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Arc::new(Self {
            queue: ArrayQueue::new(capacity.max(1)),
            init: Box::new(init),
            metrics: PoolMetrics::default(),
        })
    }

    /// Takes an idle item, or builds a new one if none is available
    #[inline]
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let item = match self.queue.pop() {
            Some(item) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                (self.init)()
            }
        };
        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut item: T) {
        item.recycle();
        if self.queue.push(item).is_ok() {
            self.metrics.returns.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Idle items currently held
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

/// An item on loan from a [`Pool`]
pub struct Pooled<T: Recycle> {
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Recycle> Pooled<T> {
    /// Drops the item instead of returning it to the pool
    pub fn discard(mut self) {
        self.item = None;
    }
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `discard` and `drop` take the item, and both consume the guard.
        self.item.as_ref().expect("pooled item present until drop")
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item present until drop")
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_miss_then_hit() {
        let pool = Pool::new(4, || BytesMut::with_capacity(64));

        let buf = pool.acquire();
        drop(buf);
        assert_eq!(pool.available(), 1);

        let _buf = pool.acquire();
        let snapshot = pool.metrics().snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.returns, 1);
    }

    #[test]
    fn test_release_recycles_contents() {
        let pool = Pool::new(1, || BytesMut::with_capacity(64));

        let mut buf = pool.acquire();
        buf.extend_from_slice(b"first datagram");
        let capacity = buf.capacity();
        drop(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_discard_does_not_return() {
        let pool = Pool::new(2, Vec::<u8>::new);

        let buf = pool.acquire();
        buf.discard();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.metrics().snapshot().returns, 0);
    }

    #[test]
    fn test_full_pool_drops_extra_items() {
        let pool = Pool::new(1, Vec::<u8>::new);

        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);

        assert_eq!(pool.available(), 1);
        let snapshot = pool.metrics().snapshot();
        assert_eq!(snapshot.returns, 1);
        assert_eq!(snapshot.drops, 1);
    }

    #[test]
    fn test_release_on_unwind() {
        let pool = Pool::new(1, Vec::<u8>::new);

        let pool_ref = Arc::clone(&pool);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut buf = pool_ref.acquire();
            buf.push(1u8);
            panic!("handler failure");
        }));

        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Pool::new(16, || BytesMut::with_capacity(128));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.extend_from_slice(&[i as u8; 32]);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = pool.metrics().snapshot();
        assert_eq!(snapshot.hits + snapshot.misses, 8 * 500);
        assert!(pool.available() <= 16);
    }
}
