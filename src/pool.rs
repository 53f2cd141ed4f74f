//! Object pooling for hot-path buffers.
//!
//! The bus fan-out borrows a scratch buffer per emit; pooling those
//! buffers keeps the dispatch path free of per-publish allocations.

use crossbeam::queue::SegQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Generic object pool backed by a lock-free queue.
///
/// `get` hands out a pooled object or builds a fresh one via the factory;
/// the RAII guard returns the object when dropped, after its user is done
/// with it. Safe to draw from concurrently.
pub struct ObjectPool<T> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    slots: SegQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_size: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<T> ObjectPool<T> {
    /// Create a pool holding at most `max_size` idle objects.
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let slots = SegQueue::new();

        let initial_size = std::cmp::min(max_size / 4, 16);
        for _ in 0..initial_size {
            slots.push(factory());
        }

        Self {
            inner: Arc::new(PoolInner {
                slots,
                factory: Box::new(factory),
                max_size,
                hits: AtomicUsize::new(0),
                misses: AtomicUsize::new(0),
            }),
        }
    }

    /// Get an object from the pool or create a new one.
    pub fn get(&self) -> PooledObject<T> {
        let object = match self.inner.slots.pop() {
            Some(object) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                object
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                (self.inner.factory)()
            }
        };
        PooledObject {
            object: Some(object),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        PoolStats {
            hits,
            misses,
            hit_ratio: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
            pool_size: self.inner.slots.len(),
            max_size: self.inner.max_size,
        }
    }
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// RAII wrapper that returns its object to the pool on drop.
pub struct PooledObject<T> {
    object: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T> Drop for PooledObject<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            // A full pool just drops the surplus object.
            if self.pool.slots.len() < self.pool.max_size {
                self.pool.slots.push(object);
            }
        }
    }
}

impl<T> std::ops::Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.object.as_ref().unwrap()
    }
}

impl<T> std::ops::DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.object.as_mut().unwrap()
    }
}

/// Point-in-time pool usage counters.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub hits: usize,
    pub misses: usize,
    pub hit_ratio: f64,
    pub pool_size: usize,
    pub max_size: usize,
}
