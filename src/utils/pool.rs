//! # Object Pool
//!
//! Generic checkout/return pool for reusable stateful objects such as compressor and
//! decompressor instances.
//!
//! A checked-out object is owned by exactly one [`Pooled`] guard, so no two workers can
//! see it at once. The pool does not reset objects; callers reset on checkout, and
//! objects left in an unknown state are removed with [`Pooled::discard`].

use std::sync::{Arc, Mutex};

/// A checked-out object that goes back to its pool on drop
pub struct Pooled<T> {
    item: Option<T>,
    pool: Arc<Mutex<Vec<T>>>,
    max_idle: usize,
}

impl<T> Pooled<T> {
    /// Drop the object instead of returning it to the pool
    pub fn discard(mut self) {
        self.item = None;
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            if let Ok(mut pool) = self.pool.lock() {
                if pool.len() < self.max_idle {
                    pool.push(item);
                }
            }
        }
    }
}

impl<T> std::ops::Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only `None` inside `discard` and `drop`
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> std::ops::DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

/// Thread-safe pool of reusable objects
pub struct ObjectPool<T> {
    idle: Arc<Mutex<Vec<T>>>,
    max_idle: usize,
}

impl<T> ObjectPool<T> {
    /// Create an empty pool that keeps at most `max_idle` returned objects
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Arc::new(Mutex::new(Vec::with_capacity(max_idle))),
            max_idle,
        }
    }

    /// Take an idle object, or build one with `make` when none is idle
    pub fn checkout<F>(&self, make: F) -> Pooled<T>
    where
        F: FnOnce() -> T,
    {
        let item = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        }
        .unwrap_or_else(make);

        Pooled {
            item: Some(item),
            pool: self.idle.clone(),
            max_idle: self.max_idle,
        }
    }

    /// Number of idle objects
    pub fn available(&self) -> usize {
        self.idle.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            idle: self.idle.clone(),
            max_idle: self.max_idle,
        }
    }
}
