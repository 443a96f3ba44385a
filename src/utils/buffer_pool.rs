//! # Buffer Pool
//!
//! Object pool for the scratch buffers the pipeline hands to every stage invocation,
//! bounding allocation pressure under high message throughput.
//!
//! ## Contract
//! - `acquire()` never fails and never waits on other connections: an empty pool falls
//!   back to a fresh allocation
//! - Buffers come out empty with at least [`DEFAULT_BUFFER_CAPACITY`] bytes of capacity
//! - Dropping a [`PooledBuffer`] returns it; it is cleared on the way back, so nothing
//!   written by one connection is readable by the next user
//!
//! Pooling is purely a performance measure. Replacing the pool with plain `Vec`s would not
//! change any observable output.
//!
//! ## Usage
//! ```rust
//! use stagewire::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(4);
//! {
//!     let mut buffer = pool.acquire();
//!     buffer.extend_from_slice(b"scratch");
//! } // returned to the pool here
//! assert_eq!(pool.available(), 4);
//! ```

use std::sync::{Arc, Mutex};

/// Buffers that grew past this capacity are freed instead of pooled
const MAX_POOLED_BUFFER_SIZE: usize = 128 * 1024;

/// Capacity of freshly allocated buffers
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if self.buffer.capacity() <= MAX_POOLED_BUFFER_SIZE {
            self.buffer.clear();
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(std::mem::take(&mut self.buffer));
            }
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .finish()
    }
}

/// Thread-safe pool of scratch buffers, cheap to clone and share between workers
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    initial_capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool with `pool_size` preallocated buffers
    pub fn new(pool_size: usize) -> Self {
        let pool = (0..pool_size)
            .map(|_| Vec::with_capacity(DEFAULT_BUFFER_CAPACITY))
            .collect();

        Self {
            pool: Arc::new(Mutex::new(pool)),
            initial_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Acquire an empty buffer (or allocate a new one if the pool is empty)
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = match self.pool.lock() {
            Ok(mut pool) => pool.pop(),
            Err(_) => None,
        }
        .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity));

        PooledBuffer {
            buffer,
            pool: self.pool.clone(),
        }
    }

    /// Number of idle buffers in the pool
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let pool = BufferPool::new(10);
        assert_eq!(pool.available(), 10);

        let mut buf = pool.acquire();
        assert_eq!(pool.available(), 9);

        buf.push(42);
        assert_eq!(buf[0], 42);

        drop(buf);
        assert_eq!(pool.available(), 10);
    }

    #[test]
    fn test_buffer_pool_reuse_is_cleared() {
        let pool = BufferPool::new(1);

        {
            let mut buf1 = pool.acquire();
            buf1.extend_from_slice(b"secret from connection A");
        }

        let buf2 = pool.acquire();
        assert!(buf2.is_empty());
        assert!(buf2.capacity() >= DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_buffer_pool_empty_falls_back() {
        let pool = BufferPool::new(1);
        let _buf1 = pool.acquire();
        let buf2 = pool.acquire();

        assert_eq!(pool.available(), 0);
        assert!(buf2.capacity() >= DEFAULT_BUFFER_CAPACITY);
        drop(buf2);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_oversized_buffer_not_returned() {
        let pool = BufferPool::new(0);

        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(&vec![0u8; MAX_POOLED_BUFFER_SIZE + 1]);
        }

        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_shared_between_threads() {
        let pool = BufferPool::new(2);
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.extend_from_slice(&[i; 32]);
                        assert!(buf.iter().all(|&b| b == i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.available() >= 2);
    }
}
