//! Reusable per-connection read buffers.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Buffers grown past this multiple of the initial capacity are not pooled.
const MAX_GROWTH_FACTOR: usize = 16;

/// Pool of read buffers handed out at accept and returned on teardown.
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    capacity: usize,
    max_pooled: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of `capacity` bytes and keeping at
    /// most `max_pooled` idle buffers.
    pub fn new(capacity: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            capacity,
            max_pooled,
        }
    }

    /// Take an empty buffer, reusing a pooled one when available.
    pub fn acquire(&self) -> BytesMut {
        self.buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.capacity))
    }

    /// Return a buffer. Oversized buffers are dropped to cap retained memory.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.capacity.saturating_mul(MAX_GROWTH_FACTOR) {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    /// Number of idle pooled buffers.
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn acquire_fresh_buffer() {
        let pool = BufferPool::new(1024, 4);
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 1024);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn released_buffer_is_reused_empty() {
        let pool = BufferPool::new(64, 4);
        let mut buf = pool.acquire();
        buf.put_slice(b"leftover");
        pool.release(buf);
        assert_eq!(pool.available(), 1);

        let again = pool.acquire();
        assert!(again.is_empty());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = BufferPool::new(64, 2);
        for _ in 0..5 {
            pool.release(BytesMut::with_capacity(64));
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn oversized_buffer_not_pooled() {
        let pool = BufferPool::new(64, 4);
        pool.release(BytesMut::with_capacity(64 * 1024));
        assert_eq!(pool.available(), 0);
    }
}
