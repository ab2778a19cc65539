//! Buffer recycling for send and receive paths.
//!
//! Correctness must hold identically whether pooling is enabled or a plain
//! allocator is used; the pool only exists to curb allocation churn where
//! datagrams are encoded and decoded at high rates.

/// A free list of reusable byte buffers of one size class.
pub struct BufferPool {
    pool: Vec<Vec<u8>>,
    /// Capacity newly allocated buffers start with.
    buffer_size: usize,
    /// Buffers kept beyond this count are dropped instead of pooled.
    max_pooled: usize,
}

impl BufferPool {
    /// Creates a pool handing out buffers of `buffer_size` capacity, keeping
    /// at most `max_pooled` returned buffers.
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self { pool: Vec::with_capacity(max_pooled), buffer_size, max_pooled }
    }

    /// Takes a cleared buffer from the pool, or allocates a fresh one.
    pub fn acquire(&mut self) -> Vec<u8> {
        self.pool.pop().unwrap_or_else(|| Vec::with_capacity(self.buffer_size))
    }

    /// Returns a buffer for reuse. Cleared before it is handed out again.
    pub fn release(&mut self, mut buffer: Vec<u8>) {
        if self.pool.len() < self.max_pooled {
            buffer.clear();
            self.pool.push(buffer);
        }
    }

    /// Number of buffers currently waiting in the pool.
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MTU, 256)
    }
}
