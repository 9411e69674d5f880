use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Size of the scratch buffer used for streaming copies
pub const BUFFER_SIZE: usize = 8192;

/// Pool of fixed-size scratch buffers shared by concurrent transcodes.
///
/// A buffer is checked out for the duration of one entry copy and goes
/// back to the pool when its [`PooledBuffer`] guard is dropped.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Box<[u8]>>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_buffer_size(BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Take a buffer from the pool, allocating one if the pool is empty
    pub fn checkout(&self) -> PooledBuffer<'_> {
        let buffer = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice());
        PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.buffers.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn release(&self, buffer: Box<[u8]>) {
        // A poisoned pool just stops recycling
        if let Ok(mut free) = self.buffers.lock() {
            free.push(buffer);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped checkout of a [`BufferPool`] buffer
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<Box<[u8]>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returns_on_drop() {
        let pool = BufferPool::new();
        assert_eq!(pool.idle(), 0);
        {
            let buf = pool.checkout();
            assert_eq!(buf.len(), BUFFER_SIZE);
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);

        let _a = pool.checkout();
        let _b = pool.checkout();
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_buffer_returns_on_early_exit() {
        fn fails(pool: &BufferPool) -> Result<(), ()> {
            let mut buf = pool.checkout();
            buf[0] = 1;
            Err(())
        }

        let pool = BufferPool::with_buffer_size(16);
        assert!(fails(&pool).is_err());
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.checkout().len(), 16);
    }
}
