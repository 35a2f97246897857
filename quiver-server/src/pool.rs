//! Size-tiered buffer pool and the pooled payload builder.
//!
//! Inbound payloads above the pooling threshold are read into buffers
//! borrowed from a pool and returned when the payload is released. Small
//! payloads fall back to zero-copy slices of the frame body.

use bytes::{Buf, Bytes};
use quiver_codec::payload::{Payload, PayloadBuilder};
use quiver_codec::CodecError;
use std::sync::{Arc, Mutex, OnceLock};

/// Payloads at or below this size are not worth pooling.
pub const POOLING_THRESHOLD: usize = 1 << 10;

/// Buffer capacities the pool hands out. Requests are rounded up to the
/// nearest tier; larger requests bypass the pool.
const POOL_TIERS: [usize; 6] = [256, 4 << 10, 16 << 10, 64 << 10, 256 << 10, 1 << 20];

/// Retained buffers per tier.
const MAX_POOLED_PER_TIER: usize = 32;

struct Tier {
    size: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

/// A pool of reusable byte buffers, bucketed by capacity.
pub struct BufferPool {
    tiers: Vec<Tier>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            tiers: POOL_TIERS
                .iter()
                .map(|&size| Tier {
                    size,
                    buffers: Mutex::new(Vec::new()),
                })
                .collect(),
        }
    }

    /// The shared process-wide pool.
    pub fn shared() -> Arc<BufferPool> {
        static SHARED: OnceLock<Arc<BufferPool>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(BufferPool::new())))
    }

    /// Returns a zeroed buffer of exactly `size` bytes.
    pub fn get(&self, size: usize) -> Vec<u8> {
        match self.tiers.iter().find(|tier| tier.size >= size) {
            Some(tier) => {
                let mut buf = tier
                    .buffers
                    .lock()
                    .unwrap()
                    .pop()
                    .unwrap_or_else(|| Vec::with_capacity(tier.size));
                buf.resize(size, 0);
                buf
            }
            None => vec![0; size],
        }
    }

    /// Returns a buffer to the pool. Buffers that fit no tier, or whose tier
    /// is full, are dropped.
    pub fn put(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if let Some(tier) = self.tiers.iter().rev().find(|tier| tier.size <= capacity) {
            let mut buffers = tier.buffers.lock().unwrap();
            if buffers.len() < MAX_POOLED_PER_TIER {
                buf.clear();
                buffers.push(buf);
            }
        }
    }

    #[cfg(test)]
    fn pooled_count(&self) -> usize {
        self.tiers
            .iter()
            .map(|tier| tier.buffers.lock().unwrap().len())
            .sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("tiers", &POOL_TIERS)
            .finish()
    }
}

/// Payload builder that borrows from a [`BufferPool`] for large payloads and
/// falls back to slicing for small ones.
#[derive(Debug)]
pub struct PooledPayloadBuilder {
    pool: Arc<BufferPool>,
}

impl PooledPayloadBuilder {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        PooledPayloadBuilder { pool }
    }
}

impl PayloadBuilder for PooledPayloadBuilder {
    fn make(&self, src: &mut Bytes, len: usize) -> Result<Option<Payload>, CodecError> {
        if len == 0 {
            return Ok(None);
        }
        if src.remaining() < len {
            return Err(CodecError::DataExceedsPacket);
        }
        if len <= POOLING_THRESHOLD {
            return Ok(Some(Payload::from_bytes(src.copy_to_bytes(len))));
        }

        let mut buf = self.pool.get(len);
        src.copy_to_slice(&mut buf[..len]);
        let pool = Arc::clone(&self.pool);
        Ok(Some(Payload::pooled(buf, len, move |buf| pool.put(buf))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_get_put_reuses_buffers() {
        let pool = BufferPool::new();
        let buf = pool.get(1000);
        assert_eq!(buf.len(), 1000);
        let capacity = buf.capacity();
        assert!(capacity >= 4 << 10);

        pool.put(buf);
        assert_eq!(pool.pooled_count(), 1);

        let again = pool.get(2000);
        assert_eq!(again.len(), 2000);
        assert_eq!(again.capacity(), capacity);
        assert_eq!(pool.pooled_count(), 0);
    }

    #[test]
    fn test_pool_oversized_requests_bypass() {
        let pool = BufferPool::new();
        let buf = pool.get(2 << 20);
        assert_eq!(buf.len(), 2 << 20);
        pool.put(buf);
        // Fits the 1 MiB tier since capacity exceeds it.
        assert_eq!(pool.pooled_count(), 1);
    }

    #[test]
    fn test_pooled_builder_small_payload_is_sliced() {
        let pool = Arc::new(BufferPool::new());
        let builder = PooledPayloadBuilder::new(Arc::clone(&pool));
        let mut src = Bytes::from_static(b"small");
        let payload = builder.make(&mut src, 5).unwrap().unwrap();
        assert_eq!(payload.as_slice(), b"small");
        drop(payload);
        assert_eq!(pool.pooled_count(), 0);
    }

    #[test]
    fn test_pooled_builder_large_payload_returns_to_pool() {
        let pool = Arc::new(BufferPool::new());
        let builder = PooledPayloadBuilder::new(Arc::clone(&pool));
        let data = vec![0xabu8; POOLING_THRESHOLD + 1];
        let mut src = Bytes::from(data.clone());
        let payload = builder.make(&mut src, data.len()).unwrap().unwrap();
        assert_eq!(payload.as_slice(), &data[..]);
        assert_eq!(pool.pooled_count(), 0);

        drop(payload);
        assert_eq!(pool.pooled_count(), 1);
    }

    #[test]
    fn test_pooled_builder_zero_length_is_none() {
        let builder = PooledPayloadBuilder::new(Arc::new(BufferPool::new()));
        let mut src = Bytes::new();
        assert!(builder.make(&mut src, 0).unwrap().is_none());
    }

    #[test]
    fn test_pooled_builder_short_source_fails() {
        let builder = PooledPayloadBuilder::new(Arc::new(BufferPool::new()));
        let mut src = Bytes::from_static(b"ab");
        let result = builder.make(&mut src, 10);
        assert!(matches!(result, Err(CodecError::DataExceedsPacket)));
    }
}
