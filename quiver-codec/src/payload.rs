//! Opaque payload carriers.
//!
//! A payload is the raw byte tail of a Publish or PubAck frame. Two concrete
//! shapes exist: a zero-copy slice of the decoded frame body, and a pooled
//! buffer with a release hook that returns it to its pool. The hook runs when
//! the payload is dropped, so release happens exactly once and a released
//! payload cannot be observed.

use crate::error::CodecError;
use bytes::{Buf, Bytes};
use std::fmt;

type ReleaseFn = Box<dyn FnOnce(Vec<u8>) + Send + Sync>;

enum Repr {
    Shared(Bytes),
    Pooled {
        buf: Option<Vec<u8>>,
        len: usize,
        release: Option<ReleaseFn>,
    },
}

/// An opaque byte carrier trailing a Publish or PubAck body.
pub struct Payload {
    repr: Repr,
}

impl Payload {
    /// Wraps an owned byte slice.
    pub fn from_bytes(data: Bytes) -> Self {
        Payload {
            repr: Repr::Shared(data),
        }
    }

    /// Wraps a pooled buffer; `release` runs with the buffer when the payload
    /// is dropped.
    pub fn pooled(buf: Vec<u8>, len: usize, release: impl FnOnce(Vec<u8>) + Send + Sync + 'static) -> Self {
        Payload {
            repr: Repr::Pooled {
                buf: Some(buf),
                len,
                release: Some(Box::new(release)),
            },
        }
    }

    /// Read-only view of the payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        match &self.repr {
            Repr::Shared(data) => data,
            Repr::Pooled { buf: Some(buf), len, .. } => &buf[..*len],
            Repr::Pooled { buf: None, .. } => &[],
        }
    }

    /// Copies (or cheaply clones) the payload into a `Bytes`.
    pub fn to_bytes(&self) -> Bytes {
        match &self.repr {
            Repr::Shared(data) => data.clone(),
            Repr::Pooled { .. } => Bytes::copy_from_slice(self.as_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Repr::Pooled { buf, release, .. } = &mut self.repr {
            if let (Some(buf), Some(release)) = (buf.take(), release.take()) {
                release(buf);
            }
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.len()).finish()
    }
}

/// Builds a payload from exactly `len` bytes of a frame body.
///
/// Implementations must consume exactly `len` bytes; a source shorter than
/// `len` is an error. `len == 0` yields no payload.
pub trait PayloadBuilder: Send + Sync {
    fn make(&self, src: &mut Bytes, len: usize) -> Result<Option<Payload>, CodecError>;
}

/// Builder that slices the decoded frame body without copying.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlicePayloadBuilder;

impl PayloadBuilder for SlicePayloadBuilder {
    fn make(&self, src: &mut Bytes, len: usize) -> Result<Option<Payload>, CodecError> {
        if len == 0 {
            return Ok(None);
        }
        if src.remaining() < len {
            return Err(CodecError::DataExceedsPacket);
        }
        Ok(Some(Payload::from_bytes(src.copy_to_bytes(len))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_slice_builder_zero_length_is_none() {
        let mut src = Bytes::from_static(b"data");
        let payload = SlicePayloadBuilder.make(&mut src, 0).unwrap();
        assert!(payload.is_none());
        assert_eq!(src.len(), 4);
    }

    #[test]
    fn test_slice_builder_consumes_exactly_len() {
        let mut src = Bytes::from_static(b"abcdef");
        let payload = SlicePayloadBuilder.make(&mut src, 4).unwrap().unwrap();
        assert_eq!(payload.as_slice(), b"abcd");
        assert_eq!(&src[..], b"ef");
    }

    #[test]
    fn test_slice_builder_short_source_fails() {
        let mut src = Bytes::from_static(b"ab");
        let result = SlicePayloadBuilder.make(&mut src, 4);
        assert!(matches!(result, Err(CodecError::DataExceedsPacket)));
    }

    #[test]
    fn test_pooled_release_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let payload = Payload::pooled(vec![1, 2, 3, 4], 3, move |buf| {
            assert_eq!(buf.len(), 4);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(payload.as_slice(), &[1, 2, 3]);
        drop(payload);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_equality_across_shapes() {
        let shared = Payload::from_bytes(Bytes::from_static(b"abc"));
        let pooled = Payload::pooled(b"abc".to_vec(), 3, |_| {});
        assert_eq!(shared, pooled);
    }
}
