use crate::error::IndexError;
use crate::types::{BufferId, FileSpan};
use bytes::Bytes;

/// Owns every buffer a loaded index points into.
///
/// File entries hold `(buffer, offset, len)` triples instead of addresses.
/// Buffers are reference counted, so a span stays valid for as long as any
/// clone of the arena is alive.
#[derive(Debug, Clone, Default)]
pub struct BufferArena {
    buffers: Vec<Bytes>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain a buffer and return its id.
    pub fn retain(&mut self, buffer: Bytes) -> BufferId {
        self.buffers.push(buffer);
        self.buffers.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total retained bytes.
    pub fn byte_len(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    /// Check that `span` lies inside its buffer.
    pub fn check(&self, span: FileSpan) -> Result<(), IndexError> {
        let buffer = self
            .buffers
            .get(span.buffer)
            .ok_or_else(|| IndexError::corrupt(format!("unknown buffer {}", span.buffer)))?;
        match span.offset.checked_add(span.len) {
            Some(end) if end <= buffer.len() => Ok(()),
            _ => Err(IndexError::corrupt(format!(
                "span {}+{} exceeds buffer of {} bytes",
                span.offset,
                span.len,
                buffer.len()
            ))),
        }
    }

    /// Borrow the bytes of `span`. Spans are validated when an index is
    /// built, so `None` means the span came from a different arena.
    #[inline]
    pub fn slice(&self, span: FileSpan) -> Option<&[u8]> {
        let buffer = self.buffers.get(span.buffer)?;
        buffer.get(span.offset..span.offset.checked_add(span.len)?)
    }
}
