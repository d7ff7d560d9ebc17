// ─── Error ──────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Malformed schema-definition bytes, invalid source text, or a
    /// fully-qualified name declared twice.
    #[error("parse error: {0}")]
    Parse(String),
    /// Precomputed index bytes failed to decode or point outside the body.
    #[error("corrupt precomputed index: {0}")]
    CorruptIndex(String),
    #[error("invalid {kind} index {index} (size {len})")]
    InvalidIndex {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    #[error("a precomputed index is already loaded")]
    AlreadyLoaded,
    #[error("no schema definitions were added")]
    EmptyBuilder,
    #[error("unrecognized descriptor: {0}")]
    UnknownDescriptor(String),
    /// The index lists a symbol the reflective pool can't resolve. Indicates a
    /// desync between the two, never bad user input.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl IndexError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        IndexError::Parse(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        IndexError::CorruptIndex(msg.into())
    }
}

/// Low-level wire decoding failure. Callers map it to `Parse` or
/// `CorruptIndex` depending on where the bytes came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated varint at byte {0}")]
    TruncatedVarint(usize),
    #[error("varint exceeds 10 bytes at byte {0}")]
    VarintOverflow(usize),
    #[error("length-delimited field of {len} bytes at byte {pos} exceeds buffer")]
    TruncatedField { pos: usize, len: usize },
    #[error("invalid wire type {wire_type} at byte {pos}")]
    InvalidWireType { pos: usize, wire_type: u8 },
    #[error("invalid field number 0 at byte {0}")]
    InvalidFieldNumber(usize),
    #[error("unbalanced group at byte {0}")]
    UnbalancedGroup(usize),
    #[error("invalid UTF-8 in string field at byte {0}")]
    InvalidUtf8(usize),
}

impl From<WireError> for IndexError {
    fn from(e: WireError) -> Self {
        IndexError::Parse(e.to_string())
    }
}
