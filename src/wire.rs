//! Protobuf wire-format primitives.
//!
//! Only what the scanner and the index codec need: varints, tags,
//! length-delimited payloads and skipping of everything else. Reads never
//! copy; length-delimited payloads are returned as sub-slices of the input.

use crate::error::WireError;

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_START_GROUP: u8 = 3;
pub const WIRE_END_GROUP: u8 = 4;
pub const WIRE_FIXED32: u8 = 5;

/// u64 needs at most 10 bytes.
pub const MAX_VARINT_BYTES: usize = 10;

const MAX_GROUP_DEPTH: usize = 64;

// ─── Reader ─────────────────────────────────────────────────────────────────

/// Cursor over one encoded message.
#[derive(Debug, Clone, Copy)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift = 0;
        let mut i = 0;

        while i < MAX_VARINT_BYTES {
            let Some(&byte) = self.buf.get(start + i) else {
                return Err(WireError::TruncatedVarint(start));
            };
            result |= ((byte & 0x7F) as u64) << shift;
            i += 1;
            if byte & 0x80 == 0 {
                self.pos = start + i;
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarintOverflow(start))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        // Protobuf truncates oversized varints for 32-bit fields.
        Ok(self.read_varint()? as u32)
    }

    /// Read a field key. Returns `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> Result<(u32, u8), WireError> {
        let pos = self.pos;
        let key = self.read_varint()?;
        let wire_type = (key & 0x7) as u8;
        let field = (key >> 3) as u32;
        if field == 0 {
            return Err(WireError::InvalidFieldNumber(pos));
        }
        if wire_type > WIRE_FIXED32 {
            return Err(WireError::InvalidWireType { pos, wire_type });
        }
        Ok((field, wire_type))
    }

    /// Read a length-delimited payload (zero-copy).
    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let (start, len) = self.read_span()?;
        Ok(&self.buf[start..start + len])
    }

    /// Read a length-delimited payload and return its `(offset, len)` within
    /// the reader's buffer instead of the bytes.
    pub fn read_span(&mut self) -> Result<(usize, usize), WireError> {
        let len = self.read_varint()? as usize;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::TruncatedField { pos: start, len })?;
        self.pos = end;
        Ok((start, len))
    }

    pub fn read_str(&mut self) -> Result<&'a str, WireError> {
        let pos = self.pos;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8(pos))
    }

    fn advance(&mut self, n: usize) -> Result<(), WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::TruncatedField { pos: self.pos, len: n })?;
        self.pos = end;
        Ok(())
    }

    /// Skip the value of a field whose tag was just read.
    pub fn skip(&mut self, field: u32, wire_type: u8) -> Result<(), WireError> {
        self.skip_inner(field, wire_type, 0)
    }

    fn skip_inner(&mut self, field: u32, wire_type: u8, depth: usize) -> Result<(), WireError> {
        match wire_type {
            WIRE_VARINT => self.read_varint().map(|_| ()),
            WIRE_FIXED64 => self.advance(8),
            WIRE_LEN => self.read_span().map(|_| ()),
            WIRE_FIXED32 => self.advance(4),
            WIRE_START_GROUP => {
                if depth >= MAX_GROUP_DEPTH {
                    return Err(WireError::UnbalancedGroup(self.pos));
                }
                loop {
                    if self.is_empty() {
                        return Err(WireError::UnbalancedGroup(self.pos));
                    }
                    let (inner, inner_type) = self.read_tag()?;
                    if inner_type == WIRE_END_GROUP {
                        if inner != field {
                            return Err(WireError::UnbalancedGroup(self.pos));
                        }
                        return Ok(());
                    }
                    self.skip_inner(inner, inner_type, depth + 1)?;
                }
            }
            WIRE_END_GROUP => Err(WireError::UnbalancedGroup(self.pos)),
            other => Err(WireError::InvalidWireType {
                pos: self.pos,
                wire_type: other,
            }),
        }
    }

    /// Read a repeated `uint32` field value: either one varint or a packed
    /// run, depending on the wire type. Values are appended to `out`.
    pub fn read_repeated_u32(&mut self, wire_type: u8, out: &mut Vec<usize>) -> Result<(), WireError> {
        match wire_type {
            WIRE_VARINT => {
                out.push(self.read_u32()? as usize);
                Ok(())
            }
            WIRE_LEN => {
                let mut packed = WireReader::new(self.read_bytes()?);
                while !packed.is_empty() {
                    out.push(packed.read_u32()? as usize);
                }
                Ok(())
            }
            other => Err(WireError::InvalidWireType {
                pos: self.pos,
                wire_type: other,
            }),
        }
    }
}

// ─── Writer ─────────────────────────────────────────────────────────────────

#[inline]
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        } else {
            buf.push(byte | 0x80);
        }
    }
}

#[inline]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

#[inline]
pub fn write_tag(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    encode_varint(((field as u64) << 3) | wire_type as u64, buf);
}

#[inline]
pub fn write_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    write_tag(buf, field, WIRE_VARINT);
    encode_varint(value, buf);
}

#[inline]
pub fn write_bytes_field(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    write_tag(buf, field, WIRE_LEN);
    encode_varint(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

#[inline]
pub fn write_str_field(buf: &mut Vec<u8>, field: u32, value: &str) {
    write_bytes_field(buf, field, value.as_bytes());
}

/// Packed repeated varints. Empty runs are omitted entirely.
pub fn write_packed_field(buf: &mut Vec<u8>, field: u32, values: &[usize]) {
    if values.is_empty() {
        return;
    }
    let payload_len: usize = values.iter().map(|v| varint_len(*v as u64)).sum();
    write_tag(buf, field, WIRE_LEN);
    encode_varint(payload_len as u64, buf);
    for v in values {
        encode_varint(*v as u64, buf);
    }
}

/// Write a nested message built by `f` as a length-delimited field.
pub fn write_message_field(buf: &mut Vec<u8>, field: u32, f: impl FnOnce(&mut Vec<u8>)) {
    let mut nested = Vec::new();
    f(&mut nested);
    write_bytes_field(buf, field, &nested);
}
