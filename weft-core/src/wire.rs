//! Bounded structured wire codec with checkpoint/rollback.
//!
//! Payloads are sequences of tagged elements: scalar values, byte blobs,
//! and nestable containers. The writer enforces a hard byte budget and
//! can snapshot/restore its position, which is what allows callers to
//! undo a partially written, too-large element down to the byte.
//!
//! The element layout is an internal contract shared by the writer and
//! reader in this workspace; it is not an interoperability surface.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Element tag. Meaning is assigned by each message schema.
pub type Tag = u32;

const TYPE_CONTAINER_START: u8 = 0x01;
const TYPE_CONTAINER_END: u8 = 0x02;
const TYPE_U64: u8 = 0x03;
const TYPE_U32: u8 = 0x04;
const TYPE_BOOL: u8 = 0x05;
const TYPE_BYTES: u8 = 0x06;

/// Maximum byte-blob length encodable in one element.
pub const MAX_BLOB_LEN: usize = u16::MAX as usize;

/// Snapshot of a writer position for byte-exact rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    len: usize,
    depth: u16,
}

/// Bounded structured writer over a [`BytesMut`] buffer.
///
/// Every `put_*` either writes the whole element or fails with
/// [`WireError::NoMemory`] leaving the buffer untouched, so a failed
/// element never needs cleanup; rolling back to a [`Checkpoint`]
/// additionally undoes any number of fully written elements.
#[derive(Debug)]
pub struct WireWriter {
    buf: BytesMut,
    limit: usize,
    depth: u16,
}

impl WireWriter {
    /// Create a writer with a fresh buffer and the given byte budget.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { buf: BytesMut::with_capacity(limit), limit, depth: 0 }
    }

    /// Create a writer over a caller-supplied buffer.
    ///
    /// The budget covers the whole buffer including bytes already present.
    #[must_use]
    pub fn with_buffer(buf: BytesMut, limit: usize) -> Self {
        Self { buf, limit, depth: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.buf.len()
    }

    /// Bytes still available under the budget.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    /// Current container nesting depth.
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Snapshot the current position.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { len: self.buf.len(), depth: self.depth }
    }

    /// Restore a previously taken snapshot, discarding everything
    /// written after it.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        debug_assert!(checkpoint.len <= self.buf.len(), "rollback to a future position");
        self.buf.truncate(checkpoint.len);
        self.depth = checkpoint.depth;
    }

    /// Open a container element.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] if the budget is exhausted.
    pub fn start_container(&mut self, tag: Tag) -> WireResult<()> {
        self.ensure(1 + 4)?;
        self.buf.put_u8(TYPE_CONTAINER_START);
        self.buf.put_u32_le(tag);
        self.depth += 1;
        Ok(())
    }

    /// Close the innermost open container.
    ///
    /// # Errors
    /// Returns [`WireError::Nesting`] if no container is open, or
    /// [`WireError::NoMemory`] if the budget is exhausted.
    pub fn end_container(&mut self) -> WireResult<()> {
        if self.depth == 0 {
            return Err(WireError::nesting("end_container with no container open"));
        }
        self.ensure(1)?;
        self.buf.put_u8(TYPE_CONTAINER_END);
        self.depth -= 1;
        Ok(())
    }

    /// Write a tagged u64.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] if the budget is exhausted.
    pub fn put_u64(&mut self, tag: Tag, value: u64) -> WireResult<()> {
        self.ensure(1 + 4 + 8)?;
        self.buf.put_u8(TYPE_U64);
        self.buf.put_u32_le(tag);
        self.buf.put_u64_le(value);
        Ok(())
    }

    /// Write a tagged u32.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] if the budget is exhausted.
    pub fn put_u32(&mut self, tag: Tag, value: u32) -> WireResult<()> {
        self.ensure(1 + 4 + 4)?;
        self.buf.put_u8(TYPE_U32);
        self.buf.put_u32_le(tag);
        self.buf.put_u32_le(value);
        Ok(())
    }

    /// Write a tagged bool.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] if the budget is exhausted.
    pub fn put_bool(&mut self, tag: Tag, value: bool) -> WireResult<()> {
        self.ensure(1 + 4 + 1)?;
        self.buf.put_u8(TYPE_BOOL);
        self.buf.put_u32_le(tag);
        self.buf.put_u8(u8::from(value));
        Ok(())
    }

    /// Write a tagged byte blob.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] if the budget is exhausted or the
    /// blob exceeds [`MAX_BLOB_LEN`].
    pub fn put_bytes(&mut self, tag: Tag, value: &[u8]) -> WireResult<()> {
        if value.len() > MAX_BLOB_LEN {
            return Err(WireError::NoMemory { needed: value.len(), available: MAX_BLOB_LEN });
        }
        self.ensure(1 + 4 + 2 + value.len())?;
        self.buf.put_u8(TYPE_BYTES);
        self.buf.put_u32_le(tag);
        #[allow(clippy::cast_possible_truncation)]
        self.buf.put_u16_le(value.len() as u16);
        self.buf.put_slice(value);
        Ok(())
    }

    /// Finalize the writer, returning the serialized payload.
    ///
    /// # Errors
    /// Returns [`WireError::Nesting`] if containers are still open.
    pub fn finish(self) -> WireResult<Bytes> {
        if self.depth != 0 {
            return Err(WireError::nesting(format!("{} container(s) left open", self.depth)));
        }
        Ok(self.buf.freeze())
    }

    fn ensure(&mut self, bytes: usize) -> WireResult<()> {
        let available = self.remaining();
        if bytes > available {
            return Err(WireError::NoMemory { needed: bytes - available, available });
        }
        Ok(())
    }
}

/// A decoded scalar value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit unsigned integer.
    U32(u32),
    /// Boolean.
    Bool(bool),
    /// Byte blob.
    Bytes(Bytes),
}

impl WireValue {
    /// Get the value as u64, widening u32.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::U32(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a byte blob.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A decoded wire element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireElement {
    /// A container opened with the given tag.
    ContainerStart(Tag),
    /// The innermost container closed.
    ContainerEnd,
    /// A tagged scalar or blob.
    Value {
        /// Element tag.
        tag: Tag,
        /// Element value.
        value: WireValue,
    },
}

/// Streaming reader over a serialized payload.
#[derive(Debug)]
pub struct WireReader {
    buf: Bytes,
    pos: usize,
    depth: u16,
}

impl WireReader {
    /// Create a reader over a payload.
    #[must_use]
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0, depth: 0 }
    }

    /// Current container nesting depth.
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Decode the next element, or `None` at end of input.
    ///
    /// # Errors
    /// Returns [`WireError::Malformed`] on an unknown element type,
    /// [`WireError::UnexpectedEnd`] on truncated input, or
    /// [`WireError::Nesting`] if input ends inside an open container.
    pub fn next(&mut self) -> WireResult<Option<WireElement>> {
        if self.pos == self.buf.len() {
            if self.depth != 0 {
                return Err(WireError::nesting(format!(
                    "input ended with {} container(s) open",
                    self.depth
                )));
            }
            return Ok(None);
        }

        let start = self.pos;
        let element_type = self.take_u8()?;
        let element = match element_type {
            TYPE_CONTAINER_START => {
                let tag = self.take_u32()?;
                self.depth += 1;
                WireElement::ContainerStart(tag)
            },
            TYPE_CONTAINER_END => {
                if self.depth == 0 {
                    return Err(WireError::malformed(start, "container end with none open"));
                }
                self.depth -= 1;
                WireElement::ContainerEnd
            },
            TYPE_U64 => {
                let tag = self.take_u32()?;
                let value = self.take_u64()?;
                WireElement::Value { tag, value: WireValue::U64(value) }
            },
            TYPE_U32 => {
                let tag = self.take_u32()?;
                let value = self.take_u32()?;
                WireElement::Value { tag, value: WireValue::U32(value) }
            },
            TYPE_BOOL => {
                let tag = self.take_u32()?;
                let value = self.take_u8()?;
                WireElement::Value { tag, value: WireValue::Bool(value != 0) }
            },
            TYPE_BYTES => {
                let tag = self.take_u32()?;
                let len = self.take_u16()? as usize;
                if self.buf.len() - self.pos < len {
                    return Err(WireError::UnexpectedEnd { offset: self.pos });
                }
                let blob = self.buf.slice(self.pos..self.pos + len);
                self.pos += len;
                WireElement::Value { tag, value: WireValue::Bytes(blob) }
            },
            other => {
                return Err(WireError::malformed(start, format!("unknown element type {other:#x}")));
            },
        };
        Ok(Some(element))
    }

    fn take_u8(&mut self) -> WireResult<u8> {
        self.take_slice(1).map(|mut s| s.get_u8())
    }

    fn take_u16(&mut self) -> WireResult<u16> {
        self.take_slice(2).map(|mut s| s.get_u16_le())
    }

    fn take_u32(&mut self) -> WireResult<u32> {
        self.take_slice(4).map(|mut s| s.get_u32_le())
    }

    fn take_u64(&mut self) -> WireResult<u64> {
        self.take_slice(8).map(|mut s| s.get_u64_le())
    }

    fn take_slice(&mut self, len: usize) -> WireResult<Bytes> {
        if self.buf.len() - self.pos < len {
            return Err(WireError::UnexpectedEnd { offset: self.pos });
        }
        let slice = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let mut writer = WireWriter::new(256);
        writer.put_u64(1, 0xDEAD_BEEF_u64).unwrap();
        writer.put_u32(2, 77).unwrap();
        writer.put_bool(3, true).unwrap();
        writer.put_bytes(4, b"payload").unwrap();

        let mut reader = WireReader::new(writer.finish().unwrap());
        assert_eq!(
            reader.next().unwrap(),
            Some(WireElement::Value { tag: 1, value: WireValue::U64(0xDEAD_BEEF) })
        );
        assert_eq!(
            reader.next().unwrap(),
            Some(WireElement::Value { tag: 2, value: WireValue::U32(77) })
        );
        assert_eq!(
            reader.next().unwrap(),
            Some(WireElement::Value { tag: 3, value: WireValue::Bool(true) })
        );
        match reader.next().unwrap() {
            Some(WireElement::Value { tag: 4, value: WireValue::Bytes(b) }) => {
                assert_eq!(&b[..], b"payload");
            },
            other => panic!("unexpected element: {other:?}"),
        }
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_container_nesting_round_trip() {
        let mut writer = WireWriter::new(256);
        writer.start_container(10).unwrap();
        writer.put_u32(11, 1).unwrap();
        writer.start_container(12).unwrap();
        writer.put_u32(13, 2).unwrap();
        writer.end_container().unwrap();
        writer.end_container().unwrap();

        let mut reader = WireReader::new(writer.finish().unwrap());
        assert_eq!(reader.next().unwrap(), Some(WireElement::ContainerStart(10)));
        assert!(matches!(reader.next().unwrap(), Some(WireElement::Value { tag: 11, .. })));
        assert_eq!(reader.next().unwrap(), Some(WireElement::ContainerStart(12)));
        assert!(matches!(reader.next().unwrap(), Some(WireElement::Value { tag: 13, .. })));
        assert_eq!(reader.next().unwrap(), Some(WireElement::ContainerEnd));
        assert_eq!(reader.next().unwrap(), Some(WireElement::ContainerEnd));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_unbalanced_finish_fails() {
        let mut writer = WireWriter::new(256);
        writer.start_container(1).unwrap();
        assert!(matches!(writer.finish(), Err(WireError::Nesting { .. })));
    }

    #[test]
    fn test_budget_enforced_atomically() {
        let mut writer = WireWriter::new(16);
        writer.put_u64(1, 42).unwrap(); // 13 bytes
        let before = writer.written();
        let err = writer.put_u64(2, 43).unwrap_err();
        assert!(err.is_no_memory());
        // A failed element leaves the buffer untouched.
        assert_eq!(writer.written(), before);
    }

    #[test]
    fn test_checkpoint_rollback_is_byte_exact() {
        let mut writer = WireWriter::new(256);
        writer.start_container(1).unwrap();
        writer.put_u32(2, 7).unwrap();
        let checkpoint = writer.checkpoint();
        let len_before = writer.written();

        writer.start_container(3).unwrap();
        writer.put_bytes(4, &[0xAB; 32]).unwrap();
        writer.rollback(checkpoint);

        assert_eq!(writer.written(), len_before);
        writer.end_container().unwrap();
        let payload = writer.finish().unwrap();

        let mut reader = WireReader::new(payload);
        assert_eq!(reader.next().unwrap(), Some(WireElement::ContainerStart(1)));
        assert!(matches!(reader.next().unwrap(), Some(WireElement::Value { tag: 2, .. })));
        assert_eq!(reader.next().unwrap(), Some(WireElement::ContainerEnd));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_reader_rejects_truncated_input() {
        let mut writer = WireWriter::new(64);
        writer.put_bytes(1, b"0123456789").unwrap();
        let payload = writer.finish().unwrap();
        let truncated = payload.slice(..payload.len() - 4);

        let mut reader = WireReader::new(truncated);
        assert!(matches!(reader.next(), Err(WireError::UnexpectedEnd { .. })));
    }

    #[test]
    fn test_reader_rejects_unknown_type() {
        let mut reader = WireReader::new(Bytes::from_static(&[0x7F]));
        assert!(matches!(reader.next(), Err(WireError::Malformed { .. })));
    }
}
