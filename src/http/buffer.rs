//! Read-only, bounds-checked view over a transport-owned byte region.
//!
//! # Design Decisions
//! - The view never copies; every accessor hands back a sub-slice of the
//!   caller's buffer
//! - Positions are stored as [`Span`]s (offset + length) so a parsed layout can
//!   outlive the borrow and be re-attached to the same bytes later

/// Offset/length pair addressing bytes inside a [`BufferView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: u32,
    pub len: u32,
}

impl Span {
    /// The empty span. Used as the "absent" marker for optional fields.
    pub const EMPTY: Span = Span { offset: 0, len: 0 };

    pub fn new(offset: usize, len: usize) -> Self {
        Self {
            offset: offset as u32,
            len: len as u32,
        }
    }

    /// Span covering `start..end`.
    pub fn between(start: usize, end: usize) -> Self {
        Self::new(start, end.saturating_sub(start))
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.offset as usize + self.len as usize
    }
}

/// Immutable view over a caller-owned chunk.
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    bytes: &'a [u8],
}

impl<'a> BufferView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `index`, or `None` past the end of the region.
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Bytes addressed by `span`, or `None` if the span leaves the region.
    pub fn slice(&self, span: Span) -> Option<&'a [u8]> {
        self.bytes.get(span.offset as usize..span.end())
    }

    /// Like [`slice`](Self::slice) but treats an empty span as absent.
    pub fn field(&self, span: Span) -> Option<&'a [u8]> {
        if span.is_empty() {
            return None;
        }
        self.slice(span)
    }

    /// Bytes from `start` to the end of the region.
    pub fn tail(&self, start: usize) -> &'a [u8] {
        self.bytes.get(start..).unwrap_or(&[])
    }

    /// Position of the first `needle` at or after `from`, bounded by the region.
    pub fn find(&self, from: usize, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || from >= self.bytes.len() {
            return None;
        }
        self.bytes[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + from)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}
