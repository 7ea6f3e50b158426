//! Byte views and growable buffers.
//!
//! `ByteView` is a borrowed window into bytes owned elsewhere; the borrow
//! checker enforces that a view never outlives its buffer. `GrowableBuffer`
//! is the single owned, append-only byte buffer used by the parsers and the
//! response sender.

use bytes::{Buf, BytesMut};
use std::fmt;
use std::ops::{Deref, DerefMut, Range};

/// Zero-copy view into a caller-owned byte buffer.
///
/// Every slicing or trimming operation returns a new view over the same
/// storage.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteView<'a> {
    data: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Position of the first occurrence of `byte`.
    pub fn find(&self, byte: u8) -> Option<usize> {
        memchr::memchr(byte, self.data)
    }

    /// Position of the first occurrence of `needle`.
    pub fn find_slice(&self, needle: &[u8]) -> Option<usize> {
        memchr::memmem::find(self.data, needle)
    }

    /// Sub-view over `range`. Out-of-range bounds are clamped.
    pub fn slice(&self, range: Range<usize>) -> ByteView<'a> {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        ByteView::new(&self.data[start..end])
    }

    pub fn skip(&self, n: usize) -> ByteView<'a> {
        self.slice(n..self.data.len())
    }

    /// Splits at the first `byte`, dropping the separator.
    pub fn split_once(&self, byte: u8) -> Option<(ByteView<'a>, ByteView<'a>)> {
        let pos = self.find(byte)?;
        Some((self.slice(0..pos), self.skip(pos + 1)))
    }

    /// Leading spaces and tabs removed.
    pub fn trim_start(&self) -> ByteView<'a> {
        let start = self
            .data
            .iter()
            .position(|b| *b != b' ' && *b != b'\t')
            .unwrap_or(self.data.len());
        self.skip(start)
    }

    /// Trailing spaces and tabs removed.
    pub fn trim_end(&self) -> ByteView<'a> {
        let end = self
            .data
            .iter()
            .rposition(|b| *b != b' ' && *b != b'\t')
            .map_or(0, |p| p + 1);
        self.slice(0..end)
    }

    pub fn trim(&self) -> ByteView<'a> {
        self.trim_start().trim_end()
    }

    /// Drops a single trailing `\r`, if present.
    pub fn strip_cr(&self) -> ByteView<'a> {
        match self.data.last() {
            Some(b'\r') => self.slice(0..self.data.len() - 1),
            _ => *self,
        }
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.data.starts_with(prefix)
    }

    pub fn eq_ignore_ascii_case(&self, other: &[u8]) -> bool {
        self.data.eq_ignore_ascii_case(other)
    }

    /// Splits on every `byte`, yielding views.
    pub fn split(&self, byte: u8) -> impl Iterator<Item = ByteView<'a>> + 'a {
        self.data.split(move |b| *b == byte).map(ByteView::new)
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.data).into_owned()
    }
}

impl<'a> From<&'a [u8]> for ByteView<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

impl<'a> From<&'a str> for ByteView<'a> {
    fn from(data: &'a str) -> Self {
        Self::new(data.as_bytes())
    }
}

impl fmt::Debug for ByteView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(self.data))
    }
}

/// Owned, contiguous, resizable byte buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GrowableBuffer {
    inner: BytesMut,
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Grows (zero-filled) or shrinks to `len`; contents up to the smaller
    /// length are preserved.
    pub fn resize(&mut self, len: usize) {
        self.inner.resize(len, 0);
    }

    /// Overwrites `range` with `value`. Bounds are clamped to the buffer.
    pub fn fill(&mut self, range: Range<usize>, value: u8) {
        let end = range.end.min(self.inner.len());
        let start = range.start.min(end);
        self.inner[start..end].fill(value);
    }

    /// Removes the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.inner.len());
        self.inner.advance(n);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn view(&self) -> ByteView<'_> {
        ByteView::new(&self.inner)
    }
}

impl Deref for GrowableBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl DerefMut for GrowableBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.inner
    }
}

impl From<&[u8]> for GrowableBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(data),
        }
    }
}

impl fmt::Debug for GrowableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableBuffer")
            .field("len", &self.inner.len())
            .finish()
    }
}
