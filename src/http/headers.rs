//! Ordered header sets and the incremental header-block accumulator.
//!
//! The accumulator is shared by the request head, chunked trailers and
//! multipart part headers. It accepts arbitrary fragments, keeps any
//! partial line across calls, and reports the offset just past the blank
//! line that terminates the block.

use crate::http::buffer::{ByteView, GrowableBuffer};
use std::fmt;

/// Ordered `(name, value)` pairs. Lookup is case-insensitive and returns
/// the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping any existing entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces the first header called `name`, removing later duplicates,
    /// or appends it when absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(pos) => {
                self.entries[pos].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= pos || !n.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|pos| self.entries[pos].1.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes every header called `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// True when any `name` header lists `token` (comma/space separated,
    /// case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).any(|value| {
            value
                .split([',', ' ', '\t'])
                .any(|t| t.eq_ignore_ascii_case(token))
        })
    }

    pub fn extend(&mut self, other: HeaderSet) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// A header block grew past its size limit without ever terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOverflow {
    pub limit: usize,
}

impl fmt::Display for HeaderOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "header block exceeds {} bytes", self.limit)
    }
}

impl std::error::Error for HeaderOverflow {}

/// Incremental CRLF-line parser producing a [`HeaderSet`].
#[derive(Debug)]
pub struct HeaderAccumulator {
    pending: GrowableBuffer,
    headers: HeaderSet,
    start_line: Option<String>,
    wants_start_line: bool,
    malformed: Vec<String>,
    consumed: usize,
    limit: usize,
    complete: bool,
}

impl HeaderAccumulator {
    /// Accumulator for a plain header block (trailers, multipart parts).
    pub fn new(limit: usize) -> Self {
        Self {
            pending: GrowableBuffer::new(),
            headers: HeaderSet::new(),
            start_line: None,
            wants_start_line: false,
            malformed: Vec::new(),
            consumed: 0,
            limit,
            complete: false,
        }
    }

    /// Accumulator whose first non-empty line is a start line (the request
    /// line) rather than a header.
    pub fn with_start_line(limit: usize) -> Self {
        Self {
            wants_start_line: true,
            ..Self::new(limit)
        }
    }

    /// Feeds `data`. Returns `Ok(None)` while the block is incomplete, or
    /// `Ok(Some(offset))` where `offset` is the first byte of `data` past
    /// the terminating blank line.
    pub fn append_data(&mut self, data: &[u8]) -> Result<Option<usize>, HeaderOverflow> {
        if self.complete {
            return Ok(Some(0));
        }

        let mut pos = 0;
        while pos < data.len() {
            let Some(newline) = memchr::memchr(b'\n', &data[pos..]) else {
                self.pending.append(&data[pos..]);
                self.consumed += data.len() - pos;
                return self.check_limit().map(|()| None);
            };

            let end = pos + newline;
            self.consumed += newline + 1;
            self.check_limit()?;

            let terminated = if self.pending.is_empty() {
                self.take_line(ByteView::new(&data[pos..end]))
            } else {
                let mut line = std::mem::take(&mut self.pending);
                line.append(&data[pos..end]);
                let terminated = self.take_line(line.view());
                line.clear();
                self.pending = line;
                terminated
            };

            pos = end + 1;
            if terminated {
                self.complete = true;
                return Ok(Some(pos));
            }
        }

        Ok(None)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn start_line(&self) -> Option<&str> {
        self.start_line.as_deref()
    }

    /// Lines dropped because they had no colon.
    pub fn malformed(&self) -> &[String] {
        &self.malformed
    }

    pub fn into_parts(self) -> (Option<String>, HeaderSet) {
        (self.start_line, self.headers)
    }

    pub fn into_headers(self) -> HeaderSet {
        self.headers
    }

    fn check_limit(&self) -> Result<(), HeaderOverflow> {
        if self.consumed > self.limit {
            Err(HeaderOverflow { limit: self.limit })
        } else {
            Ok(())
        }
    }

    /// Handles one line without its `\n`. Returns true on the blank line
    /// that ends the block.
    fn take_line(&mut self, line: ByteView<'_>) -> bool {
        let line = line.strip_cr();

        if self.wants_start_line && self.start_line.is_none() {
            // Stray CRLFs ahead of the request line are ignored.
            if !line.is_empty() {
                self.start_line = Some(line.to_string_lossy());
            }
            return false;
        }

        if line.is_empty() {
            return true;
        }

        match line.split_once(b':') {
            Some((name, value)) => {
                self.headers
                    .append(name.to_string_lossy(), value.trim().to_string_lossy());
            }
            None => {
                let text = line.to_string_lossy();
                tracing::debug!(line = %text, "dropping header line without colon");
                self.malformed.push(text);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_first_match() {
        let mut set = HeaderSet::new();
        set.append("X-Tag", "one");
        set.append("x-tag", "two");
        assert_eq!(set.get("X-TAG"), Some("one"));
        assert_eq!(set.get_all("x-tag").count(), 2);
    }

    #[test]
    fn set_replaces_all_duplicates() {
        let mut set = HeaderSet::new();
        set.append("A", "1");
        set.append("B", "2");
        set.append("a", "3");
        set.set("A", "4");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![("A", "4"), ("B", "2")]);
    }

    #[test]
    fn token_matching() {
        let mut set = HeaderSet::new();
        set.append("Transfer-Encoding", "gzip, Chunked");
        assert!(set.has_token("transfer-encoding", "chunked"));
        assert!(!set.has_token("transfer-encoding", "identity"));
    }

    #[test]
    fn line_split_across_calls() {
        let mut acc = HeaderAccumulator::new(1024);
        assert_eq!(acc.append_data(b"Ho").unwrap(), None);
        assert_eq!(acc.append_data(b"st: a\r").unwrap(), None);
        assert_eq!(acc.append_data(b"\n\r").unwrap(), None);
        assert_eq!(acc.append_data(b"\nrest").unwrap(), Some(1));
        assert_eq!(acc.headers().get("host"), Some("a"));
    }

    #[test]
    fn line_without_colon_is_dropped() {
        let mut acc = HeaderAccumulator::new(1024);
        let data = b"Good: yes\r\nBroken\r\n\r\n";
        assert_eq!(acc.append_data(data).unwrap(), Some(data.len()));
        assert_eq!(acc.headers().len(), 1);
        assert_eq!(acc.malformed(), ["Broken".to_string()]);
    }

    #[test]
    fn value_leading_whitespace_stripped() {
        let mut acc = HeaderAccumulator::new(1024);
        acc.append_data(b"Name:\t  value\r\n\r\n").unwrap();
        assert_eq!(acc.headers().get("Name"), Some("value"));
    }

    #[test]
    fn start_line_skips_leading_blank_lines() {
        let mut acc = HeaderAccumulator::with_start_line(1024);
        let data = b"\r\nGET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(acc.append_data(data).unwrap(), Some(data.len()));
        assert_eq!(acc.start_line(), Some("GET / HTTP/1.1"));
    }

    #[test]
    fn overflow_is_reported() {
        let mut acc = HeaderAccumulator::new(8);
        assert!(acc.append_data(b"X-Long: aaaaaaaa").is_err());
    }
}
