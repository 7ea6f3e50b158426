//! Streaming `multipart/form-data` decoder.
//!
//! The body is scanned for the delimiter `CRLF "--" boundary`. A delimiter
//! may straddle any number of `append_data` calls: the trailing bytes of an
//! input that match a prefix of the delimiter are held back (`partial`) and
//! either completed by the next input or flushed to the current part as
//! ordinary data. Delimiter bytes never reach a part.
//!
//! Parts with a `filename` stream into a new file in the destination
//! directory; other parts are kept in memory.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::http::buffer::{ByteView, GrowableBuffer};
use crate::http::handler::BodySink;
use crate::http::headers::{HeaderAccumulator, HeaderSet};

/// Largest header block accepted for a single part.
pub const MAX_PART_HEAD: usize = 16 * 1024;

const MAX_BOUNDARY_LEN: usize = 70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    NotMultipart,
    MissingBoundary,
    BoundaryNotFound,
    Truncated,
    PartHeadersIncomplete,
    MissingName,
    InvalidFilename(String),
    FileExists(String),
    Io(String),
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartError::NotMultipart => write!(f, "request body is not multipart/form-data"),
            MultipartError::MissingBoundary => write!(f, "multipart boundary missing or invalid"),
            MultipartError::BoundaryNotFound => write!(f, "multipart boundary never found in body"),
            MultipartError::Truncated => {
                write!(f, "multipart body ended before its closing boundary")
            }
            MultipartError::PartHeadersIncomplete => {
                write!(f, "multipart part headers never completed")
            }
            MultipartError::MissingName => write!(f, "multipart part has no name"),
            MultipartError::InvalidFilename(name) => write!(f, "invalid upload file name {name:?}"),
            MultipartError::FileExists(name) => write!(f, "file {name:?} already exists"),
            MultipartError::Io(msg) => write!(f, "upload failed: {msg}"),
        }
    }
}

impl std::error::Error for MultipartError {}

/// Extracts the boundary token from a `Content-Type` header value.
///
/// Content-Type format: `multipart/form-data; boundary=----WebKitFormBoundary...`
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';');
    let main = params.next().unwrap_or("").trim();
    if !main.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let boundary = value.trim().trim_matches('"');
            if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
                return Err(MultipartError::MissingBoundary);
            }
            return Ok(boundary.to_string());
        }
    }

    Err(MultipartError::MissingBoundary)
}

/// Where a part's bytes go. Chosen once the part's headers are known.
#[derive(Debug)]
pub enum PartSink {
    Memory(GrowableBuffer),
    File { file: File, path: PathBuf },
}

#[derive(Debug)]
pub struct MultipartPart {
    pub headers: HeaderSet,
    pub name: String,
    pub filename: Option<String>,
    sink: PartSink,
    size: u64,
    ok: bool,
}

impl MultipartPart {
    /// True once the part was closed by a delimiter and nothing failed.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// In-memory contents; `None` for parts streamed to a file.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.sink {
            PartSink::Memory(buf) => Some(buf),
            PartSink::File { .. } => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.data().and_then(|d| std::str::from_utf8(d).ok())
    }

    /// Path of the file this part was written to.
    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            PartSink::Memory(_) => None,
            PartSink::File { path, .. } => Some(path),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.size += data.len() as u64;
        match &mut self.sink {
            PartSink::Memory(buf) => {
                buf.append(data);
                Ok(())
            }
            PartSink::File { file, .. } => file.write_all(data),
        }
    }
}

impl Drop for MultipartPart {
    fn drop(&mut self) {
        if self.ok {
            return;
        }
        if let PartSink::File { path, .. } = &self.sink {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "partial upload not removed");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter; bytes are discarded
    Preamble,
    /// Inside a part, or matching a delimiter candidate
    InBody,
    /// Delimiter matched; the next byte decides new part vs. end
    AtDelimiter,
    /// Skipping the rest of the delimiter line
    InPartPrologue,
    /// Accumulating a part's header block
    InPartHeaders,
    /// After the closing delimiter; inert
    Epilogue,
    /// A fatal error was recorded; inert
    Failed,
}

#[derive(Debug)]
pub struct MultipartDecoder {
    delimiter: Vec<u8>,
    state: State,
    partial: usize,
    head: HeaderAccumulator,
    current: Option<MultipartPart>,
    parts: Vec<MultipartPart>,
    dest: Option<PathBuf>,
    error: Option<MultipartError>,
}

impl MultipartDecoder {
    /// Decoder for `boundary`. File parts are created in `dest`; without a
    /// destination every part stays in memory.
    pub fn new(boundary: &str, dest: Option<PathBuf>) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Self {
            delimiter,
            state: State::Preamble,
            // The first delimiter is not preceded by CRLF; pretend it was.
            partial: 2,
            head: HeaderAccumulator::new(MAX_PART_HEAD),
            current: None,
            parts: Vec::new(),
            dest,
            error: None,
        }
    }

    /// Decoder configured from a request's `Content-Type` value.
    pub fn from_content_type(
        content_type: &str,
        dest: Option<PathBuf>,
    ) -> Result<Self, MultipartError> {
        Ok(Self::new(&parse_boundary(content_type)?, dest))
    }

    pub fn error(&self) -> Option<&MultipartError> {
        self.error.as_ref()
    }

    pub fn append_data(&mut self, data: &[u8]) {
        let mut pos = 0;

        while pos < data.len() {
            match self.state {
                State::Preamble | State::InBody => pos += self.scan(&data[pos..]),
                State::AtDelimiter => {
                    if data[pos] == b'-' {
                        self.state = State::Epilogue;
                    } else {
                        self.state = State::InPartPrologue;
                    }
                }
                State::InPartPrologue => match memchr::memchr(b'\n', &data[pos..]) {
                    Some(newline) => {
                        pos += newline + 1;
                        self.head = HeaderAccumulator::new(MAX_PART_HEAD);
                        self.state = State::InPartHeaders;
                    }
                    None => pos = data.len(),
                },
                State::InPartHeaders => match self.head.append_data(&data[pos..]) {
                    Ok(None) => pos = data.len(),
                    Ok(Some(offset)) => {
                        pos += offset;
                        self.open_part();
                    }
                    Err(_) => self.fail(MultipartError::PartHeadersIncomplete),
                },
                State::Epilogue | State::Failed => return,
            }
        }
    }

    /// Ends decoding. Any structural error fails the whole body, and the
    /// files of every part are removed.
    pub fn finish(mut self) -> Result<Vec<MultipartPart>, MultipartError> {
        let outcome = match (self.error.take(), self.state) {
            (Some(e), _) => Err(e),
            (None, State::Epilogue) => Ok(()),
            (None, State::Preamble) => Err(MultipartError::BoundaryNotFound),
            (None, State::InPartPrologue | State::InPartHeaders) => {
                Err(MultipartError::PartHeadersIncomplete)
            }
            (None, _) => Err(MultipartError::Truncated),
        };

        let mut parts = std::mem::take(&mut self.parts);
        match outcome {
            Ok(()) => Ok(parts),
            Err(e) => {
                for part in &mut parts {
                    part.ok = false;
                }
                Err(e)
            }
        }
    }

    /// Scans part data for the delimiter. Returns bytes consumed.
    fn scan(&mut self, data: &[u8]) -> usize {
        let delim_len = self.delimiter.len();

        if self.partial > 0 {
            let need = delim_len - self.partial;
            let avail = need.min(data.len());
            if data[..avail] == self.delimiter[self.partial..self.partial + avail] {
                if avail == need {
                    self.partial = 0;
                    self.delimiter_found();
                    return need;
                }
                self.partial += avail;
                return avail;
            }

            // False match: the held-back prefix was part data after all.
            // The delimiter's only CR is its first byte, so no match can
            // start inside the prefix; rescanning `data` from 0 is enough.
            let held = std::mem::take(&mut self.partial);
            if self.state == State::InBody {
                let result = match self.current.as_mut() {
                    Some(part) => part.write(&self.delimiter[..held]),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(MultipartError::Io(e.to_string()));
                    return data.len();
                }
            }
        }

        match memchr::memmem::find(data, &self.delimiter) {
            Some(at) => {
                self.emit(&data[..at]);
                self.delimiter_found();
                at + delim_len
            }
            None => {
                let keep = held_back_len(data, &self.delimiter);
                self.emit(&data[..data.len() - keep]);
                self.partial = keep;
                data.len()
            }
        }
    }

    fn emit(&mut self, data: &[u8]) {
        if self.state != State::InBody || data.is_empty() {
            return;
        }
        if let Some(part) = self.current.as_mut() {
            if let Err(e) = part.write(data) {
                self.fail(MultipartError::Io(e.to_string()));
            }
        }
    }

    fn delimiter_found(&mut self) {
        if self.state == State::Failed {
            return;
        }
        if let Some(mut part) = self.current.take() {
            part.ok = true;
            tracing::debug!(name = %part.name, size = part.size, "multipart part complete");
            self.parts.push(part);
        }
        self.state = State::AtDelimiter;
    }

    fn open_part(&mut self) {
        let head = std::mem::replace(&mut self.head, HeaderAccumulator::new(MAX_PART_HEAD));
        let headers = head.into_headers();

        let (name, filename) = match headers.get("Content-Disposition") {
            Some(value) => parse_disposition(value),
            None => (None, None),
        };
        let Some(name) = name else {
            self.fail(MultipartError::MissingName);
            return;
        };

        let sink = match (&filename, &self.dest) {
            (Some(filename), Some(dest)) => {
                let Some(clean) = sanitize_filename(filename) else {
                    self.fail(MultipartError::InvalidFilename(filename.clone()));
                    return;
                };
                let path = dest.join(clean);
                match OpenOptions::new().write(true).create_new(true).open(&path) {
                    Ok(file) => PartSink::File { file, path },
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        self.fail(MultipartError::FileExists(clean.to_string()));
                        return;
                    }
                    Err(e) => {
                        self.fail(MultipartError::Io(e.to_string()));
                        return;
                    }
                }
            }
            _ => PartSink::Memory(GrowableBuffer::new()),
        };

        self.current = Some(MultipartPart {
            headers,
            name,
            filename,
            sink,
            size: 0,
            ok: false,
        });
        self.state = State::InBody;
    }

    fn fail(&mut self, error: MultipartError) {
        tracing::debug!(error = %error, "multipart decode failed");
        self.current = None;
        self.partial = 0;
        self.error.get_or_insert(error);
        self.state = State::Failed;
    }
}

impl Drop for MultipartDecoder {
    /// A decoder dropped before `finish` belongs to an aborted request:
    /// every file it wrote is removed.
    fn drop(&mut self) {
        for part in &mut self.parts {
            part.ok = false;
        }
    }
}

impl BodySink for MultipartDecoder {
    fn feed(&mut self, data: &[u8]) {
        self.append_data(data);
    }
}

/// Length of the longest suffix of `data` that is a proper prefix of
/// `delimiter`.
fn held_back_len(data: &[u8], delimiter: &[u8]) -> usize {
    let max = (delimiter.len() - 1).min(data.len());
    (1..=max)
        .rev()
        .find(|&k| data.ends_with(&delimiter[..k]))
        .unwrap_or(0)
}

/// Pulls `name` and `filename` out of a `Content-Disposition` value.
/// Parameter names are case-insensitive; values are quoted or bare.
fn parse_disposition(value: &str) -> (Option<String>, Option<String>) {
    let view = ByteView::from(value);
    let bytes = view.as_bytes();
    let mut name = None;
    let mut filename = None;

    // Skip the disposition type.
    let mut i = match view.find(b';') {
        Some(pos) => pos + 1,
        None => return (None, None),
    };

    while i < bytes.len() {
        while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b';') {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && bytes[i] != b';' {
            i += 1;
        }
        let key = view.slice(key_start..i).trim();
        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        i += 1;

        let param = if bytes.get(i) == Some(&b'"') {
            i += 1;
            let mut out = Vec::new();
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    i += 1;
                }
                out.push(bytes[i]);
                i += 1;
            }
            i += 1;
            String::from_utf8_lossy(&out).into_owned()
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b';' {
                i += 1;
            }
            view.slice(start..i).trim().to_string_lossy()
        };

        if key.eq_ignore_ascii_case(b"name") {
            name = Some(param);
        } else if key.eq_ignore_ascii_case(b"filename") {
            filename = Some(param);
        }
    }

    (name, filename)
}

/// Final path component of a client-supplied file name, if usable.
fn sanitize_filename(raw: &str) -> Option<&str> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        None
    } else {
        Some(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(
            parse_boundary("multipart/form-data; boundary=\"abc\"").unwrap(),
            "abc"
        );
        assert_eq!(
            parse_boundary("text/plain"),
            Err(MultipartError::NotMultipart)
        );
        assert_eq!(
            parse_boundary("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        );
    }

    #[test]
    fn disposition_params() {
        let (name, filename) =
            parse_disposition("form-data; NAME=\"field\"; filename=\"a;b.txt\"");
        assert_eq!(name.as_deref(), Some("field"));
        assert_eq!(filename.as_deref(), Some("a;b.txt"));

        let (name, filename) = parse_disposition("form-data; name=bare");
        assert_eq!(name.as_deref(), Some("bare"));
        assert_eq!(filename, None);
    }

    #[test]
    fn filenames_are_reduced_to_basename() {
        assert_eq!(sanitize_filename("C:\\Users\\x\\report.pdf"), Some("report.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[test]
    fn held_back_suffix() {
        let delim = b"\r\n--xyz";
        assert_eq!(held_back_len(b"data\r\n-", delim), 3);
        assert_eq!(held_back_len(b"data\r", delim), 1);
        assert_eq!(held_back_len(b"data", delim), 0);
    }

    #[test]
    fn empty_body_has_no_boundary() {
        let decoder = MultipartDecoder::new("xyz", None);
        assert_eq!(decoder.finish().unwrap_err(), MultipartError::BoundaryNotFound);
    }
}
