//! Incremental HTTP/1.1 request decoder.
//!
//! `RequestDecoder::feed` is a resumable transition function: it accepts
//! any number of bytes (including zero), advances the flat
//! `ReadHead -> ReadBody -> ReadTrailer -> Finished` state, hands body bytes
//! to the caller's sink and reports how many input bytes it consumed.

use crate::http::buffer::{ByteView, GrowableBuffer};
use crate::http::headers::{HeaderAccumulator, HeaderOverflow};
use crate::http::request::{BodyFraming, LoginState, Method, Request, Version, percent_decode};
use crate::http::response::StatusCode;
use std::fmt;

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    UnsupportedVersion(String),
    InvalidContentLength,
    InvalidChunkSize,
    InvalidChunkTerminator,
    HeadTooLarge(usize),
}

impl ParseError {
    /// Status to answer with before closing, or `None` when the connection
    /// must be dropped without a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ParseError::HeadTooLarge(_) => None,
            ParseError::UnsupportedVersion(_) => Some(StatusCode::HttpVersionNotSupported),
            _ => Some(StatusCode::BadRequest),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidRequest => write!(f, "malformed request line"),
            ParseError::UnsupportedVersion(v) => write!(f, "unsupported protocol version {v:?}"),
            ParseError::InvalidContentLength => write!(f, "invalid Content-Length"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size line"),
            ParseError::InvalidChunkTerminator => write!(f, "chunk data not followed by CRLF"),
            ParseError::HeadTooLarge(limit) => write!(f, "header block exceeds {limit} bytes"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<HeaderOverflow> for ParseError {
    fn from(e: HeaderOverflow) -> Self {
        ParseError::HeadTooLarge(e.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    ReadHead,
    ReadBody,
    ReadTrailer,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataEnd { seen_cr: bool },
}

#[derive(Debug)]
pub struct RequestDecoder {
    state: DecodeState,
    head: HeaderAccumulator,
    trailer: HeaderAccumulator,
    request: Option<Request>,
    remaining: u64,
    chunk: ChunkPhase,
    line: GrowableBuffer,
    max_head: usize,
}

impl RequestDecoder {
    pub fn new(max_head: usize) -> Self {
        Self {
            state: DecodeState::ReadHead,
            head: HeaderAccumulator::with_start_line(max_head),
            trailer: HeaderAccumulator::new(max_head),
            request: None,
            remaining: 0,
            chunk: ChunkPhase::Size,
            line: GrowableBuffer::new(),
            max_head,
        }
    }

    /// Back to `ReadHead` for the next request on the same connection.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_head);
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// The request head, available once `ReadHead` has completed.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> Option<&mut Request> {
        self.request.as_mut()
    }

    pub fn take_request(&mut self) -> Option<Request> {
        self.request.take()
    }

    /// Advances the decoder over `data`, passing body bytes to `sink`.
    ///
    /// Returns the number of bytes consumed. Decoding pauses right after
    /// the head completes so the caller can inspect the request before
    /// any body arrives; bytes past a finished request are never consumed.
    pub fn feed<F>(&mut self, data: &[u8], mut sink: F) -> Result<usize, ParseError>
    where
        F: FnMut(&[u8]),
    {
        let mut pos = 0;

        loop {
            match self.state {
                DecodeState::ReadHead => {
                    return match self.head.append_data(data)? {
                        None => Ok(data.len()),
                        Some(offset) => {
                            self.finish_head()?;
                            Ok(offset)
                        }
                    };
                }
                DecodeState::ReadBody => {
                    if pos == data.len() {
                        return Ok(pos);
                    }
                    pos += match self.framing() {
                        BodyFraming::Chunked => self.feed_chunked(&data[pos..], &mut sink)?,
                        _ => self.feed_length(&data[pos..], &mut sink),
                    };
                }
                DecodeState::ReadTrailer => match self.trailer.append_data(&data[pos..])? {
                    None => return Ok(data.len()),
                    Some(offset) => {
                        pos += offset;
                        let fresh = HeaderAccumulator::new(self.max_head);
                        let trailer = std::mem::replace(&mut self.trailer, fresh);
                        if let Some(request) = self.request.as_mut() {
                            request.headers.extend(trailer.into_headers());
                        }
                        self.state = DecodeState::Finished;
                    }
                },
                DecodeState::Finished => return Ok(pos),
            }
        }
    }

    fn framing(&self) -> BodyFraming {
        self.request
            .as_ref()
            .map_or(BodyFraming::None, |r| r.framing)
    }

    fn finish_head(&mut self) -> Result<(), ParseError> {
        let head = std::mem::replace(
            &mut self.head,
            HeaderAccumulator::with_start_line(self.max_head),
        );
        if !head.malformed().is_empty() {
            tracing::debug!(dropped = head.malformed().len(), "request head had malformed lines");
        }
        let (start_line, headers) = head.into_parts();
        let start_line = start_line.ok_or(ParseError::InvalidRequest)?;

        let mut parts = start_line.split_ascii_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidRequest);
        };

        let version = Version::parse(version)
            .ok_or_else(|| ParseError::UnsupportedVersion(version.to_string()))?;
        let (path, query) = split_target(target);

        let framing = if headers.has_token("Transfer-Encoding", "chunked") {
            BodyFraming::Chunked
        } else {
            match headers.get("Content-Length") {
                Some(value) => match parse_content_length(value) {
                    Some(0) => BodyFraming::None,
                    Some(n) => BodyFraming::Length(n),
                    None => return Err(ParseError::InvalidContentLength),
                },
                None => BodyFraming::None,
            }
        };

        self.state = match framing {
            BodyFraming::None => DecodeState::Finished,
            BodyFraming::Length(n) => {
                self.remaining = n;
                DecodeState::ReadBody
            }
            BodyFraming::Chunked => {
                self.chunk = ChunkPhase::Size;
                DecodeState::ReadBody
            }
        };

        self.request = Some(Request {
            method: Method::parse(method),
            target: target.to_string(),
            path: String::from_utf8_lossy(&percent_decode(&path)).into_owned(),
            query,
            version,
            headers,
            framing,
            login: LoginState::LoggedOut,
        });
        Ok(())
    }

    fn feed_length<F: FnMut(&[u8])>(&mut self, data: &[u8], sink: &mut F) -> usize {
        let take = (data.len() as u64).min(self.remaining) as usize;
        if take > 0 {
            sink(&data[..take]);
        }
        self.remaining -= take as u64;
        if self.remaining == 0 {
            self.state = DecodeState::Finished;
        }
        take
    }

    fn feed_chunked<F: FnMut(&[u8])>(
        &mut self,
        data: &[u8],
        sink: &mut F,
    ) -> Result<usize, ParseError> {
        let mut pos = 0;

        while pos < data.len() && self.state == DecodeState::ReadBody {
            match self.chunk {
                ChunkPhase::Size => {
                    let rest = &data[pos..];
                    match memchr::memchr(b'\n', rest) {
                        None => {
                            self.line.append(rest);
                            pos = data.len();
                            if self.line.len() > MAX_CHUNK_LINE {
                                return Err(ParseError::InvalidChunkSize);
                            }
                        }
                        Some(newline) => {
                            self.line.append(&rest[..newline]);
                            pos += newline + 1;
                            let size = parse_chunk_size(self.line.view())?;
                            self.line.clear();
                            if size == 0 {
                                self.state = DecodeState::ReadTrailer;
                            } else {
                                self.chunk = ChunkPhase::Data(size);
                            }
                        }
                    }
                }
                ChunkPhase::Data(left) => {
                    let take = ((data.len() - pos) as u64).min(left) as usize;
                    sink(&data[pos..pos + take]);
                    pos += take;
                    let left = left - take as u64;
                    self.chunk = if left == 0 {
                        ChunkPhase::DataEnd { seen_cr: false }
                    } else {
                        ChunkPhase::Data(left)
                    };
                }
                ChunkPhase::DataEnd { seen_cr } => {
                    match data[pos] {
                        b'\r' if !seen_cr => self.chunk = ChunkPhase::DataEnd { seen_cr: true },
                        b'\n' => self.chunk = ChunkPhase::Size,
                        _ => return Err(ParseError::InvalidChunkTerminator),
                    }
                    pos += 1;
                }
            }
        }

        Ok(pos)
    }
}

/// Splits a request-target into its path and raw query. Absolute-form
/// targets are reduced to their path.
fn split_target(target: &str) -> (String, Option<String>) {
    if target.starts_with("http://") || target.starts_with("https://") {
        if let Ok(url) = url::Url::parse(target) {
            return (url.path().to_string(), url.query().map(str::to_string));
        }
    }
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

fn parse_chunk_size(line: ByteView<'_>) -> Result<u64, ParseError> {
    let line = line.strip_cr();
    let size = match line.split_once(b';') {
        Some((size, _extensions)) => size,
        None => line,
    }
    .trim();

    let digits = size.as_bytes();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(ParseError::InvalidChunkSize);
    }
    let digits = std::str::from_utf8(digits).map_err(|_| ParseError::InvalidChunkSize)?;
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidChunkSize)
}

/// Digits only; a leading sign is not a valid length.
fn parse_content_length(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
