//! Non-blocking response sender.
//!
//! Serializes the status line and headers once, derives the body framing
//! from the body source, and then pushes bytes with as many non-blocking
//! writes as the socket accepts. Body bytes from a descriptor are read on
//! demand in bounded chunks; either side blocking parks the sender on the
//! [`Selector`] until the loop comes back.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use crate::http::buffer::GrowableBuffer;
use crate::http::request::Version;
use crate::http::response::{Response, StatusCode};
use crate::server::selector::{Direction, Selector};

/// Largest body slice read from the source descriptor per refill.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Room kept in front of each chunk for `<hex-size>\r\n`.
const CHUNK_HEAD_RESERVE: usize = 8;

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Body delimitation written to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` with the total body size
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Unknown length towards an HTTP/1.0 peer: body ends at close
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Every byte of the response has been written
    Finished,
    /// Blocked on the socket or the source; interest is registered
    Pending,
    /// The exchange cannot continue; tear the connection down
    Aborted,
}

enum Refill {
    Data,
    Blocked,
    Done,
    Failed,
}

pub struct ResponseSender {
    status: StatusCode,
    head: GrowableBuffer,
    head_sent: usize,
    buf: GrowableBuffer,
    buf_pos: usize,
    source: Option<File>,
    framing: Framing,
    remaining: u64,
    close: bool,
    waiting: Option<(RawFd, Direction)>,
}

impl ResponseSender {
    /// Prepares `response` for a peer speaking `version`.
    ///
    /// `head_only` suppresses the body (HEAD requests) while keeping the
    /// framing headers. `keep_alive` is the connection's wish; the framing
    /// may still force a close, see [`ResponseSender::closes_connection`].
    pub fn new(response: Response, version: Version, head_only: bool, keep_alive: bool) -> Self {
        let Response {
            status,
            mut headers,
            body,
            file,
        } = response;

        let file_len = file.as_ref().and_then(|f| match f.metadata() {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        });

        let framing = if !status.allows_body() {
            Framing::Length(0)
        } else {
            match (&file, file_len) {
                (None, _) => Framing::Length(body.len() as u64),
                (Some(_), Some(len)) => Framing::Length(body.len() as u64 + len),
                (Some(_), None) if version == Version::Http11 => Framing::Chunked,
                (Some(_), None) => Framing::Close,
            }
        };
        let close = !keep_alive || framing == Framing::Close;

        headers.remove("Content-Length");
        headers.remove("Transfer-Encoding");
        headers.remove("Connection");

        let mut head = GrowableBuffer::with_capacity(256);
        head.append(
            format!(
                "HTTP/1.1 {} {}\r\n",
                status.as_u16(),
                status.reason_phrase()
            )
            .as_bytes(),
        );
        for (name, value) in headers.iter() {
            head.append(name.as_bytes());
            head.append(b": ");
            head.append(value.as_bytes());
            head.append(b"\r\n");
        }
        match framing {
            Framing::Length(len) if status.allows_body() => {
                head.append(format!("Content-Length: {len}\r\n").as_bytes());
            }
            Framing::Chunked => head.append(b"Transfer-Encoding: chunked\r\n"),
            _ => {}
        }
        if close {
            head.append(b"Connection: close\r\n");
        }
        head.append(b"\r\n");

        let mut sender = Self {
            status,
            head,
            head_sent: 0,
            buf: GrowableBuffer::new(),
            buf_pos: 0,
            source: None,
            framing,
            remaining: file_len.unwrap_or(0),
            close,
            waiting: None,
        };

        if head_only || !status.allows_body() {
            return sender;
        }

        sender.source = file;
        match framing {
            Framing::Chunked if !body.is_empty() => {
                sender.buf.append(format!("{:x}\r\n", body.len()).as_bytes());
                sender.buf.append(&body);
                sender.buf.append(b"\r\n");
            }
            Framing::Chunked => {}
            Framing::Length(_) | Framing::Close => sender.buf.append(&body),
        }
        sender
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// True when the connection must be closed once this response is out.
    pub fn closes_connection(&self) -> bool {
        self.close
    }

    /// Descriptor and direction the last `send` blocked on.
    pub fn waiting(&self) -> Option<(RawFd, Direction)> {
        self.waiting
    }

    /// Writes as much as possible to `sock` without blocking.
    pub fn send<S: Write + AsRawFd>(
        &mut self,
        sock: &mut S,
        selector: &mut Selector,
    ) -> SendStatus {
        self.waiting = None;

        loop {
            if self.head_sent < self.head.len() {
                match write_some(sock, &self.head[self.head_sent..]) {
                    Ok(Some(n)) => self.head_sent += n,
                    Ok(None) => return self.park(sock.as_raw_fd(), Direction::Write, selector),
                    Err(e) => return write_failed(&e),
                }
                continue;
            }

            if self.buf_pos < self.buf.len() {
                match write_some(sock, &self.buf[self.buf_pos..]) {
                    Ok(Some(n)) => self.buf_pos += n,
                    Ok(None) => return self.park(sock.as_raw_fd(), Direction::Write, selector),
                    Err(e) => return write_failed(&e),
                }
                continue;
            }

            match self.refill(selector) {
                Refill::Data => {}
                Refill::Blocked => return SendStatus::Pending,
                Refill::Done => return SendStatus::Finished,
                Refill::Failed => return SendStatus::Aborted,
            }
        }
    }

    fn park(&mut self, fd: RawFd, direction: Direction, selector: &mut Selector) -> SendStatus {
        selector.want(fd, direction);
        self.waiting = Some((fd, direction));
        SendStatus::Pending
    }

    fn refill(&mut self, selector: &mut Selector) -> Refill {
        self.buf.clear();
        self.buf_pos = 0;

        let Some(file) = self.source.as_mut() else {
            return Refill::Done;
        };
        let fd = file.as_raw_fd();

        let (start, want) = match self.framing {
            Framing::Length(_) => {
                if self.remaining == 0 {
                    self.source = None;
                    return Refill::Done;
                }
                (0, (self.remaining.min(CHUNK_SIZE as u64)) as usize)
            }
            Framing::Chunked => (CHUNK_HEAD_RESERVE, CHUNK_SIZE),
            Framing::Close => (0, CHUNK_SIZE),
        };

        self.buf.resize(start + want + 2);
        let read = loop {
            match file.read(&mut self.buf[start..start + want]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match read {
            Ok(0) => {
                self.source = None;
                self.buf.clear();
                match self.framing {
                    Framing::Length(_) => {
                        tracing::warn!(
                            missing = self.remaining,
                            "body source ended before its announced length"
                        );
                        Refill::Failed
                    }
                    Framing::Chunked => {
                        self.buf.append(LAST_CHUNK);
                        Refill::Data
                    }
                    Framing::Close => Refill::Done,
                }
            }
            Ok(n) => {
                match self.framing {
                    Framing::Chunked => {
                        let size_line = format!("{n:x}\r\n");
                        let head_start = CHUNK_HEAD_RESERVE - size_line.len();
                        self.buf[head_start..CHUNK_HEAD_RESERVE]
                            .copy_from_slice(size_line.as_bytes());
                        self.buf[start + n..start + n + 2].copy_from_slice(b"\r\n");
                        self.buf.resize(start + n + 2);
                        self.buf_pos = head_start;
                    }
                    Framing::Length(_) => {
                        self.remaining -= n as u64;
                        self.buf.resize(n);
                    }
                    Framing::Close => self.buf.resize(n),
                }
                Refill::Data
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.buf.clear();
                selector.want_read(fd);
                self.waiting = Some((fd, Direction::Read));
                Refill::Blocked
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading response body failed");
                self.source = None;
                Refill::Failed
            }
        }
    }
}

/// One write attempt. `Ok(None)` means the socket would block.
fn write_some<S: Write>(sock: &mut S, data: &[u8]) -> io::Result<Option<usize>> {
    loop {
        match sock.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

fn write_failed(e: &io::Error) -> SendStatus {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
            tracing::debug!(error = %e, "peer went away during write");
        }
        _ => tracing::warn!(error = %e, "writing response failed"),
    }
    SendStatus::Aborted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::ResponseBuilder;

    fn head_of(sender: &ResponseSender) -> String {
        String::from_utf8_lossy(&sender.head).into_owned()
    }

    #[test]
    fn buffered_body_uses_content_length() {
        let sender = ResponseSender::new(Response::ok("hello"), Version::Http11, false, true);
        assert_eq!(sender.framing(), Framing::Length(5));
        let head = head_of(&sender);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Length: 5\r\n"));
        assert!(!head.contains("Connection: close"));
    }

    #[test]
    fn collaborator_framing_headers_are_replaced() {
        let response = ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Length", "999")
            .header("Transfer-Encoding", "chunked")
            .body(b"abc".to_vec())
            .build();
        let sender = ResponseSender::new(response, Version::Http11, false, false);
        let head = head_of(&sender);
        assert!(head.contains("Content-Length: 3\r\n"));
        assert!(!head.contains("999"));
        assert!(!head.contains("Transfer-Encoding"));
        assert!(head.contains("Connection: close\r\n"));
    }

    #[test]
    fn no_content_has_no_length() {
        let response = ResponseBuilder::new(StatusCode::NoContent).build();
        let sender = ResponseSender::new(response, Version::Http11, false, true);
        assert!(!head_of(&sender).contains("Content-Length"));
    }
}
