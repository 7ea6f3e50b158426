//! Per-connection request/response state machine.
//!
//! A connection owns its socket and one fixed-size read buffer for its
//! whole life. Each cycle decodes one request, hands it to the
//! [`Handler`], sends the response and either starts over (keep-alive)
//! or closes. Nothing here blocks: whenever the socket or a body source
//! is not ready, interest is registered on the [`Selector`] and control
//! goes back to the event loop.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use crate::http::buffer::GrowableBuffer;
use crate::http::handler::{BodySink, Completion, Deferred, DelayedResponse, Handler};
use crate::http::parser::{DecodeState, ParseError, RequestDecoder};
use crate::http::request::{LoginState, Version};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::{ResponseSender, SendStatus};
use crate::server::listener::Shared;
use crate::server::selector::Selector;

pub enum ConnectionState {
    /// Waiting for (more of) a request
    Reading,
    /// Request decoded; the response is not available yet
    Processing(Box<dyn Deferred>),
    /// Sending the response
    Writing(ResponseSender),
    Closed,
}

pub struct Connection<H: Handler> {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: GrowableBuffer,
    offset: usize,
    size: usize,
    decoder: RequestDecoder,
    body: Option<H::Body>,
    verdict: Option<Completion>,
    began: bool,
    /// Bytes of the current request have been seen
    started: bool,
    version: Version,
    head_only: bool,
    keep_alive: bool,
    state: ConnectionState,
}

impl<H: Handler> Connection<H> {
    /// Wraps an accepted, non-blocking socket.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        read_buffer_size: usize,
        max_head_size: usize,
    ) -> Self {
        let mut buffer = GrowableBuffer::with_capacity(read_buffer_size);
        buffer.resize(read_buffer_size.max(1));

        Self {
            stream,
            peer,
            buffer,
            offset: 0,
            size: 0,
            decoder: RequestDecoder::new(max_head_size),
            body: None,
            verdict: None,
            began: false,
            started: false,
            version: Version::Http11,
            head_only: false,
            keep_alive: false,
            state: ConnectionState::Reading,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    /// Registers what this connection is waiting for. Must be called
    /// before every poll; interest does not survive one.
    pub fn arm(&self, selector: &mut Selector) {
        match &self.state {
            ConnectionState::Reading => selector.want_read(self.fd()),
            ConnectionState::Processing(deferred) => {
                if let Some((fd, direction)) = deferred.interest() {
                    selector.want(fd, direction);
                }
            }
            ConnectionState::Writing(sender) => match sender.waiting() {
                Some((fd, direction)) => selector.want(fd, direction),
                None => selector.want_write(self.fd()),
            },
            ConnectionState::Closed => {}
        }
    }

    /// Earliest instant this connection must be driven even without I/O.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            ConnectionState::Processing(deferred) => deferred.deadline(),
            _ => None,
        }
    }

    /// Whether the last poll (or the clock) lets this connection progress.
    pub fn is_due(&self, selector: &Selector, now: Instant) -> bool {
        match &self.state {
            ConnectionState::Reading => selector.is_readable(self.fd()),
            ConnectionState::Processing(deferred) => {
                deferred.deadline().is_some_and(|at| now >= at)
                    || deferred
                        .interest()
                        .is_some_and(|(fd, direction)| selector.is_ready(fd, direction))
            }
            ConnectionState::Writing(sender) => match sender.waiting() {
                Some((fd, direction)) => selector.is_ready(fd, direction),
                None => true,
            },
            ConnectionState::Closed => false,
        }
    }

    /// Makes as much progress as possible without blocking.
    pub fn drive(&mut self, shared: &Shared<H>, selector: &mut Selector, now: Instant) {
        loop {
            match self.state {
                ConnectionState::Reading => {
                    if self.size > 0 {
                        self.decode(shared);
                    } else if !self.fill(selector) {
                        return;
                    }
                }
                ConnectionState::Processing(ref mut deferred) => {
                    match deferred.poll(now, selector) {
                        Some(response) => self.start_response(response),
                        None => return,
                    }
                }
                ConnectionState::Writing(ref mut sender) => {
                    let status = sender.send(&mut self.stream, selector);
                    let closes = sender.closes_connection();
                    match status {
                        SendStatus::Pending => return,
                        SendStatus::Aborted => self.close(),
                        SendStatus::Finished if self.keep_alive && !closes => self.next_request(),
                        SendStatus::Finished => self.close(),
                    }
                }
                ConnectionState::Closed => return,
            }
        }
    }

    /// Reads from the socket into the empty buffer. Returns false when the
    /// socket would block.
    fn fill(&mut self, selector: &mut Selector) -> bool {
        if self.offset > 0 {
            self.buffer
                .copy_within(self.offset..self.offset + self.size, 0);
            self.offset = 0;
        }

        match self.stream.read(&mut self.buffer[self.size..]) {
            Ok(0) => {
                if self.started {
                    tracing::debug!(peer = %self.peer, "peer closed mid-request");
                }
                self.close();
                true
            }
            Ok(n) => {
                self.size += n;
                self.started = true;
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                selector.want_read(self.fd());
                false
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => true,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!(peer = %self.peer, error = %e, "peer reset connection");
                self.close();
                true
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "socket read failed");
                self.close();
                true
            }
        }
    }

    fn decode(&mut self, shared: &Shared<H>) {
        let body = &mut self.body;
        let result = self.decoder.feed(
            &self.buffer[self.offset..self.offset + self.size],
            |data| {
                if let Some(sink) = body.as_mut() {
                    sink.feed(data);
                }
            },
        );

        match result {
            Ok(consumed) => {
                self.offset += consumed;
                self.size -= consumed;
                if self.size == 0 {
                    self.offset = 0;
                }
            }
            Err(e) => {
                self.reject(e);
                return;
            }
        }

        if !self.began && self.decoder.request().is_some() {
            self.begin_request(shared);
        }
        if self.decoder.state() == DecodeState::Finished {
            self.finish_request(shared);
        }
    }

    /// The head is complete: authenticate, authorize and open the body sink.
    fn begin_request(&mut self, shared: &Shared<H>) {
        self.began = true;
        let Some(request) = self.decoder.request_mut() else {
            return;
        };

        request.login = shared.auth.login_state(request);
        self.version = request.version;
        self.head_only = request.is_head();
        self.keep_alive = request.keep_alive();

        tracing::info!(
            peer = %self.peer,
            method = request.method.as_str(),
            path = %request.path,
            "request"
        );

        if shared.handler.allows(request) {
            self.body = Some(shared.handler.begin(request));
            return;
        }

        let challenge = ResponseBuilder::new(StatusCode::Unauthorized)
            .header("WWW-Authenticate", shared.auth.challenge())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(b"401 Unauthorized".to_vec())
            .build();
        self.verdict = Some(if request.login == LoginState::LoginFailed {
            Completion::Deferred(Box::new(DelayedResponse::new(challenge, shared.auth_delay)))
        } else {
            Completion::Ready(challenge)
        });
    }

    fn finish_request(&mut self, shared: &Shared<H>) {
        let Some(request) = self.decoder.take_request() else {
            self.close();
            return;
        };

        let completion = match (self.verdict.take(), self.body.take()) {
            (Some(verdict), _) => verdict,
            (None, Some(body)) => shared.handler.complete(&request, body),
            (None, None) => Completion::Ready(Response::internal_error()),
        };

        match completion {
            Completion::Ready(response) => self.start_response(response),
            Completion::Deferred(deferred) => self.state = ConnectionState::Processing(deferred),
        }
    }

    fn reject(&mut self, error: ParseError) {
        self.body = None;
        self.verdict = None;
        self.size = 0;
        self.offset = 0;

        match error.status() {
            Some(status) => {
                tracing::warn!(peer = %self.peer, error = %error, "rejecting request");
                self.keep_alive = false;
                self.start_response(Response::error(status));
            }
            None => {
                tracing::warn!(peer = %self.peer, error = %error, "dropping connection");
                self.close();
            }
        }
    }

    fn start_response(&mut self, response: Response) {
        tracing::debug!(peer = %self.peer, status = response.status.as_u16(), "response");
        let sender = ResponseSender::new(response, self.version, self.head_only, self.keep_alive);
        self.state = ConnectionState::Writing(sender);
    }

    /// Keep-alive: same socket and buffer, fresh request state. Bytes the
    /// peer already sent stay buffered and are decoded next.
    fn next_request(&mut self) {
        self.decoder.reset();
        self.body = None;
        self.verdict = None;
        self.began = false;
        self.started = self.size > 0;
        self.version = Version::Http11;
        self.head_only = false;
        self.keep_alive = false;
        self.state = ConnectionState::Reading;
    }

    fn close(&mut self) {
        if !self.is_closed() {
            tracing::info!(peer = %self.peer, "connection closed");
        }
        self.body = None;
        self.state = ConnectionState::Closed;
    }
}
