//! The narrow surface between the protocol core and whatever serves
//! requests.
//!
//! A connection hands body bytes to the handler's [`BodySink`] as they are
//! decoded, then asks the handler to [`complete`](Handler::complete) the
//! request. Completion is either an immediate [`Response`] or a
//! [`Deferred`] one that the event loop polls without blocking.

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::http::request::Request;
use crate::http::response::Response;
use crate::server::selector::{Direction, Selector};

/// Receives request body bytes incrementally.
pub trait BodySink {
    fn feed(&mut self, data: &[u8]);
}

/// Body sink that drops everything.
#[derive(Debug, Default)]
pub struct Discard;

impl BodySink for Discard {
    fn feed(&mut self, _data: &[u8]) {}
}

impl BodySink for Vec<u8> {
    fn feed(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

pub trait Handler {
    type Body: BodySink;

    /// Authorization policy: may this request proceed given its
    /// `login` state? Refused requests are answered with a Digest
    /// challenge and never reach `begin`/`complete`.
    fn allows(&self, request: &Request) -> bool;

    /// Called once the head is parsed, before any body byte.
    fn begin(&self, request: &Request) -> Self::Body;

    /// Called once the whole request, trailers included, is decoded.
    fn complete(&self, request: &Request, body: Self::Body) -> Completion;
}

pub enum Completion {
    Ready(Response),
    Deferred(Box<dyn Deferred>),
}

/// A response that is not available yet.
pub trait Deferred {
    /// Makes progress; returns the response once it exists. May register
    /// interest on `selector` when waiting on a descriptor.
    fn poll(&mut self, now: Instant, selector: &mut Selector) -> Option<Response>;

    /// Earliest instant at which `poll` should be retried regardless of
    /// descriptor readiness.
    fn deadline(&self) -> Option<Instant> {
        None
    }

    /// Descriptor the value is waiting on, if any.
    fn interest(&self) -> Option<(RawFd, Direction)> {
        None
    }
}

/// Releases a ready response once a deadline passes. Used to slow down
/// credential guessing without stalling other connections.
pub struct DelayedResponse {
    response: Option<Response>,
    until: Instant,
}

impl DelayedResponse {
    pub fn new(response: Response, delay: Duration) -> Self {
        Self::until(response, Instant::now() + delay)
    }

    pub fn until(response: Response, until: Instant) -> Self {
        Self {
            response: Some(response),
            until,
        }
    }
}

impl Deferred for DelayedResponse {
    fn poll(&mut self, now: Instant, _selector: &mut Selector) -> Option<Response> {
        if now >= self.until {
            self.response.take()
        } else {
            None
        }
    }

    fn deadline(&self) -> Option<Instant> {
        Some(self.until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_response_waits_for_deadline() {
        let start = Instant::now();
        let mut delayed = DelayedResponse::until(Response::ok("x"), start + Duration::from_secs(1));
        let mut selector = Selector::new();

        assert!(delayed.poll(start, &mut selector).is_none());
        assert!(
            delayed
                .poll(start + Duration::from_secs(1), &mut selector)
                .is_some()
        );
        assert_eq!(delayed.deadline(), Some(start + Duration::from_secs(1)));
    }
}
