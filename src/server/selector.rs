//! Single-shot readiness multiplexer over `poll(2)`.
//!
//! Interest is collected with [`Selector::want_read`] / [`Selector::want_write`],
//! consumed by [`Selector::poll`], and must be registered again before the
//! next poll. Readiness results stay queryable until the following poll.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn events(self) -> libc::c_short {
        match self {
            Direction::Read => libc::POLLIN,
            Direction::Write => libc::POLLOUT,
        }
    }
}

#[derive(Default)]
pub struct Selector {
    interest: Vec<libc::pollfd>,
    ready: Vec<libc::pollfd>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn want_read(&mut self, fd: RawFd) {
        self.want(fd, Direction::Read);
    }

    pub fn want_write(&mut self, fd: RawFd) {
        self.want(fd, Direction::Write);
    }

    /// Adds interest in `fd`. Repeated calls for one descriptor merge.
    pub fn want(&mut self, fd: RawFd, direction: Direction) {
        match self.interest.iter_mut().find(|p| p.fd == fd) {
            Some(entry) => entry.events |= direction.events(),
            None => self.interest.push(libc::pollfd {
                fd,
                events: direction.events(),
                revents: 0,
            }),
        }
    }

    /// Number of descriptors currently registered.
    pub fn interest_len(&self) -> usize {
        self.interest.len()
    }

    /// Blocks until a registered descriptor is ready or `timeout` passes
    /// (`None` waits forever). Clears the interest set. Returns the number
    /// of ready descriptors; an interrupted wait reports zero.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            // Round up so a deadline 0.4ms away is not spun on.
            Some(t) => t
                .as_nanos()
                .div_ceil(1_000_000)
                .min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        self.ready.clear();
        std::mem::swap(&mut self.ready, &mut self.interest);

        let rc = unsafe {
            libc::poll(
                self.ready.as_mut_ptr(),
                self.ready.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            self.ready.clear();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        self.ready.retain(|p| p.revents != 0);
        Ok(self.ready.len())
    }

    /// Whether the last poll reported `fd` ready for `direction`. Errors and
    /// hang-ups count as ready in both directions so the owner notices them
    /// on its next read or write.
    pub fn is_ready(&self, fd: RawFd, direction: Direction) -> bool {
        self.ready.iter().any(|p| {
            p.fd == fd
                && p.revents & (direction.events() | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL)
                    != 0
        })
    }

    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.is_ready(fd, Direction::Read)
    }

    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.is_ready(fd, Direction::Write)
    }
}

/// Puts a raw descriptor (pipe, subprocess stdout) into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
