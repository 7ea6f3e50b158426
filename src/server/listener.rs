//! Single-threaded event loop.
//!
//! One [`Selector`] multiplexes the listening socket and every
//! connection. Each turn re-arms all interest, polls with a timeout bound
//! by the earliest connection deadline, accepts new peers and drives the
//! connections that are due.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::info;

use crate::auth::{CredentialStore, DigestAuthenticator};
use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::handler::Handler;
use crate::server::selector::Selector;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Asks a running [`Server::run`] loop to stop after its current turn.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

fn install_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

/// Read-only state every connection consults.
pub struct Shared<H> {
    pub handler: H,
    pub auth: DigestAuthenticator<Rc<dyn CredentialStore>>,
    /// Pause before answering a failed login
    pub auth_delay: Duration,
    pub read_buffer_size: usize,
    pub max_head_size: usize,
}

impl<H> Shared<H> {
    pub fn new(config: &Config, credentials: Rc<dyn CredentialStore>, handler: H) -> Self {
        Self {
            handler,
            auth: DigestAuthenticator::new(config.realm.clone(), credentials),
            auth_delay: Duration::from_millis(config.auth_failure_delay_ms),
            read_buffer_size: config.read_buffer_size,
            max_head_size: config.max_head_size,
        }
    }
}

pub struct Server<H: Handler> {
    listener: TcpListener,
    shared: Shared<H>,
    selector: Selector,
    connections: HashMap<RawFd, Connection<H>>,
}

impl<H: Handler> Server<H> {
    /// Binds `config.listen_addr` in non-blocking mode.
    pub fn bind(
        config: &Config,
        credentials: Rc<dyn CredentialStore>,
        handler: H,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .with_context(|| format!("binding {}", config.listen_addr))?;
        listener
            .set_nonblocking(true)
            .context("making listener non-blocking")?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            shared: Shared::new(config, credentials, handler),
            selector: Selector::new(),
            connections: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until SIGINT/SIGTERM or [`request_shutdown`].
    pub fn run(&mut self) -> anyhow::Result<()> {
        install_signal_handlers();
        while !shutdown_requested() {
            self.turn(None)?;
        }
        info!(open = self.connections.len(), "Shutdown signal received");
        Ok(())
    }

    /// One loop iteration. `max_wait` caps the time spent in poll.
    pub fn turn(&mut self, max_wait: Option<Duration>) -> anyhow::Result<()> {
        let listen_fd = self.listener.as_raw_fd();
        self.selector.want_read(listen_fd);
        for conn in self.connections.values() {
            conn.arm(&mut self.selector);
        }

        let now = Instant::now();
        let timeout = self
            .connections
            .values()
            .filter_map(|c| c.deadline())
            .min()
            .map(|at| at.saturating_duration_since(now));
        let timeout = match (timeout, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        self.selector.poll(timeout).context("poll failed")?;

        if self.selector.is_readable(listen_fd) {
            self.accept_pending();
        }

        let now = Instant::now();
        for conn in self.connections.values_mut() {
            if conn.is_due(&self.selector, now) {
                conn.drive(&self.shared, &mut self.selector, now);
            }
        }
        self.connections.retain(|_, conn| !conn.is_closed());
        Ok(())
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(peer = %peer, error = %e, "set_nonblocking failed");
                        continue;
                    }
                    info!("Accepted connection from {}", peer);
                    let conn = Connection::new(
                        stream,
                        peer,
                        self.shared.read_buffer_size,
                        self.shared.max_head_size,
                    );
                    self.connections.insert(conn.fd(), conn);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}
