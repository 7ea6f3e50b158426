//! dirserve - small file-sharing HTTP daemon
//!
//! Core library: a single-threaded, non-blocking HTTP/1.1 engine with
//! Digest authentication, plus the file-share handler the daemon runs.

pub mod auth;
pub mod config;
pub mod http;
pub mod server;
pub mod share;
