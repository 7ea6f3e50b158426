//! HTTP/1.1 protocol engine.
//!
//! Everything here is an incremental state machine fed with whatever bytes
//! the socket produced; no function blocks or assumes a message arrives in
//! one piece.
//!
//! # Architecture
//!
//! - **`buffer`**: `ByteView` (borrowed bytes) and `GrowableBuffer` (owned bytes)
//! - **`headers`**: ordered header sets and the resumable line accumulator
//! - **`request`**: request head representation and percent-decoding
//! - **`parser`**: request decoder (head, length or chunked body, trailers)
//! - **`multipart`**: streaming `multipart/form-data` decoder
//! - **`response`**: response representation with builder pattern
//! - **`writer`**: response framing and non-blocking sending
//! - **`handler`**: the contract towards whatever serves requests
//! - **`connection`**: the per-connection request/response cycle
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Decode head, authenticate, stream body
//!        └──────┬──────┘
//!               │ Request decoded
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Response deferred (timer or descriptor)
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send head and body without blocking
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod buffer;
pub mod connection;
pub mod handler;
pub mod headers;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
