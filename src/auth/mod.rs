//! Request authentication.
//!
//! Only HTTP Digest (RFC 2617, MD5, `qop=auth`) is supported. Credentials
//! come from a [`CredentialStore`]; this module never sees plain passwords
//! after startup.

pub mod digest;

pub use digest::{CredentialStore, DigestAuthenticator, DigestError, DigestParams, ha1};
