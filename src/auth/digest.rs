//! HTTP Digest authentication (RFC 2617, MD5, `qop=auth`).

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

use crate::http::buffer::ByteView;
use crate::http::request::{LoginState, Request};

/// Source of stored credential hashes.
pub trait CredentialStore {
    /// `HA1 = MD5(username ":" realm ":" password)` as lowercase hex.
    fn ha1(&self, username: &str) -> Option<String>;
}

impl<C: CredentialStore + ?Sized> CredentialStore for Rc<C> {
    fn ha1(&self, username: &str) -> Option<String> {
        (**self).ha1(username)
    }
}

impl CredentialStore for HashMap<String, String> {
    fn ha1(&self, username: &str) -> Option<String> {
        self.get(username).cloned()
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Computes the stored credential hash for a user.
pub fn ha1(username: &str, realm: &str, password: &str) -> String {
    md5_hex(format!("{username}:{realm}:{password}").as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    InvalidScheme,
    InvalidFormat(&'static str),
    MissingField(&'static str),
    RealmMismatch,
    UriMismatch,
    UnknownUser(String),
    ResponseMismatch,
}

impl fmt::Display for DigestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestError::InvalidScheme => write!(f, "Authorization header must use Digest scheme"),
            DigestError::InvalidFormat(m) => write!(f, "invalid Digest header: {m}"),
            DigestError::MissingField(k) => write!(f, "Digest header missing field: {k}"),
            DigestError::RealmMismatch => write!(f, "Digest realm does not match"),
            DigestError::UriMismatch => write!(f, "Digest uri does not match the request-target"),
            DigestError::UnknownUser(u) => write!(f, "unknown user {u:?}"),
            DigestError::ResponseMismatch => write!(f, "Digest response does not match"),
        }
    }
}

impl std::error::Error for DigestError {}

/// Fields of an `Authorization: Digest ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestParams {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<String>,
    pub nc: String,
    pub cnonce: String,
}

impl DigestParams {
    /// Parses an `Authorization` header value of the form `Digest k=v, ...`.
    pub fn parse(header_value: &str) -> Result<Self, DigestError> {
        let value = header_value.trim();
        let (scheme, rest) = value.split_once([' ', '\t']).unwrap_or((value, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(DigestError::InvalidScheme);
        }

        let mut params = parse_params(ByteView::from(rest))?;
        let mut take = |key: &'static str| params.remove(key).ok_or(DigestError::MissingField(key));

        Ok(Self {
            username: take("username")?,
            realm: take("realm")?,
            nonce: take("nonce")?,
            uri: take("uri")?,
            response: take("response")?,
            nc: take("nc")?,
            cnonce: take("cnonce")?,
            qop: take("qop").ok(),
        })
    }

    /// `MD5(HA1 ":" nonce ":" nc ":" cnonce ":" "auth" ":" MD5(method ":" uri))`.
    pub fn expected_response(&self, method: &str, ha1: &str) -> String {
        let ha2 = md5_hex(format!("{method}:{}", self.uri).as_bytes());
        md5_hex(
            format!(
                "{ha1}:{}:{}:{}:auth:{ha2}",
                self.nonce, self.nc, self.cnonce
            )
            .as_bytes(),
        )
    }
}

/// Issues Digest challenges and verifies client responses.
pub struct DigestAuthenticator<C> {
    realm: String,
    credentials: C,
    nonce: Cell<u64>,
}

impl<C: CredentialStore> DigestAuthenticator<C> {
    /// Nonces start from the current Unix time in seconds.
    pub fn new(realm: impl Into<String>, credentials: C) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::with_seed(realm, credentials, seed)
    }

    pub fn with_seed(realm: impl Into<String>, credentials: C, seed: u64) -> Self {
        Self {
            realm: realm.into(),
            credentials,
            nonce: Cell::new(seed),
        }
    }

    /// A fresh nonce; every call returns a distinct value.
    pub fn next_nonce(&self) -> String {
        let n = self.nonce.get().wrapping_add(1);
        self.nonce.set(n);
        format!("{n:x}")
    }

    /// `WWW-Authenticate` value carrying a fresh nonce.
    pub fn challenge(&self) -> String {
        format!(
            "Digest realm=\"{}\", nonce=\"{}\", qop=\"auth\"",
            self.realm,
            self.next_nonce()
        )
    }

    /// Verifies an `Authorization` header for a request with `method` and
    /// request-target `target`. Returns the user name on success.
    /// The header's `uri` must equal the request-target.
    pub fn verify(
        &self,
        method: &str,
        target: &str,
        header_value: &str,
    ) -> Result<String, DigestError> {
        let params = DigestParams::parse(header_value)?;
        if params.realm != self.realm {
            return Err(DigestError::RealmMismatch);
        }
        if params.uri != target {
            return Err(DigestError::UriMismatch);
        }
        let ha1 = self
            .credentials
            .ha1(&params.username)
            .ok_or_else(|| DigestError::UnknownUser(params.username.clone()))?;

        let expected = params.expected_response(method, &ha1);
        if constant_time_eq(expected.as_bytes(), params.response.as_bytes()) {
            Ok(params.username)
        } else {
            Err(DigestError::ResponseMismatch)
        }
    }

    /// Login state for a request head, from its `Authorization` header.
    pub fn login_state(&self, request: &Request) -> LoginState {
        let Some(header) = request.header("Authorization") else {
            return LoginState::LoggedOut;
        };
        match self.verify(request.method.as_str(), &request.target, header) {
            Ok(user) => LoginState::LoggedIn(user),
            Err(e) => {
                tracing::info!(path = %request.path, error = %e, "digest login failed");
                LoginState::LoginFailed
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parses `key=value` pairs separated by commas; values may be quoted.
/// Keys are lowercased.
fn parse_params(input: ByteView<'_>) -> Result<HashMap<String, String>, DigestError> {
    let bytes = input.as_bytes();
    let mut out = HashMap::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i == bytes.len() {
            break;
        }

        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && bytes[i] != b',' {
            i += 1;
        }
        if i == bytes.len() || bytes[i] != b'=' {
            return Err(DigestError::InvalidFormat("expected '='"));
        }
        let key = input.slice(key_start..i).trim().to_string_lossy().to_ascii_lowercase();
        i += 1;
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }

        let value = if bytes.get(i) == Some(&b'"') {
            i += 1;
            let mut value = Vec::new();
            loop {
                match bytes.get(i) {
                    None => return Err(DigestError::InvalidFormat("unterminated quoted value")),
                    Some(b'"') => {
                        i += 1;
                        break;
                    }
                    Some(b'\\') if i + 1 < bytes.len() => {
                        value.push(bytes[i + 1]);
                        i += 2;
                    }
                    Some(b) => {
                        value.push(*b);
                        i += 1;
                    }
                }
            }
            String::from_utf8_lossy(&value).into_owned()
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            input.slice(start..i).trim().to_string_lossy()
        };

        out.insert(key, value);
    }

    Ok(out)
}
