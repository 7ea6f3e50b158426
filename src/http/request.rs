use crate::http::headers::HeaderSet;

/// HTTP request methods.
///
/// Represents the HTTP method/verb of a request. The share handler serves
/// GET/HEAD and accepts uploads through POST; anything else is parsed and
/// answered with 405 or 501.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other token sent by the client
    Extension(String),
}

/// Protocol version from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head
    None,
    /// Exactly this many bytes follow the head
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// Outcome of checking the request's `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoginState {
    /// No credentials were presented
    #[default]
    LoggedOut,
    /// Digest credentials verified for this user
    LoggedIn(String),
    /// Credentials were presented and rejected
    LoginFailed,
}

/// Represents a parsed HTTP request head.
///
/// The body is never buffered here; it streams to the handler's body sink
/// while the request is decoded.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Raw request-target as sent by the client
    pub target: String,
    /// Percent-decoded path (e.g., "/docs/a b.txt")
    pub path: String,
    /// Query string without the leading `?`, still encoded
    pub query: Option<String>,
    /// HTTP version
    pub version: Version,
    /// Request headers in arrival order, trailers appended
    pub headers: HeaderSet,
    /// Body delimitation chosen from the headers
    pub framing: BodyFraming,
    /// Authentication outcome, filled in by the connection
    pub login: LoginState,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    query: Option<String>,
    version: Version,
    headers: HeaderSet,
    framing: BodyFraming,
    login: LoginState,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use dirserve::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    /// Like [`Method::from_str`], but keeps unknown tokens as extensions.
    pub fn parse(s: &str) -> Self {
        Self::from_str(s).unwrap_or_else(|| Method::Extension(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(token) => token,
        }
    }
}

impl Version {
    /// Parses the version token of a request line. Only HTTP/1.x is
    /// understood.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            query: None,
            version: Version::Http11,
            headers: HeaderSet::new(),
            framing: BodyFraming::None,
            login: LoginState::LoggedOut,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn framing(mut self, framing: BodyFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn login(mut self, login: LoginState) -> Self {
        self.login = login;
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let path = self.path.ok_or("path missing")?;
        let target = match &self.query {
            Some(q) => format!("{path}?{q}"),
            None => path.clone(),
        };
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target,
            path,
            query: self.query,
            version: self.version,
            headers: self.headers,
            framing: self.framing,
            login: self.login,
        })
    }
}

impl Request {
    /// Retrieves a header value by name (case-insensitive).
    ///
    /// # Arguments
    ///
    /// * `key` - Header name to look up
    ///
    /// # Returns
    ///
    /// `Some(&str)` with the first matching header value, `None` otherwise.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Determines whether the connection may serve another request after
    /// this one.
    ///
    /// HTTP/1.0 peers are always closed after one exchange; HTTP/1.1 peers
    /// are kept unless they sent `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        self.version == Version::Http11 && !self.headers.has_token("Connection", "close")
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

/// Percent-decodes a request path.
///
/// `%XX` becomes the byte with hex value `XX`. A `%` with fewer than two
/// characters after it takes whatever is there: the available characters
/// are consumed and their leading hex digits give the byte value, so a
/// trailing `%` decodes to `0x00` and `%4` to `0x04`. Non-hex characters
/// after `%` are consumed without validation.
pub fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let digits = &bytes[i + 1..(i + 3).min(bytes.len())];
        let mut value: u8 = 0;
        for d in digits {
            match hex_value(*d) {
                Some(v) => value = (value << 4) | v,
                None => break,
            }
        }
        out.push(value);
        i += 1 + digits.len();
    }

    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
