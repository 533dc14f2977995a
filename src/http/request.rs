//! Proxied HTTP/1.1 requests.
//!
//! A forward proxy sees request targets in two shapes: absolute-form
//! (`GET http://host/path HTTP/1.1`) from clients that know they talk to a
//! proxy, and origin-form (`GET /path HTTP/1.1`) everywhere else. [`Request`]
//! keeps the raw target and derives its parts on demand, so the target can be
//! rewritten in place before the request is sent upstream.

use std::borrow::Cow;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// An HTTP/1.1 request as seen by the proxy.
///
/// # Examples
///
/// ```
/// use rttp_proxy::http::Request;
///
/// let raw = b"GET http://example.com/hello?name=world HTTP/1.1\r\nHost: example.com\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.scheme(), Some("http"));
/// assert_eq!(request.authority(), Some("example.com"));
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.path_and_query(), "/hello?name=world");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Creates an HTTP/1.1 request with no headers and an empty body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Parse a request head from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. Everything after the head is kept as the body.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the head.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, target or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(method) => method.parse::<Method>().unwrap_or_else(|e| match e {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "target" })?
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            // opaque bytes become U+FFFD so the header stays visible
            header_map.insert(header.name, String::from_utf8_lossy(header.value));
        }

        Ok((
            Self {
                method,
                target,
                version,
                headers: header_map,
                body: Bytes::copy_from_slice(&buf[body_offset..]),
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as it will be written on the wire.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Replaces the request target.
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    /// The scheme of an absolute-form target, as written.
    pub fn scheme(&self) -> Option<&str> {
        self.split_absolute().map(|(scheme, _)| scheme)
    }

    /// The `host[:port]` of an absolute-form target, or the target itself for
    /// a `CONNECT` request.
    pub fn authority(&self) -> Option<&str> {
        if self.method == Method::Connect {
            return Some(&self.target);
        }
        let (_, rest) = self.split_absolute()?;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..end];
        // userinfo is never forwarded
        Some(authority.rsplit_once('@').map_or(authority, |(_, host)| host))
    }

    /// The path, without query string. Empty for an absolute-form target
    /// with no path.
    pub fn path(&self) -> &str {
        let rest = self.origin_part();
        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        &rest[..end]
    }

    /// The raw query string without the leading `?`, if any.
    pub fn query_string(&self) -> Option<&str> {
        let rest = self.origin_part();
        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
        rest.split_once('?').map(|(_, query)| query)
    }

    /// The target in origin-form: path plus query, with `/` standing in for
    /// an empty path.
    pub fn path_and_query(&self) -> Cow<'_, str> {
        let path = self.path();
        match (path.is_empty(), self.query_string()) {
            (false, None) => Cow::Borrowed(path),
            (true, None) => Cow::Borrowed("/"),
            (false, Some(query)) => Cow::Owned(format!("{path}?{query}")),
            (true, Some(query)) => Cow::Owned(format!("/?{query}")),
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the client connection should be kept alive after
    /// this request.
    ///
    /// `Proxy-Connection` is honoured when `Connection` is absent; older
    /// clients still send it to proxies.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get("connection")
            .or_else(|| self.headers.get("proxy-connection"));
        match connection {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Splits `scheme://rest` off an absolute-form target.
    fn split_absolute(&self) -> Option<(&str, &str)> {
        let (scheme, rest) = self.target.split_once("://")?;
        let valid = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then_some((scheme, rest))
    }

    /// Everything from the path onward.
    fn origin_part(&self) -> &str {
        if self.method == Method::Connect {
            return "";
        }
        match self.split_absolute() {
            Some((_, rest)) => {
                let start = rest.find(['/', '?', '#']).unwrap_or(rest.len());
                &rest[start..]
            }
            None => &self.target,
        }
    }
}
