//! Responses the proxy writes itself.
//!
//! Upstream responses are relayed untouched; this builder covers the
//! handful of answers the proxy originates: `407` challenges and `502`
//! when nothing in the pipeline reached upstream.

use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use rttp_proxy::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::ProxyAuthenticationRequired)
///     .header("Proxy-Authenticate", r#"Basic realm="proxy""#)
///     .keep_alive(false);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 407 Proxy Authentication Required\r\n"));
/// assert!(text.contains("Connection: close\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header to a response coming back up the middleware chain.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// `Content-Type: text/plain` is added for a non-empty body without one.
    /// `Connection` and `Content-Length` are always written, replacing any
    /// values set by hand.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.set(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        self.headers.set("Content-Length", self.body.len().to_string());

        let mut buf = BytesMut::with_capacity(64 + self.headers.len() * 32 + self.body.len());
        // writing into BytesMut cannot fail
        let _ = write!(buf, "HTTP/1.1 {}\r\n{}\r\n", self.status, self.headers);
        buf.put_slice(&self.body);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn gateway_error_with_body() {
        let r = Response::new(StatusCode::BadGateway).body("cannot dial upstream");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 20\r\n"));
        assert!(s.ends_with("\r\n\r\ncannot dial upstream"));
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let s = to_string(Response::new(StatusCode::ProxyAuthenticationRequired).into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_header_is_not_duplicated() {
        let r = Response::new(StatusCode::Ok)
            .header("Connection", "upgrade")
            .keep_alive(false);
        let s = to_string(r.into_bytes());
        assert_eq!(s.matches("Connection:").count(), 1);
        assert!(s.contains("Connection: close\r\n"));
    }
}
