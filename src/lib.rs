//! # rttp-proxy
//!
//! Upstream plumbing for an HTTP forward proxy: a [`Dialer`] that connects to
//! upstream hosts through cached DNS and TLS configuration, and Basic proxy
//! authentication with cached, constant-time credential checks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rttp_proxy::context::Scope;
//! use rttp_proxy::dialer::{Dialer, DialerOptions};
//! use rttp_proxy::http::Request;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dialer = Dialer::new(DialerOptions::new());
//!     let scope = Scope::background();
//!
//!     let raw = b"GET http://example.com/ HTTP/1.1\r\n\r\n";
//!     let (mut request, _) = Request::parse(raw)?;
//!     dialer.patch_http_request(&mut request);
//!
//!     let conn = dialer.dial(&scope, "example.com", 80).await?;
//!     println!("connected to {}", conn.peer_addr()?);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod background;
pub mod cache;
pub mod context;
pub mod dialer;
pub mod dns;
pub mod http;
pub mod middleware;
pub mod security;
pub mod tls;

pub use auth::{AuthError, Authenticator, BasicAuthenticator, CredentialStore, Identity};
pub use cache::BoundedCache;
pub use context::{Context, Scope};
pub use dialer::{DialError, Dialer, DialerOptions};
pub use http::{Headers, Method, Request, Response, StatusCode};
