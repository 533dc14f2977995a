//! Access control for the proxy's client-facing side.

mod proxy_auth;

pub use proxy_auth::{DEFAULT_REALM, ProxyAuthMiddleware};
