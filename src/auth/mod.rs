//! Proxy client authentication.
//!
//! An [`Authenticator`] inspects an inbound request and decides whether the
//! client may use the proxy. Authenticators that do not recognise the
//! request's credentials decline with `None`, so several can be chained by
//! [`ProxyAuthMiddleware`](crate::security::ProxyAuthMiddleware).

use thiserror::Error;

use crate::context::Context;

pub mod basic;
pub mod credentials;

pub use basic::{AUTH_CACHE_TTL, BasicAuthenticator};
pub use credentials::{Credential, CredentialStore};

/// Why a request carrying credentials was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed header")]
    MalformedHeader,

    #[error("incorrect scheme")]
    UnsupportedScheme,

    #[error("incorrect payload: {0}")]
    BadPayload(#[source] base64::DecodeError),

    #[error("incorrect delimiter")]
    MissingDelimiter,

    #[error("no such user")]
    NoSuchUser,
}

/// The authenticated client, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    pub fn user(&self) -> &str {
        &self.0
    }
}

/// Decides whether a proxy client may proceed.
pub trait Authenticator: Send + Sync {
    /// Returns `None` when the request carries nothing this authenticator
    /// understands; otherwise the final decision.
    fn authenticate(&self, ctx: &Context) -> Option<Result<Identity, AuthError>>;
}
