//! `Proxy-Authorization: Basic` (RFC 7617).
//!
//! Decisions are cached under the raw header text, so a client that repeats
//! the same header on every request is decoded and checked only once per
//! hour. Failures are cached exactly like successes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::{AuthError, Authenticator, CredentialStore, Identity};
use crate::cache::BoundedCache;
use crate::context::Context;

/// How long an authentication decision is replayed.
pub const AUTH_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Cache slots per configured credential.
const CACHE_SIZE_MULTIPLIER: usize = 2;

type Decision = Result<Identity, AuthError>;

/// Checks `Proxy-Authorization: Basic ...` against a [`CredentialStore`].
///
/// # Examples
///
/// ```
/// use rttp_proxy::auth::{Authenticator, BasicAuthenticator, CredentialStore};
/// use rttp_proxy::context::Context;
/// use rttp_proxy::http::Request;
///
/// let auth = BasicAuthenticator::new([("alice", "secret")].into_iter().collect());
///
/// let raw = b"GET http://example.com/ HTTP/1.1\r\nProxy-Authorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
///
/// let identity = auth.authenticate(&Context::new(request)).unwrap().unwrap();
/// assert_eq!(identity.user(), "alice");
/// ```
#[derive(Debug)]
pub struct BasicAuthenticator {
    credentials: CredentialStore,
    cache: BoundedCache<String, Decision>,
    validations: AtomicUsize,
}

impl BasicAuthenticator {
    pub fn new(credentials: CredentialStore) -> Self {
        let capacity = credentials.len().saturating_mul(CACHE_SIZE_MULTIPLIER);
        Self::with_cache(credentials, BoundedCache::new(capacity, AUTH_CACHE_TTL))
    }

    /// Uses a caller-provided decision cache, e.g. one driven by a manual clock.
    pub fn with_cache(credentials: CredentialStore, cache: BoundedCache<String, Decision>) -> Self {
        Self {
            credentials,
            cache,
            validations: AtomicUsize::new(0),
        }
    }

    /// Evaluates a raw header value, consulting the cache first.
    pub fn check(&self, header: &str) -> Decision {
        if let Some(decision) = self.cache.get(header) {
            return decision;
        }

        let decision = self.validate(header);
        self.cache.add(header.to_owned(), decision.clone());
        decision
    }

    /// How many headers were decoded and checked, cache hits excluded.
    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::Relaxed)
    }

    fn validate(&self, header: &str) -> Decision {
        self.validations.fetch_add(1, Ordering::Relaxed);

        let (scheme, rest) = header.split_once(' ').ok_or(AuthError::MalformedHeader)?;
        if !scheme.eq_ignore_ascii_case("Basic") {
            return Err(AuthError::UnsupportedScheme);
        }

        let payload = rest.trim_start_matches([' ', '\t']);
        let decoded = STANDARD.decode(payload).map_err(AuthError::BadPayload)?;

        let colon = decoded
            .iter()
            .position(|&b| b == b':')
            .ok_or(AuthError::MissingDelimiter)?;
        let (user, password) = (&decoded[..colon], &decoded[colon + 1..]);

        if bool::from(self.credentials.matches(user, password)) {
            Ok(Identity::new(String::from_utf8_lossy(user)))
        } else {
            Err(AuthError::NoSuchUser)
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, ctx: &Context) -> Option<Decision> {
        let header = ctx.request().headers().get("proxy-authorization")?;
        Some(self.check(header))
    }
}
