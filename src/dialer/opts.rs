//! Static dialer options.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::context::Scope;

/// Per-operation timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// DNS sweep period applied when none is configured.
pub const DEFAULT_CLEANUP_DNS_EVERY: Duration = Duration::from_secs(5 * 60);

/// Options for [`Dialer`](super::Dialer).
///
/// Zero durations mean "use the default", so a partially filled config file
/// behaves like the defaults for the missing parts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_proxy::dialer::DialerOptions;
///
/// let opts = DialerOptions::new()
///     .timeout(Duration::from_secs(5))
///     .tls_skip_verify(true);
///
/// assert_eq!(opts.get_timeout(), Duration::from_secs(5));
/// assert_eq!(opts.get_cleanup_dns_every(), Duration::from_secs(300));
/// ```
///
/// Durations are given in seconds when deserializing:
///
/// ```text
/// { "timeout": 5, "cleanup_dns_every": 60, "tls_skip_verify": false }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DialerOptions {
    #[serde(skip)]
    scope: Option<Scope>,
    #[serde(deserialize_with = "seconds")]
    timeout: Duration,
    #[serde(deserialize_with = "seconds")]
    cleanup_dns_every: Duration,
    tls_skip_verify: bool,
}

impl DialerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parent scope for background work started by the dialer.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn cleanup_dns_every(mut self, every: Duration) -> Self {
        self.cleanup_dns_every = every;
        self
    }

    #[must_use]
    pub fn tls_skip_verify(mut self, skip: bool) -> Self {
        self.tls_skip_verify = skip;
        self
    }

    /// The configured scope, or a background scope that is never cancelled.
    pub fn get_scope(&self) -> Scope {
        self.scope.clone().unwrap_or_default()
    }

    pub fn get_timeout(&self) -> Duration {
        non_zero_or(self.timeout, DEFAULT_TIMEOUT)
    }

    pub fn get_cleanup_dns_every(&self) -> Duration {
        non_zero_or(self.cleanup_dns_every, DEFAULT_CLEANUP_DNS_EVERY)
    }

    pub fn get_tls_skip_verify(&self) -> bool {
        self.tls_skip_verify
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = DialerOptions::new();
        assert_eq!(opts.get_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(opts.get_cleanup_dns_every(), DEFAULT_CLEANUP_DNS_EVERY);
        assert!(!opts.get_tls_skip_verify());
        assert!(!opts.get_scope().is_done());
    }

    #[test]
    fn deserialize_partial() {
        let opts: DialerOptions =
            serde_json::from_str(r#"{ "timeout": 2.5, "tls_skip_verify": true }"#).unwrap();
        assert_eq!(opts.get_timeout(), Duration::from_millis(2500));
        assert_eq!(opts.get_cleanup_dns_every(), DEFAULT_CLEANUP_DNS_EVERY);
        assert!(opts.get_tls_skip_verify());
    }

    #[test]
    fn zero_means_default() {
        let opts: DialerOptions = serde_json::from_str(r#"{ "timeout": 0 }"#).unwrap();
        assert_eq!(opts.get_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn negative_duration_is_rejected() {
        assert!(serde_json::from_str::<DialerOptions>(r#"{ "timeout": -1 }"#).is_err());
    }
}
