//! Per-host TLS client configuration store.
//!
//! Building a [`ClientConfig`] (root store, provider, resumption cache) is far
//! more expensive than a handshake's worth of lookups, and reusing one config
//! per host is what makes session resumption work at all. [`TlsConfigStore`]
//! keeps one config per host for [`TLS_CONFIG_TTL`].
//!
//! Lookups of already-built hosts only touch the cache. A miss takes the
//! store's build lock and checks again before building, so concurrent first
//! requests for a host end up sharing one config instance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustls::client::Resumption;
use rustls::{ClientConfig, RootCertStore};
use thiserror::Error;
use tracing::debug;

use crate::cache::BoundedCache;

mod verifier;

use verifier::SkipVerification;

/// Maximum number of hosts with a cached config.
pub const TLS_CONFIG_CACHE_SIZE: usize = 512;

/// How long a built config is handed out before being rebuilt.
pub const TLS_CONFIG_TTL: Duration = Duration::from_secs(10 * 60);

/// Sessions remembered per config for resumption.
const SESSION_CACHE_SIZE: usize = 64;

/// Errors produced while building a client config.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("cannot build TLS client config: {0}")]
    Build(#[from] rustls::Error),
}

/// Host to [`ClientConfig`] store with a single build per host.
pub struct TlsConfigStore {
    configs: BoundedCache<String, Arc<ClientConfig>>,
    build_lock: Mutex<()>,
    skip_verify: bool,
    builds: AtomicUsize,
}

impl TlsConfigStore {
    /// Creates an empty store.
    ///
    /// With `skip_verify` set, configs accept any server certificate.
    pub fn new(skip_verify: bool) -> Self {
        Self::with_cache(
            skip_verify,
            BoundedCache::new(TLS_CONFIG_CACHE_SIZE, TLS_CONFIG_TTL),
        )
    }

    pub fn with_cache(skip_verify: bool, configs: BoundedCache<String, Arc<ClientConfig>>) -> Self {
        Self {
            configs,
            build_lock: Mutex::new(()),
            skip_verify,
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns the config for `host`, building it on first use.
    pub fn get(&self, host: &str) -> Result<Arc<ClientConfig>, TlsConfigError> {
        if let Some(config) = self.configs.get(host) {
            return Ok(config);
        }

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = self.configs.get(host) {
            return Ok(config);
        }

        let config = Arc::new(self.build()?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.configs.add(host.to_owned(), Arc::clone(&config));
        debug!(host, skip_verify = self.skip_verify, "built TLS client config");

        Ok(config)
    }

    /// Number of configs built over the store's lifetime.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    fn build(&self) -> Result<ClientConfig, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;

        let mut config = if self.skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipVerification::new(provider)))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };
        config.resumption = Resumption::in_memory_sessions(SESSION_CACHE_SIZE);

        Ok(config)
    }
}

impl std::fmt::Debug for TlsConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfigStore")
            .field("skip_verify", &self.skip_verify)
            .field("builds", &self.builds())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn concurrent_first_use_builds_once() {
        const CALLERS: usize = 16;
        let store = TlsConfigStore::new(false);
        let barrier = Barrier::new(CALLERS);

        let configs: Vec<Arc<ClientConfig>> = thread::scope(|s| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.get("example.com").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(store.builds(), 1);
        assert!(configs.iter().all(|c| Arc::ptr_eq(c, &configs[0])));
    }

    #[test]
    fn hosts_get_separate_configs() {
        let store = TlsConfigStore::new(true);
        let a = store.get("a.example").unwrap();
        let b = store.get("b.example").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &store.get("a.example").unwrap()));
        assert_eq!(store.builds(), 2);
    }

    #[test]
    fn expired_config_is_rebuilt() {
        let clock = Arc::new(ManualClock::new());
        let cache = BoundedCache::new(TLS_CONFIG_CACHE_SIZE, TLS_CONFIG_TTL).with_clock(clock.clone());
        let store = TlsConfigStore::with_cache(false, cache);

        let old = store.get("example.com").unwrap();
        clock.advance(TLS_CONFIG_TTL);
        let new = store.get("example.com").unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(store.builds(), 2);
    }
}
