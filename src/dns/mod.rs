//! Cached host name resolution.
//!
//! [`DnsCache`] sits in front of a [`Resolve`] backend and remembers the
//! ordered address list for each host for [`DNS_CACHE_TTL`]. Only non-empty
//! answers are stored: a name that fails to resolve, or resolves to nothing,
//! is asked again on the next lookup.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::background::Purge;
use crate::cache::BoundedCache;
use crate::context::Scope;

/// Maximum number of hosts remembered by a [`DnsCache`].
pub const DNS_CACHE_SIZE: usize = 512;

/// How long a resolved address list stays valid.
pub const DNS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A host name resolution backend.
pub trait Resolve: Send + Sync + 'static {
    /// Resolves `host` to its addresses, preserving the backend's order.
    fn resolve(&self, host: &str) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send;
}

/// The platform resolver (`getaddrinfo`), run on tokio's blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        Ok(ips)
    }
}

/// Host to address-list cache over a [`Resolve`] backend.
#[derive(Debug)]
pub struct DnsCache<R = SystemResolver> {
    resolver: R,
    cache: BoundedCache<String, Arc<[IpAddr]>>,
}

impl DnsCache<SystemResolver> {
    pub fn system() -> Self {
        Self::new(SystemResolver)
    }
}

impl<R: Resolve> DnsCache<R> {
    pub fn new(resolver: R) -> Self {
        Self::with_cache(resolver, BoundedCache::new(DNS_CACHE_SIZE, DNS_CACHE_TTL))
    }

    /// Uses a caller-built cache, e.g. one with a manual clock.
    pub fn with_cache(resolver: R, cache: BoundedCache<String, Arc<[IpAddr]>>) -> Self {
        Self { resolver, cache }
    }

    /// Returns the addresses of `host`, resolving on a cache miss.
    ///
    /// The backend call is bounded by `scope`. IP literals are returned as-is.
    /// An empty list is a valid answer; callers decide what it means.
    pub async fn lookup(&self, scope: &Scope, host: &str) -> io::Result<Arc<[IpAddr]>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Arc::from([ip]));
        }

        if let Some(ips) = self.cache.get(host) {
            debug!(host, count = ips.len(), "dns cache hit");
            return Ok(ips);
        }

        debug!(host, "dns cache miss");
        let ips: Arc<[IpAddr]> = scope.run(self.resolver.resolve(host)).await??.into();
        if !ips.is_empty() {
            self.cache.add(host.to_owned(), Arc::clone(&ips));
        }
        Ok(ips)
    }
}

impl<R: Resolve> Purge for DnsCache<R> {
    fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a fixed table and counts backend calls.
    #[derive(Default)]
    struct Table {
        answers: Mutex<Vec<IpAddr>>,
        calls: AtomicUsize,
    }

    impl Table {
        fn answering(ips: &[&str]) -> Self {
            let table = Self::default();
            table.set(ips);
            table
        }

        fn set(&self, ips: &[&str]) {
            *self.answers.lock().unwrap() = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        }
    }

    impl Resolve for Arc<Table> {
        async fn resolve(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers.lock().unwrap().clone())
        }
    }

    struct Stalled;

    impl Resolve for Stalled {
        async fn resolve(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let table = Arc::new(Table::answering(&["10.0.0.2", "10.0.0.1"]));
        let dns = DnsCache::new(Arc::clone(&table));
        let scope = Scope::background();

        let first = dns.lookup(&scope, "example.test").await.unwrap();
        let second = dns.lookup(&scope, "example.test").await.unwrap();

        assert_eq!(&*first, &["10.0.0.2".parse::<IpAddr>().unwrap(), "10.0.0.1".parse().unwrap()]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_expire() {
        let table = Arc::new(Table::answering(&["10.0.0.1"]));
        let clock = Arc::new(ManualClock::new());
        let cache = BoundedCache::new(DNS_CACHE_SIZE, DNS_CACHE_TTL).with_clock(clock.clone());
        let dns = DnsCache::with_cache(Arc::clone(&table), cache);
        let scope = Scope::background();

        dns.lookup(&scope, "example.test").await.unwrap();
        clock.advance(DNS_CACHE_TTL);
        dns.lookup(&scope, "example.test").await.unwrap();

        assert_eq!(table.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_answers_are_not_cached() {
        let table = Arc::new(Table::answering(&[]));
        let dns = DnsCache::new(Arc::clone(&table));
        let scope = Scope::background();

        assert!(dns.lookup(&scope, "flaky.test").await.unwrap().is_empty());
        table.set(&["10.0.0.9"]);
        assert_eq!(dns.lookup(&scope, "flaky.test").await.unwrap().len(), 1);
        assert_eq!(table.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ip_literals_skip_the_backend() {
        let table = Arc::new(Table::default());
        let dns = DnsCache::new(Arc::clone(&table));

        let ips = dns.lookup(&Scope::background(), "::1").await.unwrap();
        assert_eq!(&*ips, &["::1".parse::<IpAddr>().unwrap()]);
        assert_eq!(table.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lookup_honours_deadline() {
        let dns = DnsCache::new(Stalled);
        let scope = Scope::background().with_timeout(Duration::from_millis(20));

        let err = dns.lookup(&scope, "slow.test").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn system_resolver_handles_localhost() {
        let ips = SystemResolver.resolve("localhost").await.unwrap();
        assert!(ips.iter().all(IpAddr::is_loopback));
        assert!(!ips.is_empty());
    }
}
