//! Outbound connection establishment.
//!
//! [`Dialer`] turns a `(host, port)` pair into a TCP connection and, for
//! HTTPS targets, upgrades it to TLS. It owns one DNS cache and one TLS
//! config store, so repeated connections to the same upstream skip both the
//! lookup and the config build.
//!
//! ## Dialing
//!
//! Resolved addresses are tried one at a time, in resolver order; the first
//! connection that succeeds wins. Only the last failure is reported. The
//! whole dial, lookup included, is bounded by the tighter of the caller's
//! deadline and the configured timeout.
//!
//! ## TLS upgrade
//!
//! Each upgrade runs alongside a watchdog task that shuts the socket down if
//! the caller's scope ends or the timeout elapses first. The watchdog is
//! retired before `upgrade_to_tls` returns, on every path.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::background::Janitor;
use crate::context::Scope;
use crate::dns::{DnsCache, Resolve, SystemResolver};
use crate::http::Request;
use crate::tls::{TlsConfigError, TlsConfigStore};

mod opts;
mod watchdog;

pub use opts::{DEFAULT_CLEANUP_DNS_EVERY, DEFAULT_TIMEOUT, DialerOptions};

use watchdog::Watchdog;

/// A TLS client stream over a dialed TCP connection.
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Errors produced while establishing an upstream connection.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("cannot resolve IPs of {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no IPs found for {host}")]
    NoIps { host: String },

    #[error("cannot dial to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid TLS server name {host:?}")]
    InvalidServerName { host: String },

    #[error(transparent)]
    TlsConfig(#[from] TlsConfigError),

    #[error("cannot perform TLS handshake with {host}: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },
}

/// Connects to upstream hosts with cached DNS and TLS configs.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_proxy::context::Scope;
/// use rttp_proxy::dialer::{Dialer, DialerOptions};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let dialer = Dialer::new(DialerOptions::new());
/// let scope = Scope::background();
///
/// let tcp = dialer.dial(&scope, "example.com", 443).await?;
/// let tls = dialer.upgrade_to_tls(&scope, tcp, "example.com").await?;
/// # drop(tls);
/// # Ok(())
/// # }
/// ```
pub struct Dialer<R = SystemResolver> {
    dns: Arc<DnsCache<R>>,
    tls_configs: TlsConfigStore,
    timeout: Duration,
    cleanup_dns_every: Duration,
    scope: Scope,
    live_watchdogs: Arc<AtomicUsize>,
}

impl Dialer<SystemResolver> {
    /// A dialer backed by the platform resolver.
    pub fn new(opts: DialerOptions) -> Self {
        Self::with_resolver(opts, SystemResolver)
    }
}

impl<R: Resolve> Dialer<R> {
    pub fn with_resolver(opts: DialerOptions, resolver: R) -> Self {
        Self {
            dns: Arc::new(DnsCache::new(resolver)),
            tls_configs: TlsConfigStore::new(opts.get_tls_skip_verify()),
            timeout: opts.get_timeout(),
            cleanup_dns_every: opts.get_cleanup_dns_every(),
            scope: opts.get_scope(),
            live_watchdogs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opens a TCP connection to `host:port`.
    ///
    /// # Errors
    ///
    /// - [`DialError::Resolve`]: the lookup failed or ran out of time.
    /// - [`DialError::NoIps`]: the host resolved to nothing.
    /// - [`DialError::Connect`]: every address failed; carries the last error.
    pub async fn dial(&self, scope: &Scope, host: &str, port: u16) -> Result<TcpStream, DialError> {
        let scope = scope.clone().with_timeout(self.timeout);

        let ips = self
            .dns
            .lookup(&scope, host)
            .await
            .map_err(|source| DialError::Resolve {
                host: host.to_owned(),
                source,
            })?;

        if ips.is_empty() {
            return Err(DialError::NoIps {
                host: host.to_owned(),
            });
        }

        let mut last_error = None;
        for ip in ips.iter() {
            let addr = SocketAddr::new(*ip, port);
            match scope.run(connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!(host, %addr, "connected");
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(host, %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
                Err(reason) => {
                    last_error = Some(reason.into());
                    break;
                }
            }
        }

        Err(DialError::Connect {
            host: host.to_owned(),
            source: last_error.unwrap_or_else(|| io::Error::other("no address attempted")),
        })
    }

    /// Performs a TLS client handshake over `conn` for server name `host`.
    ///
    /// A handshake cut short by the watchdog surfaces as
    /// [`DialError::Handshake`]; check the scope to tell a timeout or
    /// cancellation apart from a TLS failure.
    pub async fn upgrade_to_tls(
        &self,
        scope: &Scope,
        conn: TcpStream,
        host: &str,
    ) -> Result<TlsStream, DialError> {
        let handshake_error = |source: io::Error| DialError::Handshake {
            host: host.to_owned(),
            source,
        };

        let config = self.tls_configs.get(host)?;
        let server_name =
            ServerName::try_from(host.to_owned()).map_err(|_| DialError::InvalidServerName {
                host: host.to_owned(),
            })?;

        let (conn, kill_switch) = with_kill_switch(conn).map_err(handshake_error)?;
        let watchdog = Watchdog::spawn(scope, self.timeout, kill_switch, &self.live_watchdogs);

        let result = TlsConnector::from(config).connect(server_name, conn).await;
        let fired = watchdog.retire().await;

        match result {
            Ok(stream) if !fired => Ok(stream),
            Ok(_) => Err(handshake_error(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection closed by watchdog",
            ))),
            Err(e) => Err(handshake_error(e)),
        }
    }

    /// Rewrites an absolute-form `http://` request target to origin-form.
    ///
    /// Some upstream servers reject absolute-form targets on a plain
    /// connection. The dropped authority becomes the `Host` header when the
    /// request has none. Other requests are left alone.
    pub fn patch_http_request(&self, req: &mut Request) {
        let is_plain_http = req
            .scheme()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"));
        if !is_plain_http {
            return;
        }

        let authority = req.authority().map(str::to_owned);
        let relative = req.path_and_query().into_owned();
        req.set_target(relative);

        match authority {
            Some(authority) if !req.headers().contains("host") => {
                req.headers_mut().insert("Host", authority);
            }
            _ => {}
        }
    }

    /// Starts sweeping expired DNS entries every `cleanup_dns_every`.
    ///
    /// The job stops when the options scope is cancelled.
    pub fn spawn_dns_cleanup(&self) -> JoinHandle<()> {
        Janitor::new("dns-cleanup", self.cleanup_dns_every)
            .with_cancellation(self.scope.token().clone())
            .spawn(Arc::clone(&self.dns))
    }

    /// Number of watchdog tasks currently alive.
    pub fn active_watchdogs(&self) -> usize {
        self.live_watchdogs.load(Ordering::SeqCst)
    }

    pub fn tls_configs(&self) -> &TlsConfigStore {
        &self.tls_configs
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

async fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Splits off a second handle on the socket for the watchdog to shut down.
fn with_kill_switch(conn: TcpStream) -> io::Result<(TcpStream, std::net::TcpStream)> {
    let conn = conn.into_std()?;
    let kill_switch = conn.try_clone()?;
    Ok((TcpStream::from_std(conn)?, kill_switch))
}
