//! Cancellation and deadline propagation for outbound operations.

use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a scoped operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for io::Error {
    fn from(reason: Interrupted) -> Self {
        let kind = match reason {
            Interrupted::Cancelled => io::ErrorKind::Interrupted,
            Interrupted::DeadlineExceeded => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, reason)
    }
}

/// The caller's side of an outbound operation: a cancellation token plus an
/// optional deadline.
///
/// A default `Scope` is never cancelled and has no deadline. Deadlines only
/// ever tighten: [`with_deadline`](Self::with_deadline) keeps the earlier of
/// the two instants.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_proxy::context::Scope;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scope = Scope::background().with_timeout(Duration::from_secs(5));
/// assert!(scope.deadline().is_some());
///
/// scope.cancel();
/// assert!(scope.is_done());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// A scope that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wraps an existing token, e.g. a server-wide shutdown token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Returns a scope bounded by the earlier of the current deadline and `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Shorthand for `with_deadline(Instant::now() + timeout)`.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A scope cancelled together with this one but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Some` once the scope is cancelled or past its deadline.
    pub fn interrupted(&self) -> Option<Interrupted> {
        if self.token.is_cancelled() {
            Some(Interrupted::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Interrupted::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.interrupted().is_some()
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupted {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => Interrupted::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interrupted::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Interrupted::Cancelled
            }
        }
    }

    /// Drives `fut` to completion unless the scope ends first.
    ///
    /// When the scope wins, `fut` is dropped, which closes any socket it owns.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if let Some(reason) = self.interrupted() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            out = fut => Ok(out),
            reason = self.done() => Err(reason),
        }
    }
}
