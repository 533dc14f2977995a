//! Deadline enforcement for operations that do not observe cancellation.
//!
//! A TLS handshake blocked on a silent peer only wakes up when the socket
//! does. The watchdog holds a duplicate handle of the socket and shuts it
//! down when the caller's scope ends or the timeout elapses, which makes the
//! pending read fail immediately.

use std::net::{Shutdown, TcpStream as StdTcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::Scope;

/// Counts live watchdog tasks; decremented when the task's future is dropped,
/// whether it finished or was aborted.
struct Live(Arc<AtomicUsize>);

impl Live {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle on a spawned watchdog task.
///
/// Call [`retire`](Self::retire) once the guarded operation is over. If the
/// handle is dropped instead (the caller's future was cancelled mid-flight),
/// the task is aborted.
pub(crate) struct Watchdog {
    retire: CancellationToken,
    task: Option<JoinHandle<bool>>,
}

impl Watchdog {
    pub(crate) fn spawn(
        scope: &Scope,
        timeout: Duration,
        socket: StdTcpStream,
        live: &Arc<AtomicUsize>,
    ) -> Self {
        let retire = CancellationToken::new();
        let live = Live::enter(live);
        let scope = scope.clone();
        let retired = retire.clone();

        let task = tokio::spawn(async move {
            let _live = live;
            let reason = tokio::select! {
                biased;
                _ = retired.cancelled() => return false,
                reason = scope.done() => reason.to_string(),
                _ = tokio::time::sleep(timeout) => "timeout elapsed".to_owned(),
            };

            debug!(reason = %reason, "watchdog closing connection");
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(error = %e, "watchdog shutdown failed");
            }
            true
        });

        Self {
            retire,
            task: Some(task),
        }
    }

    /// Stops the watchdog and waits for it to exit.
    ///
    /// Returns `true` if it had already fired and shut the socket down.
    pub(crate) async fn retire(mut self) -> bool {
        self.retire.cancel();
        match self.task.take() {
            Some(task) => task.await.unwrap_or(false),
            None => false,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.retire.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
