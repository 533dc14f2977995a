//! Background maintenance jobs.
//!
//! Caches drop expired entries lazily on read, which leaves entries for hosts
//! that are never asked for again sitting in memory until LRU pressure pushes
//! them out. A [`Janitor`] sweeps them periodically.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::BoundedCache;

/// Anything holding entries that can be swept once expired.
pub trait Purge: Send + Sync {
    /// Removes expired entries, returning how many were dropped.
    fn purge_expired(&self) -> usize;
}

impl<K, V> Purge for BoundedCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    fn purge_expired(&self) -> usize {
        BoundedCache::purge_expired(self)
    }
}

/// Shortest sweep period a [`Janitor`] accepts.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Periodically purges a [`Purge`] target until cancelled.
pub struct Janitor {
    name: &'static str,
    every: Duration,
    shutdown: CancellationToken,
}

impl Janitor {
    /// Periods below [`MIN_SWEEP_PERIOD`], zero included, are raised to it.
    pub fn new(name: &'static str, every: Duration) -> Self {
        Self {
            name,
            every: every.max(MIN_SWEEP_PERIOD),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Spawns the sweep loop. The first sweep happens one period from now.
    pub fn spawn<P>(self, target: Arc<P>) -> JoinHandle<()>
    where
        P: Purge + ?Sized + 'static,
    {
        info!(job = self.name, every = ?self.every, "starting cache janitor");

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.every;
            let mut interval = tokio::time::interval_at(start, self.every);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        debug!(job = self.name, "cache janitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = target.purge_expired();
                        if removed > 0 {
                            debug!(job = self.name, removed, "purged expired entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    #[tokio::test(start_paused = true)]
    async fn sweeps_until_cancelled() {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(
            BoundedCache::new(8, Duration::from_secs(30)).with_clock(clock.clone()),
        );
        cache.add("stale", 1);
        clock.advance(Duration::from_secs(31));

        let token = CancellationToken::new();
        let handle = Janitor::new("test", Duration::from_secs(60))
            .with_cancellation(token.clone())
            .spawn(Arc::clone(&cache));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_raised_to_minimum() {
        let cache = Arc::new(BoundedCache::<&str, i32>::new(8, Duration::from_secs(30)));
        let token = CancellationToken::new();
        let handle = Janitor::new("zero", Duration::ZERO)
            .with_cancellation(token.clone())
            .spawn(Arc::clone(&cache));

        tokio::time::sleep(MIN_SWEEP_PERIOD * 3).await;
        assert!(!handle.is_finished());

        token.cancel();
        handle.await.unwrap();
    }
}
