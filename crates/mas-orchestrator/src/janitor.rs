use crate::store::TaskStore;
use crate::types::Task;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically evicts terminal tasks whose last update is older than the TTL.
///
/// Eviction re-checks the predicate under the store's write lock, so a task
/// is only removed while it is terminal; terminal states are final, which
/// makes that check stable.
#[derive(Clone)]
pub struct Janitor {
    store: Arc<TaskStore>,
    ttl: Duration,
    interval: Duration,
}

impl Janitor {
    /// Janitor evicting tasks older than `ttl`, sweeping every `interval`.
    pub fn new(store: Arc<TaskStore>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval,
        }
    }

    /// Retention of terminal tasks.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sweep period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep now. Returns the number of evicted tasks.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Run one sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let evicted = self
            .store
            .enumerate()
            .into_iter()
            .filter(|task| is_expired(task, now, ttl))
            .filter_map(|task| {
                self.store
                    .delete_if(task.id, |current| is_expired(current, now, ttl))
            })
            .count();

        if evicted > 0 {
            info!(evicted, remaining = self.store.len(), "Janitor: evicted expired tasks");
        } else {
            debug!("Janitor: nothing to evict");
        }
        evicted
    }

    /// Spawn the sweep loop on the current runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Sweep every interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        // `interval` panics on a zero period.
        let period = self.interval.max(Duration::from_millis(1));
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        timer.tick().await;

        info!(
            ttl_ms = self.ttl.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "Janitor: started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    self.sweep();
                }
            }
        }
        info!("Janitor: stopped");
    }
}

fn is_expired(task: &Task, now: DateTime<Utc>, ttl: Duration) -> bool {
    if !task.is_terminal() {
        return false;
    }
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(task.updated_at) >= ttl,
        // A TTL too large to represent never expires.
        Err(_) => false,
    }
}
