//! Keyed debounce timers.
//!
//! Arming a key schedules an action after the interval; re-arming before it
//! fires replaces the pending action and restarts the clock. Timers compose
//! with a shutdown token so nothing fires after the owner is torn down.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

pub struct Debouncer<K> {
    interval: Duration,
    timers: Arc<DashMap<K, (u64, CancellationToken)>>,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timers: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedule `action` for `key`, cancelling whatever was pending for it.
    pub fn arm(&self, key: K, action: impl FnOnce() + Send + 'static) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Outside a runtime there is no clock to wait on.
            action();
            return;
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        if let Some((_, previous)) = self.timers.insert(key.clone(), (seq, token.clone())) {
            previous.cancel();
        }

        let timers = Arc::clone(&self.timers);
        let interval = self.interval;
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    timers.remove_if(&key, |_, (current, _)| *current == seq);
                    action();
                }
            }
        });
    }

    /// Drop the pending action for `key`, if any.
    pub fn cancel(&self, key: &K) {
        if let Some((_, (_, token))) = self.timers.remove(key) {
            token.cancel();
        }
    }

    /// Number of keys with an action still waiting to fire.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every pending action and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.timers.clear();
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
