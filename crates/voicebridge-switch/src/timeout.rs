//! Named, cancellable, pausable deadlines.
//!
//! Timers tick on a short interval rather than a single `tokio::time::sleep`
//! so that `pause`/`resume` can freeze and restore remaining duration without
//! recomputing a new deadline from scratch.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(50);

struct TimerState {
    remaining_ms: AtomicI64,
    pause_refs: AtomicU32,
    cancelled: AtomicBool,
}

struct Entry {
    state: Arc<TimerState>,
    task: JoinHandle<()>,
}

/// Deadlines keyed by name, scoped to one call. Owned by `RealtimeSession`
/// and torn down via [`clear_all`](Self::clear_all).
#[derive(Clone, Default)]
pub struct TimeoutManager {
    entries: Arc<DashMap<&'static str, Entry>>,
}

impl TimeoutManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `name` for `duration`, replacing any existing timer of the same
    /// name. `on_expire` runs at most once, on the Tokio runtime, and is
    /// skipped entirely if the timer is cleared or the manager is dropped
    /// first.
    pub fn set<F>(&self, name: &'static str, duration: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear(name);

        let state = Arc::new(TimerState {
            remaining_ms: AtomicI64::new(duration.as_millis() as i64),
            pause_refs: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        });
        let worker_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK).await;
                if worker_state.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                if worker_state.pause_refs.load(Ordering::SeqCst) > 0 {
                    continue;
                }
                let tick_ms = TICK.as_millis() as i64;
                let prev = worker_state.remaining_ms.fetch_sub(tick_ms, Ordering::SeqCst);
                if prev <= tick_ms {
                    if !worker_state.cancelled.swap(true, Ordering::SeqCst) {
                        on_expire();
                    }
                    return;
                }
            }
        });

        self.entries.insert(name, Entry { state, task });
    }

    /// Cancel `name`'s timer, if any. Idempotent.
    pub fn clear(&self, name: &str) {
        if let Some((_, entry)) = self.entries.remove(name) {
            entry.state.cancelled.store(true, Ordering::SeqCst);
            entry.task.abort();
        }
    }

    /// Freeze `name`'s remaining duration. Pauses nest: `resume` must be
    /// called once per `pause` before ticking resumes.
    pub fn pause(&self, name: &str) {
        if let Some(entry) = self.entries.get(name) {
            entry.state.pause_refs.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn resume(&self, name: &str) {
        if let Some(entry) = self.entries.get(name) {
            let _ = entry
                .state
                .pause_refs
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
        }
    }

    pub fn is_armed(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Cancel every outstanding timer. Called once, at session teardown.
    pub fn clear_all(&self) {
        let names: Vec<&'static str> = self.entries.iter().map(|e| *e.key()).collect();
        for name in names {
            self.clear(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration_elapses() {
        let mgr = TimeoutManager::new();
        let fired = Arc::new(StdAtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        mgr.set("t", StdDuration::from_millis(200), move || {
            fired2.store(true, Ordering::SeqCst);
        });

        tokio::time::advance(StdDuration::from_millis(250)).await;
        tokio::task::yield_now().await;

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_prevents_firing() {
        let mgr = TimeoutManager::new();
        let fired = Arc::new(StdAtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        mgr.set("t", StdDuration::from_millis(200), move || {
            fired2.store(true, Ordering::SeqCst);
        });
        mgr.clear("t");

        tokio::time::advance(StdDuration::from_millis(250)).await;
        tokio::task::yield_now().await;

        assert!(!fired.load(Ordering::SeqCst));
        assert!(!mgr.is_armed("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_remaining_duration() {
        let mgr = TimeoutManager::new();
        let fired = Arc::new(StdAtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        mgr.set("t", StdDuration::from_millis(150), move || {
            fired2.store(true, Ordering::SeqCst);
        });

        tokio::time::advance(StdDuration::from_millis(100)).await;
        tokio::task::yield_now().await;
        mgr.pause("t");
        tokio::time::advance(StdDuration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));

        mgr.resume("t");
        tokio::time::advance(StdDuration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
