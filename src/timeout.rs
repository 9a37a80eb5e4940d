//! A single timer realizing the earliest of several registered timeouts.
//!
//! All timeouts are measured from a shared epoch that is reset by
//! [`ConsolidatedTimeout::start`]. Only the shortest registered duration can
//! fire, and at most one timer task is alive at any time.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Callback = Arc<dyn Fn() + Send + Sync>;

struct TimeoutState {
    epoch: Instant,
    /// Registered durations in whole milliseconds.
    durations: BTreeSet<u64>,
    running: Option<JoinHandle<()>>,
    /// Bumped whenever the armed timer is replaced or cancelled.
    generation: u64,
}

struct TimeoutInner {
    callback: Callback,
    state: Mutex<TimeoutState>,
}

/// Consolidates several timeouts into one timer firing at the nearest deadline.
///
/// A fired timeout does not re-arm itself: call [`start`](Self::start) again to
/// measure the registered durations from a new epoch.
pub struct ConsolidatedTimeout {
    inner: Arc<TimeoutInner>,
}

/// Handle that unregisters a duration added with
/// [`ConsolidatedTimeout::add_timeout`].
pub struct RemoveTimeout {
    inner: Weak<TimeoutInner>,
    millis: u64,
}

impl RemoveTimeout {
    /// Remove the duration and re-arm the timer for the remaining ones.
    pub fn remove(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.state.lock().durations.remove(&self.millis);
        TimeoutInner::schedule(&inner);
    }
}

impl ConsolidatedTimeout {
    /// Create a timeout calling `callback` when the nearest deadline passes.
    ///
    /// The epoch starts now; nothing is armed until a duration is added.
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        ConsolidatedTimeout {
            inner: Arc::new(TimeoutInner {
                callback: Arc::new(callback),
                state: Mutex::new(TimeoutState {
                    epoch: Instant::now(),
                    durations: BTreeSet::new(),
                    running: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Reset the epoch to now and arm the timer for the shortest duration.
    pub fn start(&self) {
        self.inner.state.lock().epoch = Instant::now();
        TimeoutInner::schedule(&self.inner);
    }

    /// Register a duration, measured from the current epoch.
    ///
    /// If the epoch is already further in the past than `timeout`, the callback
    /// runs before this method returns.
    pub fn add_timeout(&self, timeout: Duration) -> RemoveTimeout {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.inner.state.lock().durations.insert(millis);
        TimeoutInner::schedule(&self.inner);

        RemoveTimeout {
            inner: Arc::downgrade(&self.inner),
            millis,
        }
    }

    /// Cancel the armed timer, keeping the registered durations.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        if let Some(running) = state.running.take() {
            running.abort();
        }
    }

    /// Whether a timer task is currently waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().running.is_some()
    }

    /// Whether the shortest registered duration has elapsed since the epoch.
    ///
    /// A callback can use this to tell a stale fire apart from a real one:
    /// after [`start`](Self::start) resets the epoch, a timer that was already
    /// on its way out is no longer due.
    pub fn is_due(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .durations
            .first()
            .is_some_and(|&ms| state.epoch.elapsed() >= Duration::from_millis(ms))
    }

    /// Registered durations, shortest first.
    pub fn durations(&self) -> Vec<Duration> {
        self.inner
            .state
            .lock()
            .durations
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

impl Drop for ConsolidatedTimeout {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TimeoutInner {
    fn schedule(this: &Arc<Self>) {
        let fire_now = {
            let mut state = this.state.lock();
            state.generation += 1;
            if let Some(running) = state.running.take() {
                running.abort();
            }

            let Some(&shortest) = state.durations.first() else {
                return;
            };

            let remaining = Duration::from_millis(shortest).saturating_sub(state.epoch.elapsed());
            if remaining.is_zero() {
                true
            } else {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        let generation = state.generation;
                        let weak = Arc::downgrade(this);
                        tracing::trace!(remaining_ms = remaining.as_millis() as u64, "arming timeout");
                        state.running = Some(runtime.spawn(async move {
                            tokio::time::sleep(remaining).await;
                            if let Some(inner) = weak.upgrade() {
                                inner.fire(generation);
                            }
                        }));
                    }
                    Err(_) => {
                        tracing::warn!(
                            remaining_ms = remaining.as_millis() as u64,
                            "no tokio runtime available, timeout not armed"
                        );
                    }
                }
                false
            }
        };

        if fire_now {
            tracing::trace!("timeout already due, firing immediately");
            (this.callback)();
        }
    }

    fn fire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.running = None;
        }
        tracing::trace!("timeout fired");
        (self.callback)();
    }
}
