//! The lifecycle of one loader's asynchronous result.
//!
//! An [`AsyncResource`] moves through `Void -> Loading -> Loaded | Error` and
//! back to `Void` on [`refresh`](AsyncResource::refresh). Every load captures a
//! version number; a result is only committed when no refresh happened since
//! the load started, so a slow superseded load can never overwrite the result
//! of a newer one.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::{LoaderError, ResourceError};
use crate::eventual::EventualValue;
use crate::observable::{Listeners, ObservableValue, Unbind};
use crate::timeout::{ConsolidatedTimeout, RemoveTimeout};

pub(crate) type Loader<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, LoaderError>> + Send + Sync>;

/// Completes once the load it was returned for is committed or discarded.
///
/// Cloning is cheap and every clone resolves at the same time.
pub type LoadFuture = Shared<BoxFuture<'static, ()>>;

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Nothing loaded yet, or refreshed.
    Void,
    Loading,
    Loaded,
    Error,
}

/// Selects resources by their current error.
#[derive(Clone)]
pub enum ErrorSelector {
    /// Any set error.
    Any,
    /// Only this exact error allocation.
    Specific(LoaderError),
}

impl std::fmt::Debug for ErrorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSelector::Any => f.write_str("Any"),
            ErrorSelector::Specific(error) => write!(f, "Specific({error})"),
        }
    }
}

/// Options for constructing an [`AsyncResource`].
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    /// Refresh the resource this long after each committed load.
    pub ttl: Option<Duration>,
}

struct LoadState {
    version: u64,
    in_flight: Option<LoadFuture>,
}

type Notification = Box<dyn FnOnce() + Send>;

/// Observer and refresh listener calls queued by transitions.
#[derive(Default)]
struct NotificationQueue {
    pending: VecDeque<Notification>,
    draining: bool,
}

/// Resets the draining flag if an observer panics mid-drain.
struct Draining<'a> {
    queue: &'a Mutex<NotificationQueue>,
    finished: bool,
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.queue.lock().draining = false;
        }
    }
}

/// A cached asynchronous computation and its observable state.
///
/// At most one of [`value`](Self::value) and [`error`](Self::error) is set, and
/// [`state`](Self::state) always agrees with which one it is.
///
/// Loads run on the Tokio runtime: [`load`](Self::load) must be called from
/// within one.
///
/// Transitions update the cells under an internal lock; observers and refresh
/// listeners run afterwards, in transition order, with no lock held. When
/// another thread is already delivering notifications for this resource, that
/// thread delivers the new ones too and the call returns without waiting.
pub struct AsyncResource<T> {
    loader: Loader<T>,
    weak_self: Weak<AsyncResource<T>>,
    value: ObservableValue<EventualValue<T>>,
    value_with_cache: ObservableValue<EventualValue<T>>,
    error: ObservableValue<EventualValue<dyn std::error::Error + Send + Sync>>,
    state: ObservableValue<ResourceState>,
    load_state: Mutex<LoadState>,
    /// Serializes load start, commit and refresh. Re-entrant so that a TTL
    /// firing synchronously from a commit can refresh.
    transition: ReentrantMutex<()>,
    notifications: Mutex<NotificationQueue>,
    refresh_listeners: Listeners<Arc<AsyncResource<T>>>,
    auto_refresh: ConsolidatedTimeout,
}

impl<T> AsyncResource<T>
where
    T: Send + Sync + 'static,
{
    /// Create a resource around `loader`.
    ///
    /// The loader is called once per load. Any error type convertible into a
    /// boxed error is accepted; it is stored as a shared [`LoaderError`].
    pub fn new<F, Fut, E>(loader: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::with_options(loader, ResourceOptions::default())
    }

    /// Create a resource around `loader`, refreshing it automatically when
    /// `options.ttl` is set.
    pub fn with_options<F, Fut, E>(loader: F, options: ResourceOptions) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let loader: Loader<T> = Box::new(move || {
            let future = loader();
            async move { future.await.map_err(into_loader_error) }.boxed()
        });
        Self::from_loader(loader, options)
    }

    pub(crate) fn from_loader(loader: Loader<T>, options: ResourceOptions) -> Arc<Self> {
        let resource = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_for_timeout = weak.clone();
            AsyncResource {
                loader,
                weak_self: weak.clone(),
                value: ObservableValue::new(EventualValue::Empty),
                value_with_cache: ObservableValue::new(EventualValue::Empty),
                error: ObservableValue::new(EventualValue::Empty),
                state: ObservableValue::new(ResourceState::Void),
                load_state: Mutex::new(LoadState {
                    version: 0,
                    in_flight: None,
                }),
                transition: ReentrantMutex::new(()),
                notifications: Mutex::new(NotificationQueue::default()),
                refresh_listeners: Listeners::new(),
                auto_refresh: ConsolidatedTimeout::new(move || {
                    if let Some(resource) = weak_for_timeout.upgrade() {
                        resource.expire();
                    }
                }),
            }
        });

        if let Some(ttl) = options.ttl {
            // Kept for the resource's lifetime.
            let _ = resource.add_ttl(ttl);
        }
        resource
    }

    /// The loaded value. Cleared by [`refresh`](Self::refresh).
    pub fn value(&self) -> &ObservableValue<EventualValue<T>> {
        &self.value
    }

    /// The last committed value. Not cleared by refresh, so it can be shown
    /// while a newer value loads.
    pub fn value_with_cache(&self) -> &ObservableValue<EventualValue<T>> {
        &self.value_with_cache
    }

    /// The error of the last committed load, if it failed.
    pub fn error(&self) -> &ObservableValue<EventualValue<dyn std::error::Error + Send + Sync>> {
        &self.error
    }

    /// Lifecycle state, updated with every transition.
    pub fn state(&self) -> &ObservableValue<ResourceState> {
        &self.state
    }

    /// Start loading unless a result is set or a load is already running.
    ///
    /// The returned future completes when the load is committed or discarded.
    /// It does not need to be awaited: the load runs on its own task.
    pub fn load(&self) -> LoadFuture {
        self.transition(|| {
            if self.has_result() {
                return settled();
            }
            if let Some(in_flight) = self.load_state.lock().in_flight.clone() {
                return in_flight;
            }
            let Some(this) = self.weak_self.upgrade() else {
                return settled();
            };

            let version = {
                let mut load_state = self.load_state.lock();
                load_state.version += 1;
                load_state.version
            };
            tracing::debug!(version, "loading resource");

            let loader_future =
                match std::panic::catch_unwind(AssertUnwindSafe(|| (self.loader)())) {
                    Ok(future) => future,
                    Err(panic) => {
                        let error = panic_error(panic);
                        async move { Err(error) }.boxed()
                    }
                };

            let task = tokio::spawn(async move {
                let result = match AssertUnwindSafe(loader_future).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(panic_error(panic)),
                };
                this.commit(version, result);
            });

            let in_flight: LoadFuture = async move {
                let _ = task.await;
            }
            .boxed()
            .shared();

            self.load_state.lock().in_flight = Some(in_flight.clone());
            self.queue_update(&self.state, ResourceState::Loading);
            in_flight
        })
    }

    /// Drop any result and invalidate any running load, returning to `Void`.
    ///
    /// Refresh listeners are notified afterwards; they typically call
    /// [`load`](Self::load) again.
    pub fn refresh(&self) {
        self.transition(|| self.refresh_locked());
    }

    /// Call `handler` after every refresh.
    pub fn on_refresh(
        &self,
        handler: impl Fn(&Arc<AsyncResource<T>>) + Send + Sync + 'static,
    ) -> Unbind {
        self.refresh_listeners.add(handler)
    }

    /// Refresh automatically `ttl` after each committed load.
    ///
    /// With several TTLs the shortest one wins.
    pub fn add_ttl(&self, ttl: Duration) -> RemoveTimeout {
        self.auto_refresh.add_timeout(ttl)
    }

    /// Whether the current error is selected by `selector`. Always false while
    /// no error is set.
    pub fn is_matching_error(&self, selector: &ErrorSelector) -> bool {
        self.error.with(|error| match (error.get(), selector) {
            (None, _) => false,
            (Some(_), ErrorSelector::Any) => true,
            (Some(error), ErrorSelector::Specific(expected)) => {
                std::ptr::addr_eq(Arc::as_ptr(error), Arc::as_ptr(expected))
            }
        })
    }

    fn has_result(&self) -> bool {
        self.value.with(EventualValue::is_set) || self.error.with(EventualValue::is_set)
    }

    /// Run `f` under the transition lock, then deliver what it queued.
    fn transition<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _transition = self.transition.lock();
            f()
        };
        // Nested transitions leave delivery to the outermost one.
        if !self.transition.is_owned_by_current_thread() {
            self.notify();
        }
        result
    }

    fn queue_update<V>(&self, cell: &ObservableValue<V>, value: V)
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        if let Some(update) = cell.replace_value(value) {
            self.notifications
                .lock()
                .pending
                .push_back(Box::new(move || update.notify()));
        }
    }

    fn notify(&self) {
        {
            let mut queue = self.notifications.lock();
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        let mut draining = Draining {
            queue: &self.notifications,
            finished: false,
        };

        loop {
            let next = {
                let mut queue = self.notifications.lock();
                match queue.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        queue.draining = false;
                        draining.finished = true;
                        return;
                    }
                }
            };
            next();
        }
    }

    fn refresh_locked(&self) {
        let version = {
            let mut load_state = self.load_state.lock();
            load_state.version += 1;
            load_state.in_flight = None;
            load_state.version
        };
        self.auto_refresh.stop();
        tracing::debug!(version, "refreshing resource");

        self.queue_update(&self.value, EventualValue::Empty);
        self.queue_update(&self.error, EventualValue::Empty);
        self.queue_update(&self.state, ResourceState::Void);

        if let Some(this) = self.weak_self.upgrade() {
            let mut queue = self.notifications.lock();
            for listener in self.refresh_listeners.snapshot() {
                let this = Arc::clone(&this);
                queue.pending.push_back(Box::new(move || listener(&this)));
            }
        }
    }

    fn commit(&self, version: u64, result: Result<T, LoaderError>) {
        self.transition(|| {
            {
                let mut load_state = self.load_state.lock();
                if load_state.version != version {
                    tracing::debug!(
                        version,
                        current = load_state.version,
                        "discarding result of superseded load"
                    );
                    return;
                }
                load_state.in_flight = None;
            }

            match result {
                Ok(value) => {
                    tracing::debug!(version, "resource loaded");
                    let value = EventualValue::set(value);
                    self.queue_update(&self.value_with_cache, value.clone());
                    self.queue_update(&self.value, value);
                    self.queue_update(&self.state, ResourceState::Loaded);
                }
                Err(error) => {
                    tracing::debug!(version, %error, "resource load failed");
                    self.queue_update(&self.error, EventualValue::from_arc(error));
                    self.queue_update(&self.state, ResourceState::Error);
                }
            }

            self.auto_refresh.start();
        });
    }

    /// TTL expiry. A load in flight is left alone, and so is a result
    /// committed after the timer that fired was armed.
    fn expire(&self) {
        self.transition(|| {
            let settled = matches!(
                self.state.value(),
                ResourceState::Loaded | ResourceState::Error
            );
            if settled && self.auto_refresh.is_due() {
                tracing::debug!("resource expired");
                self.refresh_locked();
            }
        });
    }
}

impl<T> AsyncResource<Option<T>>
where
    T: Send + Sync + 'static,
{
    /// A resource that loads `None` immediately; stands in for a resource
    /// whose parameters are not available yet.
    pub fn void() -> Arc<Self> {
        Self::new(|| async { Ok::<_, ResourceError>(None) })
    }
}

impl<T> std::fmt::Debug for AsyncResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResource")
            .field("state", &self.state.with(|state| *state))
            .field("version", &self.load_state.lock().version)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of an [`AsyncResource`], as kept in a resource store.
pub trait ResourceHandle: Send + Sync {
    fn load(&self) -> LoadFuture;

    fn refresh(&self);

    fn state(&self) -> ResourceState;

    fn is_matching_error(&self, selector: &ErrorSelector) -> bool;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> ResourceHandle for AsyncResource<T>
where
    T: Send + Sync + 'static,
{
    fn load(&self) -> LoadFuture {
        AsyncResource::load(self)
    }

    fn refresh(&self) {
        AsyncResource::refresh(self)
    }

    fn state(&self) -> ResourceState {
        self.state.value()
    }

    fn is_matching_error(&self, selector: &ErrorSelector) -> bool {
        AsyncResource::is_matching_error(self, selector)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub(crate) fn into_loader_error<E>(error: E) -> LoaderError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boxed: Box<dyn std::error::Error + Send + Sync> = error.into();
    LoaderError::from(boxed)
}

fn settled() -> LoadFuture {
    futures::future::ready(()).boxed().shared()
}

fn panic_error(panic: Box<dyn Any + Send>) -> LoaderError {
    let message = if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    };
    tracing::warn!(%message, "loader panicked");
    Arc::new(ResourceError::LoaderPanicked(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LOADING_TIME: u64 = 10_000;

    #[derive(Debug, thiserror::Error)]
    #[error("Whoops")]
    struct Whoops;

    /// A loader counting its calls and producing "#n call" after `delay_ms`.
    fn counting_loader(
        calls: Arc<AtomicUsize>,
        delay_ms: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, Result<String, Whoops>> + Send + Sync + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = delay_ms.load(Ordering::SeqCst) as u64;
            async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(format!("#{n} call"))
            }
            .boxed()
        }
    }

    fn resource() -> (Arc<AsyncResource<String>>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Arc::new(AtomicUsize::new(LOADING_TIME as usize));
        let resource = AsyncResource::new(counting_loader(calls.clone(), delay.clone()));
        (resource, calls, delay)
    }

    fn error_resource() -> Arc<AsyncResource<String>> {
        AsyncResource::new(|| async {
            tokio::time::sleep(Duration::from_millis(LOADING_TIME)).await;
            Err::<String, _>(Whoops)
        })
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn loaded_value<T: Clone + Send + Sync + 'static>(resource: &AsyncResource<T>) -> Option<T> {
        resource.value().value().get().map(|v| (**v).clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_triggers_loader() {
        let (resource, calls, _) = resource();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let _ = resource.load();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.state().value(), ResourceState::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_twice_triggers_loader_once() {
        let (resource, calls, _) = resource();

        let _ = resource.load();
        advance(LOADING_TIME / 2).await;
        let _ = resource.load();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(LOADING_TIME).await;
        let _ = resource.load();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(loaded_value(&resource), Some("#1 call".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_future_resolves_after_commit() {
        let (resource, _, _) = resource();

        resource.load().await;
        assert_eq!(resource.state().value(), ResourceState::Loaded);
        assert_eq!(loaded_value(&resource), Some("#1 call".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_load_is_discarded() {
        let (resource, _, delay) = resource();

        delay.store(50, Ordering::SeqCst);
        let _ = resource.load();
        advance(10).await;
        resource.refresh();

        delay.store(20, Ordering::SeqCst);
        let _ = resource.load();
        advance(20).await;
        assert_eq!(loaded_value(&resource), Some("#2 call".to_string()));

        // the first load resolves now and must not overwrite the second
        advance(50).await;
        assert_eq!(loaded_value(&resource), Some("#2 call".to_string()));
        assert_eq!(resource.state().value(), ResourceState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_during_loading_aborts_result() {
        let (resource, _, _) = resource();

        let _ = resource.load();
        advance(LOADING_TIME / 2).await;
        resource.refresh();
        advance(LOADING_TIME).await;

        assert!(!resource.value().value().is_set());
        assert!(!resource.error().value().is_set());
        assert_eq!(resource.state().value(), ResourceState::Void);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_lifecycle() {
        let (resource, _, _) = resource();
        assert!(!resource.value().value().is_set());

        resource.load().await;
        assert_eq!(loaded_value(&resource), Some("#1 call".to_string()));

        resource.refresh();
        assert!(!resource.value().value().is_set());
        assert_eq!(resource.state().value(), ResourceState::Void);

        resource.load().await;
        assert_eq!(loaded_value(&resource), Some("#2 call".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_with_cache_survives_refresh() {
        let (resource, _, _) = resource();

        resource.load().await;
        resource.refresh();

        let cached = resource.value_with_cache().value();
        assert_eq!(cached.get().map(|v| v.as_str()), Some("#1 call"));

        resource.load().await;
        let cached = resource.value_with_cache().value();
        assert_eq!(cached.get().map(|v| v.as_str()), Some("#2 call"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_set_after_failing_load() {
        let resource = error_resource();
        assert!(!resource.error().value().is_set());

        resource.load().await;
        let error = resource.error().value();
        assert_eq!(error.get().map(|e| e.to_string()), Some("Whoops".to_string()));
        assert!(!resource.value().value().is_set());
        assert_eq!(resource.state().value(), ResourceState::Error);

        resource.refresh();
        assert!(!resource.error().value().is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_value_are_mutually_exclusive() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let fail_clone = fail.clone();
        let resource = AsyncResource::new(move || {
            let fail = fail_clone.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(Whoops)
                } else {
                    Ok("recovered".to_string())
                }
            }
        });

        resource.load().await;
        assert!(!resource.value().value().is_set());
        assert!(resource.error().value().is_set());

        fail.store(false, Ordering::SeqCst);
        resource.refresh();
        resource.load().await;
        assert!(resource.value().value().is_set());
        assert!(!resource.error().value().is_set());
        assert_eq!(resource.state().value(), ResourceState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_load_is_not_retried_until_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let resource = AsyncResource::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(Whoops) }
        });

        resource.load().await;
        resource.load().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_matching_error() {
        let resource = error_resource();
        assert!(!resource.is_matching_error(&ErrorSelector::Any));

        resource.load().await;
        let stored = resource.error().value().get().cloned().unwrap();
        let other: LoaderError = Arc::new(Whoops);

        assert!(resource.is_matching_error(&ErrorSelector::Any));
        assert!(resource.is_matching_error(&ErrorSelector::Specific(stored)));
        assert!(!resource.is_matching_error(&ErrorSelector::Specific(other)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions_are_observed_once_each() {
        let (resource, _, _) = resource();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _unbind = resource
            .state()
            .observe(move |state| seen_clone.lock().push(*state));

        resource.load().await;
        resource.refresh();
        resource.refresh();

        assert_eq!(
            *seen.lock(),
            vec![
                ResourceState::Loading,
                ResourceState::Loaded,
                ResourceState::Void
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_listener_can_reload() {
        let (resource, calls, _) = resource();
        let _unbind = resource.on_refresh(|resource| {
            let _ = resource.load();
        });

        resource.load().await;
        resource.refresh();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resource.state().value(), ResourceState::Loading);

        advance(LOADING_TIME).await;
        assert_eq!(loaded_value(&resource), Some("#2 call".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbound_refresh_listener_is_not_called() {
        let (resource, _, _) = resource();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let unbind = resource.on_refresh(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        resource.refresh();
        unbind.unbind();
        resource.refresh();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_refreshes_after_load_completes() {
        let (resource, _, _) = resource();
        let _ttl = resource.add_ttl(Duration::from_millis(1000));

        resource.load().await;
        assert_eq!(resource.state().value(), ResourceState::Loaded);

        // measured from the commit, not from the load start or construction
        advance(999).await;
        assert_eq!(resource.state().value(), ResourceState::Loaded);
        advance(1).await;
        assert_eq!(resource.state().value(), ResourceState::Void);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_restarts_on_reload() {
        let (resource, _, delay) = resource();
        delay.store(0, Ordering::SeqCst);
        let _ttl = resource.add_ttl(Duration::from_millis(1000));

        resource.load().await;
        advance(1000).await;
        assert_eq!(resource.state().value(), ResourceState::Void);

        advance(300).await;
        resource.load().await;
        advance(999).await;
        assert_eq!(resource.state().value(), ResourceState::Loaded);
        advance(1).await;
        assert_eq!(resource.state().value(), ResourceState::Void);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_cancels_ttl_until_next_load() {
        let (resource, _, delay) = resource();
        delay.store(0, Ordering::SeqCst);
        let refreshes = Arc::new(AtomicUsize::new(0));
        let refreshes_clone = refreshes.clone();
        let _unbind = resource.on_refresh(move |_| {
            refreshes_clone.fetch_add(1, Ordering::SeqCst);
        });
        let _ttl = resource.add_ttl(Duration::from_millis(1000));

        resource.load().await;
        advance(500).await;
        resource.refresh();
        advance(5000).await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_does_not_interrupt_running_load() {
        let (resource, _, _) = resource();
        let _ttl = resource.add_ttl(Duration::from_millis(1000));

        // the armed timer measures from construction, the load is still running
        let _ = resource.load();
        advance(1000).await;
        assert_eq!(resource.state().value(), ResourceState::Loading);

        advance(LOADING_TIME - 500).await;
        assert_eq!(resource.state().value(), ResourceState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_option() {
        let resource = AsyncResource::with_options(
            || async { Ok::<_, Whoops>(1u32) },
            ResourceOptions {
                ttl: Some(Duration::from_millis(200)),
            },
        );

        resource.load().await;
        advance(200).await;
        assert_eq!(resource.state().value(), ResourceState::Void);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_loader_sets_error() {
        let resource = AsyncResource::new(|| async {
            if true {
                panic!("loader exploded");
            }
            Ok::<u32, Whoops>(1)
        });

        resource.load().await;
        let error = resource.error().value();
        assert_eq!(
            error.get().map(|e| e.to_string()),
            Some("loader panicked: loader exploded".to_string())
        );
        assert_eq!(resource.state().value(), ResourceState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_void_resource_loads_none() {
        let resource = AsyncResource::<Option<String>>::void();

        resource.load().await;
        let value = resource.value().value();
        assert!(value.is_set());
        assert_eq!(value.get().map(|v| v.is_none()), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fire_after_newer_commit_is_ignored() {
        let (resource, _, delay) = resource();
        delay.store(0, Ordering::SeqCst);
        let _ttl = resource.add_ttl(Duration::from_millis(1000));

        resource.load().await;
        advance(600).await;
        resource.refresh();
        resource.load().await;

        // a fire racing the second commit finds the countdown restarted
        resource.expire();
        assert_eq!(resource.state().value(), ResourceState::Loaded);
        assert_eq!(loaded_value(&resource), Some("#2 call".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fire_during_reload_keeps_the_load() {
        let (resource, calls, _) = resource();
        let _ttl = resource.add_ttl(Duration::from_millis(1000));

        resource.load().await;
        advance(1000).await;
        assert_eq!(resource.state().value(), ResourceState::Void);

        let _ = resource.load();
        resource.expire();
        assert_eq!(resource.state().value(), ResourceState::Loading);

        advance(LOADING_TIME).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(loaded_value(&resource), Some("#2 call".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observers_see_transitions_in_order() {
        let (resource, _, _) = resource();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _unbind = resource.state().observe(move |state| seen_clone.lock().push(*state));
        let _reload = resource.on_refresh(|resource| {
            let _ = resource.load();
        });

        resource.load().await;
        resource.refresh();
        advance(LOADING_TIME).await;

        assert_eq!(
            *seen.lock(),
            vec![
                ResourceState::Loading,
                ResourceState::Loaded,
                ResourceState::Void,
                ResourceState::Loading,
                ResourceState::Loaded
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_observers_refreshing_each_other_do_not_deadlock() {
        let a = AsyncResource::new(|| async { Ok::<_, Whoops>(1u32) });
        let b = AsyncResource::new(|| async { Ok::<_, Whoops>(2u32) });
        let both_loaded = Arc::new(std::sync::Barrier::new(2));
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        for (this, other) in [(&a, &b), (&b, &a)] {
            let other = Arc::downgrade(other);
            let both_loaded = both_loaded.clone();
            let done_tx = done_tx.clone();
            let _ = this.value().observe(move |value| {
                if value.is_set() {
                    // both commits are delivering at this point
                    both_loaded.wait();
                    if let Some(other) = other.upgrade() {
                        other.refresh();
                    }
                    let _ = done_tx.send(());
                }
            });
        }

        let _ = a.load();
        let _ = b.load();

        let finished = tokio::task::spawn_blocking(move || {
            (0..2).all(|_| done_rx.recv_timeout(Duration::from_secs(5)).is_ok())
        })
        .await
        .unwrap();
        assert!(finished);
        assert_eq!(a.state().value(), ResourceState::Void);
        assert_eq!(b.state().value(), ResourceState::Void);
    }
}
