//! Resource registry keyed by loader identity and parameters.

use futures::FutureExt;
use serde::Serialize;
use std::any::type_name;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::error::ResourceError;
use crate::key::{KeyInput, storage_key};
use crate::loader::LoaderFn;
use crate::resource::{AsyncResource, ErrorSelector, Loader, ResourceHandle, ResourceOptions};
use crate::store::{StorageEntryOptions, Store};
use crate::tags::{Tag, TagPattern};

static GLOBAL: LazyLock<ResourceContext> = LazyLock::new(ResourceContext::new);

/// Options for [`ResourceContext::resource`].
///
/// Only the call that creates a resource applies these; later calls for the
/// same key get the existing resource unchanged.
#[derive(Debug, Clone, Default)]
pub struct GetResourceOptions {
    /// Extra key component, to cache the same loader and parameters twice.
    pub loader_id: Option<String>,
    pub tags: Vec<Tag>,
    /// Refresh the resource this long after each committed load.
    pub auto_refresh: Option<Duration>,
}

impl GetResourceOptions {
    pub fn with_loader_id(mut self, loader_id: impl Into<String>) -> Self {
        self.loader_id = Some(loader_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_auto_refresh(mut self, ttl: Duration) -> Self {
        self.auto_refresh = Some(ttl);
        self
    }
}

/// Which resources [`ResourceContext::refresh_all`] refreshes. Both filters
/// must match; an empty filter selects every resource.
#[derive(Debug, Clone, Default)]
pub struct RefreshFilter {
    /// Glob pattern over resource tags.
    pub tag: Option<Tag>,
    pub error: Option<ErrorSelector>,
}

impl RefreshFilter {
    pub fn tag(tag: impl Into<Tag>) -> Self {
        RefreshFilter {
            tag: Some(tag.into()),
            error: None,
        }
    }

    pub fn error(selector: ErrorSelector) -> Self {
        RefreshFilter {
            tag: None,
            error: Some(selector),
        }
    }
}

/// Caches one resource per (loader, parameters, loader id).
///
/// Most applications use the process-wide [`global`](Self::global) context;
/// separate contexts are useful for isolation in tests.
pub struct ResourceContext {
    store: Store<Arc<dyn ResourceHandle>>,
}

impl ResourceContext {
    /// Create an empty context, independent of the global one.
    pub fn new() -> Self {
        ResourceContext {
            store: Store::new(),
        }
    }

    /// The process-wide context used by [`LoaderFn::resource`] and the free
    /// [`refresh_all`] function, created on first use.
    pub fn global() -> &'static ResourceContext {
        &GLOBAL
    }

    /// The resource for `loader` called with `parameters`, created on first use.
    ///
    /// Fails with [`ResourceError::Serialization`] when the parameters cannot
    /// be serialized into a key, and with [`ResourceError::TypeMismatch`] when
    /// the key is already taken by a resource of another type.
    pub fn resource<A, T>(
        &self,
        loader: &LoaderFn<A, T>,
        parameters: A,
        options: GetResourceOptions,
    ) -> Result<Arc<AsyncResource<T>>, ResourceError>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.get_or_create(loader, parameters, options, |value| value)
    }

    /// Like [`resource`](Self::resource) for parameters that may not be known
    /// yet. `None` yields a fresh, uncached resource loading `None` without
    /// calling the loader.
    pub fn optional_resource<A, T>(
        &self,
        loader: &LoaderFn<A, T>,
        parameters: Option<A>,
        options: GetResourceOptions,
    ) -> Result<Arc<AsyncResource<Option<T>>>, ResourceError>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        match parameters {
            Some(parameters) => self.get_or_create(loader, parameters, options, Some),
            None => {
                let resource = AsyncResource::<Option<T>>::void();
                if let Some(ttl) = options.auto_refresh {
                    let _ = resource.add_ttl(ttl);
                }
                Ok(resource)
            }
        }
    }

    fn get_or_create<A, T, V>(
        &self,
        loader: &LoaderFn<A, T>,
        parameters: A,
        options: GetResourceOptions,
        map: fn(T) -> V,
    ) -> Result<Arc<AsyncResource<V>>, ResourceError>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let key = storage_key(&KeyInput {
            loader: loader.identity(),
            value_type: type_name::<V>(),
            parameters: &parameters,
            loader_id: options.loader_id.as_deref(),
        })?;

        let GetResourceOptions {
            tags, auto_refresh, ..
        } = options;
        let loader = loader.clone();
        let handle = self.store.get_or_set(
            &key,
            move || {
                let load: Loader<V> = Box::new(move || {
                    let future = loader.call(parameters.clone());
                    async move { future.await.map(map) }.boxed()
                });
                let resource: Arc<dyn ResourceHandle> =
                    AsyncResource::from_loader(load, ResourceOptions { ttl: auto_refresh });
                resource
            },
            StorageEntryOptions { tags },
        );

        handle
            .into_any()
            .downcast::<AsyncResource<V>>()
            .map_err(|_| ResourceError::type_mismatch(key, type_name::<V>()))
    }

    /// Every cached resource, or those with a tag matching `pattern`.
    pub fn get_all(&self, pattern: Option<&TagPattern>) -> Vec<Arc<dyn ResourceHandle>> {
        self.store.get_all(pattern)
    }

    /// Cached resources whose current error matches `selector`.
    pub fn find_by_error(&self, selector: &ErrorSelector) -> Vec<Arc<dyn ResourceHandle>> {
        self.store
            .find_by(|resource| resource.is_matching_error(selector))
    }

    /// Refresh every cached resource selected by `filter`, returning how many
    /// were refreshed.
    pub fn refresh_all(&self, filter: &RefreshFilter) -> Result<usize, ResourceError> {
        let pattern = filter.tag.clone().map(TagPattern::new).transpose()?;

        let selected: Vec<_> = self
            .store
            .get_all(pattern.as_ref())
            .into_iter()
            .filter(|resource| {
                filter
                    .error
                    .as_ref()
                    .is_none_or(|selector| resource.is_matching_error(selector))
            })
            .collect();

        for resource in &selected {
            resource.refresh();
        }
        tracing::debug!(
            refreshed = selected.len(),
            pattern = ?pattern.as_ref().map(TagPattern::source),
            "refreshed resources"
        );
        Ok(selected.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Forget every cached resource. Resources still held elsewhere keep
    /// working but are no longer returned or refreshed by this context.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Default for ResourceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContext")
            .field("resources", &self.store.len())
            .finish()
    }
}

/// Refresh resources of the global context matching `filter`.
pub fn refresh_all(filter: &RefreshFilter) -> Result<usize, ResourceError> {
    ResourceContext::global().refresh_all(filter)
}
