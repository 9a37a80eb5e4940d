use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::context::{GetResourceOptions, ResourceContext};
use crate::error::{LoaderError, ResourceError};
use crate::key::LoaderIdentity;
use crate::resource::{AsyncResource, into_loader_error};

type BoxedLoader<A, T> = dyn Fn(A) -> BoxFuture<'static, Result<T, LoaderError>> + Send + Sync;

/// A shareable loader function taking parameters of type `A`.
///
/// Resources are cached per loader: clones of one `LoaderFn` share cached
/// resources, while two `LoaderFn`s wrapping identical closures do not.
pub struct LoaderFn<A, T> {
    inner: Arc<BoxedLoader<A, T>>,
}

impl<A, T> Clone for LoaderFn<A, T> {
    fn clone(&self) -> Self {
        LoaderFn {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> LoaderFn<A, T>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new<F, Fut, E>(loader: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        LoaderFn {
            inner: Arc::new(move |parameters: A| {
                let future = loader(parameters);
                async move { future.await.map_err(into_loader_error) }.boxed()
            }),
        }
    }

    pub fn identity(&self) -> LoaderIdentity {
        LoaderIdentity::of(Arc::as_ptr(&self.inner))
    }

    /// Call the loader directly, bypassing any cache.
    pub fn call(&self, parameters: A) -> BoxFuture<'static, Result<T, LoaderError>> {
        (self.inner)(parameters)
    }

    /// The cached resource for `parameters` in the global context.
    pub fn resource(
        &self,
        parameters: A,
        options: GetResourceOptions,
    ) -> Result<Arc<AsyncResource<T>>, ResourceError> {
        ResourceContext::global().resource(self, parameters, options)
    }

    /// Like [`resource`](Self::resource), but `None` parameters yield a
    /// resource that loads `None` without calling the loader.
    pub fn optional_resource(
        &self,
        parameters: Option<A>,
        options: GetResourceOptions,
    ) -> Result<Arc<AsyncResource<Option<T>>>, ResourceError> {
        ResourceContext::global().optional_resource(self, parameters, options)
    }
}

impl<A, T> std::fmt::Debug for LoaderFn<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoaderFn")
            .field(&Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}
