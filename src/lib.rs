//! swr-resource - keyed async resources with reactive invalidation
//!
//! This library caches the results of async loader functions:
//! - One [`AsyncResource`] per (loader, parameters, loader id), shared by every caller
//! - Observable value, error and state cells that only notify on change
//! - Version-gated loads: a refreshed load can never overwrite a newer result
//! - TTL auto-refresh measured from the last committed load
//! - Tag and error based bulk invalidation with glob patterns
//!
//! # Example
//!
//! ```ignore
//! use swr_resource::{GetResourceOptions, LoaderFn, RefreshFilter, refresh_all};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let fetch_user = LoaderFn::new(|id: u64| async move {
//!         Ok::<_, std::io::Error>(format!("user {id}"))
//!     });
//!
//!     let user = fetch_user
//!         .resource(
//!             42,
//!             GetResourceOptions::default()
//!                 .with_tag("users/42")
//!                 .with_auto_refresh(Duration::from_secs(60)),
//!         )
//!         .unwrap();
//!
//!     let _unbind = user.value().observe(|value| println!("user changed: {value:?}"));
//!     user.load().await;
//!
//!     // Every resource tagged below "users" goes back to Void.
//!     refresh_all(&RefreshFilter::tag("users/**")).unwrap();
//! }
//! ```

mod context;
mod error;
mod eventual;
mod key;
mod loader;
mod observable;
mod resource;
mod store;
mod tags;
mod timeout;

pub use context::{GetResourceOptions, RefreshFilter, ResourceContext, refresh_all};
pub use error::{LoaderError, ResourceError};
pub use eventual::EventualValue;
pub use key::{KeyInput, LoaderIdentity, storage_key};
pub use loader::LoaderFn;
pub use observable::{ObservableValue, Unbind};
pub use resource::{
    AsyncResource, ErrorSelector, LoadFuture, ResourceHandle, ResourceOptions, ResourceState,
};
pub use store::{StorageEntry, StorageEntryOptions, Store};
pub use tags::{Tag, TagPattern, Tags};
pub use timeout::{ConsolidatedTimeout, RemoveTimeout};
