//! Resource metadata caches.
//!
//! A [`ResourceMetadataCache`] stores one [`ResourceMetadata`] per
//! (context, resource) and answers "which resources start with this prefix"
//! queries. Two implementations are provided:
//!
//! - [`SharedResourceMetadataCache`] keeps everything in a [`KeyValueStore`]
//!   (Redis in production) so several collectors see the same view while
//!   holding nothing in local memory.
//! - [`InMemoryResourceMetadataCache`] keeps a bounded set of entries in this
//!   process.
//!
//! Both use the [`KeyScheme`](crate::keys::KeyScheme) for their prefix index,
//! so a prefix query returns the same ids regardless of backend.

mod kv;
mod memory;
#[cfg(feature = "redis")]
mod remote;
mod shared;

use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::keys::KeyScheme;
use crate::metadata::ResourceMetadata;
use prometheus::Registry;
use crate::sample::{Context, Resource};

pub use kv::{KeyValueStore, MemoryKeyValueStore, WriteOp};
pub use memory::InMemoryResourceMetadataCache;
#[cfg(feature = "redis")]
pub use remote::RedisKeyValueStore;
pub use shared::SharedResourceMetadataCache;

/// Gauge of entries held by a cache.
pub const CACHE_SIZE_METRIC: &str = "cache_size";
/// Gauge of a cache's capacity, zero when the backend enforces none.
pub const CACHE_MAX_SIZE_METRIC: &str = "cache_max_size";

/// Storage and prefix search for resource metadata.
///
/// Every operation may fail when the backend is unreachable. Failures are
/// returned to the caller unchanged; implementations do not retry.
pub trait ResourceMetadataCache: Send + Sync {
    /// Merges `metadata` into whatever is stored for `(context, resource)`.
    ///
    /// A resource seen for the first time is stored and registered in the
    /// prefix index. For a known resource the stored value is only rewritten
    /// when the merge changed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    fn merge(&self, context: &Context, resource: &Resource, metadata: &ResourceMetadata) -> Result<()>;

    /// Returns the stored metadata, or `None` if never merged or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the entry cannot be decoded.
    fn get(&self, context: &Context, resource: &Resource) -> Result<Option<ResourceMetadata>>;

    /// Removes the stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn delete(&self, context: &Context, resource: &Resource) -> Result<()>;

    /// Ids of the resources whose id starts with the path elements of `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn resource_ids_with_prefix(&self, context: &Context, prefix: &str) -> Result<Vec<String>>;

    /// Approximate number of entries held by the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    fn size(&self) -> Result<u64>;

    /// Capacity of the cache, or zero when the backend enforces none.
    fn max_size(&self) -> u64;
}

impl<C: ResourceMetadataCache + ?Sized> ResourceMetadataCache for Arc<C> {
    fn merge(&self, context: &Context, resource: &Resource, metadata: &ResourceMetadata) -> Result<()> {
        (**self).merge(context, resource, metadata)
    }

    fn get(&self, context: &Context, resource: &Resource) -> Result<Option<ResourceMetadata>> {
        (**self).get(context, resource)
    }

    fn delete(&self, context: &Context, resource: &Resource) -> Result<()> {
        (**self).delete(context, resource)
    }

    fn resource_ids_with_prefix(&self, context: &Context, prefix: &str) -> Result<Vec<String>> {
        (**self).resource_ids_with_prefix(context, prefix)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn max_size(&self) -> u64 {
        (**self).max_size()
    }
}

/// Builds the cache described by `config` and registers its gauges.
///
/// `writer_threads` sizes the Redis connection pool so that every writer
/// thread can hold a connection.
///
/// # Errors
///
/// - [`ConfigError`](crate::error::ConfigError) if `config` is invalid, or
///   names Redis while this crate was built without the `redis` feature
/// - [`RegistryError`](crate::error::RegistryError) if the cache gauges are
///   already registered in `registry`
pub fn from_config(
    config: &CacheConfig,
    writer_threads: usize,
    registry: &Registry,
) -> Result<Arc<dyn ResourceMetadataCache>> {
    config.validate()?;
    match config {
        CacheConfig::Memory { max_entries } => Ok(Arc::new(InMemoryResourceMetadataCache::new(
            *max_entries,
            KeyScheme::default(),
            registry,
        )?)),
        #[cfg(feature = "redis")]
        CacheConfig::Redis { hostname, port } => {
            let store = RedisKeyValueStore::connect(hostname, *port, writer_threads)?;
            Ok(Arc::new(SharedResourceMetadataCache::new(
                Arc::new(store),
                KeyScheme::default(),
                registry,
            )?))
        }
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis { hostname, port } => {
            let _ = writer_threads;
            Err(crate::error::ConfigError::InvalidEndpoint {
                reason: format!("{hostname}:{port}: built without the `redis` feature"),
            }
            .into())
        }
    }
}
