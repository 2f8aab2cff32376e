//! Metadata cache kept entirely in a shared key-value store.
//!
//! # Write path
//!
//! `merge` reads the stored metadata first:
//!
//! - absent: the metadata and one list push per prefix depth (see
//!   [`KeyScheme`]) go to the store as one atomic group, so an index entry
//!   never points at a missing metadata key and metadata never lacks its
//!   index entries;
//! - present: the incoming metadata is merged into the stored copy and the
//!   copy is written back only if the merge changed it.
//!
//! The second branch is a read-modify-write without a transaction. Two
//! collectors merging different facts into the same existing resource at the
//! same moment can lose one contribution until it is merged again. Metadata
//! converges because collectors resubmit what they see on every cycle.
//!
//! # Known limitation
//!
//! `delete` removes the metadata key only. Index lists keep the stale
//! reference, so prefix queries can return ids whose metadata is gone.

use std::collections::HashSet;
use std::sync::Arc;

use prometheus::Registry;

use super::kv::{KeyValueStore, WriteOp};
use super::{CACHE_MAX_SIZE_METRIC, CACHE_SIZE_METRIC, ResourceMetadataCache};
use crate::error::Result;
use crate::keys::KeyScheme;
use crate::metadata::ResourceMetadata;
use crate::metrics;
use crate::sample::{Context, Resource};

/// [`ResourceMetadataCache`] backed by a [`KeyValueStore`].
#[derive(Debug)]
pub struct SharedResourceMetadataCache<S> {
    store: Arc<S>,
    keys: KeyScheme,
}

impl<S: KeyValueStore + 'static> SharedResourceMetadataCache<S> {
    /// Creates a cache over `store` and registers `cache_size` and `cache_max_size`.
    ///
    /// `cache_size` reports the number of keys in the store (metadata plus
    /// index lists), or zero while the store is unreachable. `cache_max_size`
    /// is always zero: the store enforces no ceiling.
    ///
    /// # Errors
    ///
    /// Returns a registry error if the cache gauges are already registered.
    pub fn new(store: Arc<S>, keys: KeyScheme, registry: &Registry) -> Result<Self> {
        let observed = Arc::downgrade(&store);
        metrics::register_sampled_gauge(
            registry,
            CACHE_SIZE_METRIC,
            "Keys held in the shared metadata store",
            move || {
                let Some(store) = observed.upgrade() else {
                    return 0;
                };
                store.key_count().map_or_else(
                    |e| {
                        tracing::debug!(error = %e, "cache size unavailable");
                        0
                    },
                    metrics::gauge_value,
                )
            },
        )?;
        metrics::register_constant_gauge(
            registry,
            CACHE_MAX_SIZE_METRIC,
            "Maximum entries in the shared metadata store, zero when unbounded",
            0,
        )?;

        Ok(Self { store, keys })
    }
}

impl<S> SharedResourceMetadataCache<S> {
    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: KeyValueStore> ResourceMetadataCache for SharedResourceMetadataCache<S> {
    fn merge(&self, context: &Context, resource: &Resource, metadata: &ResourceMetadata) -> Result<()> {
        let key = self.keys.metadata_key(context, resource);

        match self.get(context, resource)? {
            None => {
                let index_keys = self.keys.index_keys(context, resource);
                let mut ops = Vec::with_capacity(index_keys.len() + 1);
                ops.push(WriteOp::Set {
                    key: key.clone(),
                    value: metadata.to_bytes()?,
                });
                ops.extend(index_keys.into_iter().map(|index_key| WriteOp::ListPush {
                    key: index_key,
                    value: key.clone(),
                }));
                self.store.apply_atomic(&ops)?;
                tracing::debug!(context = %context, resource = resource.id(), "indexed new resource");
            }
            Some(mut existing) => {
                if existing.merge(metadata) {
                    self.store.set(&key, &existing.to_bytes()?)?;
                }
            }
        }
        Ok(())
    }

    fn get(&self, context: &Context, resource: &Resource) -> Result<Option<ResourceMetadata>> {
        let key = self.keys.metadata_key(context, resource);
        self.store
            .get(&key)?
            .map(|bytes| ResourceMetadata::from_bytes(&bytes))
            .transpose()
    }

    fn delete(&self, context: &Context, resource: &Resource) -> Result<()> {
        self.store.delete(&self.keys.metadata_key(context, resource))
    }

    fn resource_ids_with_prefix(&self, context: &Context, prefix: &str) -> Result<Vec<String>> {
        let entries = self.store.list(&self.keys.prefix_key(context, prefix))?;
        let mut seen = HashSet::with_capacity(entries.len());
        let mut ids: Vec<String> = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = self.keys.resource_id(context, &entry)?;
            // Racing first inserts can push the same key twice.
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn size(&self) -> Result<u64> {
        self.store.key_count()
    }

    fn max_size(&self) -> u64 {
        0
    }
}
