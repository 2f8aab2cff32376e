//! Bounded metadata cache held in this process.
//!
//! Suitable for a single collector. Entries are evicted oldest-inserted first
//! once `max_entries` is reached. Unlike the shared cache, eviction and
//! `delete` also remove the resource from the prefix index, which is cheap
//! when the index lives next to the entries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::Registry;

use super::{CACHE_MAX_SIZE_METRIC, CACHE_SIZE_METRIC, ResourceMetadataCache};
use crate::error::{ConfigError, Result};
use crate::keys::KeyScheme;
use crate::metadata::ResourceMetadata;
use crate::metrics;
use crate::sample::{Context, Resource};

/// Identity of a cached resource: (context id, resource id).
type EntryKey = (String, String);

#[derive(Debug)]
struct Entry {
    generation: u64,
    metadata: ResourceMetadata,
    index_keys: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EntryKey, Entry>,
    /// Insertion order for eviction. Records of deleted entries linger until
    /// [`compact_order`](Self::compact_order) or eviction skips them.
    order: VecDeque<(u64, EntryKey)>,
    /// Prefix index: index key -> resource ids, oldest first.
    index: HashMap<Vec<u8>, Vec<String>>,
    next_generation: u64,
}

impl Inner {
    fn unindex(&mut self, resource_id: &str, index_keys: &[Vec<u8>]) {
        for key in index_keys {
            if let Some(ids) = self.index.get_mut(key) {
                ids.retain(|id| id != resource_id);
                if ids.is_empty() {
                    self.index.remove(key);
                }
            }
        }
    }

    fn remove(&mut self, key: &EntryKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.unindex(&key.1, &entry.index_keys);
        Some(entry)
    }

    fn is_live(&self, generation: u64, key: &EntryKey) -> bool {
        self.entries.get(key).map(|e| e.generation) == Some(generation)
    }

    /// Drops order records of deleted entries once more than `slack` of them pile up.
    fn compact_order(&mut self, slack: usize) {
        if self.order.len() <= self.entries.len().saturating_add(slack) {
            return;
        }
        let mut order = std::mem::take(&mut self.order);
        order.retain(|(generation, key)| self.is_live(*generation, key));
        self.order = order;
    }

    /// Evicts the oldest live entry. Returns `false` if there was none.
    fn evict_oldest(&mut self) -> bool {
        while let Some((generation, key)) = self.order.pop_front() {
            if self.is_live(generation, &key) {
                self.remove(&key);
                tracing::debug!(context = %key.0, resource = %key.1, "evicted resource metadata");
                return true;
            }
        }
        false
    }
}

/// [`ResourceMetadataCache`] that keeps at most `max_entries` resources in memory.
#[derive(Debug)]
pub struct InMemoryResourceMetadataCache {
    inner: Arc<RwLock<Inner>>,
    keys: KeyScheme,
    max_entries: u64,
}

impl InMemoryResourceMetadataCache {
    /// Creates a cache and registers `cache_size` and `cache_max_size`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCacheSize`] if `max_entries` is zero, or
    /// a registry error if the cache gauges are already registered.
    pub fn new(max_entries: u64, keys: KeyScheme, registry: &Registry) -> Result<Self> {
        if max_entries == 0 {
            return Err(ConfigError::InvalidCacheSize { count: max_entries }.into());
        }

        let inner = Arc::new(RwLock::new(Inner::default()));
        let observed = Arc::downgrade(&inner);
        metrics::register_sampled_gauge(
            registry,
            CACHE_SIZE_METRIC,
            "Resources held by the in-process metadata cache",
            move || {
                observed
                    .upgrade()
                    .map_or(0, |inner| metrics::gauge_value(inner.read().entries.len()))
            },
        )?;
        metrics::register_constant_gauge(
            registry,
            CACHE_MAX_SIZE_METRIC,
            "Maximum resources held by the in-process metadata cache",
            metrics::gauge_value(max_entries),
        )?;

        Ok(Self {
            inner,
            keys,
            max_entries,
        })
    }

    fn entry_key(context: &Context, resource: &Resource) -> EntryKey {
        (context.id().to_string(), resource.id().to_string())
    }

    fn order_slack(&self) -> usize {
        usize::try_from(self.max_entries).unwrap_or(usize::MAX)
    }
}

impl ResourceMetadataCache for InMemoryResourceMetadataCache {
    fn merge(&self, context: &Context, resource: &Resource, metadata: &ResourceMetadata) -> Result<()> {
        let key = Self::entry_key(context, resource);
        let mut inner = self.inner.write();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.metadata.merge(metadata);
            return Ok(());
        }

        while inner.entries.len() as u64 >= self.max_entries {
            if !inner.evict_oldest() {
                break;
            }
        }

        let index_keys = self.keys.index_keys(context, resource);
        for index_key in &index_keys {
            inner
                .index
                .entry(index_key.clone())
                .or_default()
                .push(key.1.clone());
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.order.push_back((generation, key.clone()));
        inner.entries.insert(
            key,
            Entry {
                generation,
                metadata: metadata.clone(),
                index_keys,
            },
        );
        Ok(())
    }

    fn get(&self, context: &Context, resource: &Resource) -> Result<Option<ResourceMetadata>> {
        let key = Self::entry_key(context, resource);
        Ok(self
            .inner
            .read()
            .entries
            .get(&key)
            .map(|entry| entry.metadata.clone()))
    }

    fn delete(&self, context: &Context, resource: &Resource) -> Result<()> {
        let key = Self::entry_key(context, resource);
        let mut inner = self.inner.write();
        if inner.remove(&key).is_some() {
            inner.compact_order(self.order_slack());
        }
        Ok(())
    }

    fn resource_ids_with_prefix(&self, context: &Context, prefix: &str) -> Result<Vec<String>> {
        let key = self.keys.prefix_key(context, prefix);
        Ok(self
            .inner
            .read()
            .index
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.inner.read().entries.len() as u64)
    }

    fn max_size(&self) -> u64 {
        self.max_entries
    }
}
