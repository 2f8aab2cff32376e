//! Persistence and indexing collaborators.
//!
//! The writer hands every chunk either to a [`SampleRepository`] (full
//! insert) or to an [`Indexer`] (index-only). Both are implemented outside
//! this crate for the real sample store; this module provides the traits, an
//! indexer over a [`ResourceMetadataCache`], and a repository adapter that
//! indexes after persisting.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::ResourceMetadataCache;
use crate::error::Result;
use crate::metadata::ResourceMetadata;
use crate::sample::{Context, Resource, Sample};

/// Durable storage for samples.
pub trait SampleRepository: Send + Sync {
    /// Persists `samples`. Implementations are expected to index them too.
    ///
    /// # Errors
    ///
    /// Returns an error if the samples could not be stored.
    fn insert(&self, samples: &[Sample]) -> Result<()>;
}

/// Searchable index over the resources and metrics seen in samples.
pub trait Indexer: Send + Sync {
    /// Indexes `samples` without persisting them.
    ///
    /// # Errors
    ///
    /// Returns an error if the index could not be updated.
    fn update(&self, samples: &[Sample]) -> Result<()>;
}

impl<R: SampleRepository + ?Sized> SampleRepository for Arc<R> {
    fn insert(&self, samples: &[Sample]) -> Result<()> {
        (**self).insert(samples)
    }
}

impl<I: Indexer + ?Sized> Indexer for Arc<I> {
    fn update(&self, samples: &[Sample]) -> Result<()> {
        (**self).update(samples)
    }
}

/// [`Indexer`] that records resource metadata in a [`ResourceMetadataCache`].
///
/// Each chunk is folded into one [`ResourceMetadata`] per (context, resource):
/// every metric name seen plus the resource's attributes. Each is then merged
/// into the cache, so resources already known with the same facts cost one
/// read and no write.
#[derive(Debug)]
pub struct CacheIndexer<C> {
    cache: C,
}

impl<C: ResourceMetadataCache> CacheIndexer<C> {
    /// Creates an indexer writing into `cache`.
    pub fn new(cache: C) -> Self {
        Self { cache }
    }

    /// The cache this indexer writes into.
    pub fn cache(&self) -> &C {
        &self.cache
    }
}

/// Groups `samples` by (context, resource id), preserving first-seen order.
fn collect_metadata(samples: &[Sample]) -> Vec<(&Context, &Resource, ResourceMetadata)> {
    let mut positions: HashMap<(&str, &str), usize> = HashMap::new();
    let mut grouped: Vec<(&Context, &Resource, ResourceMetadata)> = Vec::new();

    for sample in samples {
        let key = (sample.context.id(), sample.resource.id());
        let slot = *positions.entry(key).or_insert_with(|| {
            grouped.push((&sample.context, &sample.resource, ResourceMetadata::new()));
            grouped.len() - 1
        });
        let metadata = &mut grouped[slot].2;
        metadata.put_metric(sample.name.as_str());
        if let Some(attributes) = sample.resource.attributes() {
            for (k, v) in attributes {
                metadata.put_attribute(k.as_str(), v.as_str());
            }
        }
    }
    grouped
}

impl<C: ResourceMetadataCache> Indexer for CacheIndexer<C> {
    fn update(&self, samples: &[Sample]) -> Result<()> {
        for (context, resource, metadata) in collect_metadata(samples) {
            self.cache.merge(context, resource, &metadata)?;
        }
        Ok(())
    }
}

/// [`SampleRepository`] that persists through `repository` and then indexes
/// the same samples through `indexer`.
///
/// Indexing only runs once the insert succeeded, so the index never names a
/// resource whose samples were rejected.
#[derive(Debug)]
pub struct IndexingRepository<R, I> {
    repository: R,
    indexer: I,
}

impl<R: SampleRepository, I: Indexer> IndexingRepository<R, I> {
    /// Combines `repository` and `indexer`.
    pub fn new(repository: R, indexer: I) -> Self {
        Self {
            repository,
            indexer,
        }
    }
}

impl<R: SampleRepository, I: Indexer> SampleRepository for IndexingRepository<R, I> {
    fn insert(&self, samples: &[Sample]) -> Result<()> {
        self.repository.insert(samples)?;
        self.indexer.update(samples)
    }
}
