//! # spool
//!
//! Non-blocking batch writer and resource metadata cache for time-series
//! ingestion.
//!
//! spool sits between metric collectors and a sample store. Collectors hand
//! it batches of samples and return immediately; a bounded pool of writer
//! threads persists them in chunks. When the store falls behind, new batches
//! are dropped and counted instead of stalling collection. Alongside the
//! writer, a resource metadata cache records which metrics and attributes
//! each resource carries and answers "which resources live under this path"
//! queries.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Publishing never blocks: a batch is queued or dropped, nothing else
//! - Each queued batch is processed by exactly one worker
//! - Bounded memory: at most `ring_buffer_size` batches are queued or in
//!   progress at once
//! - One failing chunk never takes down a worker or the rest of its batch
//! - Metadata caches shared between processes (Redis) or held in-process
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use spool::{
//!     AsyncBatchWriter, CacheIndexer, Context, InMemoryResourceMetadataCache, KeyScheme,
//!     Resource, ResourceMetadataCache, Sample, WriterConfig,
//! };
//! use spool::indexer::SampleRepository;
//!
//! struct Discard;
//! impl SampleRepository for Discard {
//!     fn insert(&self, _: &[Sample]) -> spool::Result<()> { Ok(()) }
//! }
//!
//! # fn main() -> spool::Result<()> {
//! let registry = prometheus::Registry::new();
//! let cache = Arc::new(InMemoryResourceMetadataCache::new(1024, KeyScheme::default(), &registry)?);
//!
//! let writer = AsyncBatchWriter::new(
//!     &WriterConfig::default(),
//!     Arc::new(Discard),
//!     Arc::new(CacheIndexer::new(Arc::clone(&cache))),
//!     &registry,
//! )?;
//!
//! // Index-only batches go straight to the metadata cache.
//! let eth0 = Resource::new("snmp:1:eth0");
//! writer.index_only(vec![Sample::new(1_700_000_000_000, eth0, "ifInOctets", 42.0)]);
//! writer.drain_and_halt();
//!
//! let ids = cache.resource_ids_with_prefix(&Context::default(), "snmp:1")?;
//! assert_eq!(ids, vec!["snmp:1:eth0"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`AsyncBatchWriter`]: Non-blocking publish, worker pool, overload shedding
//! - [`ResourceMetadataCache`]: Metadata merge/get/delete and prefix search
//! - [`SharedResourceMetadataCache`]: Cache kept in a [`KeyValueStore`]
//! - [`InMemoryResourceMetadataCache`]: Bounded cache held in this process
//!
//! ## Modules
//!
//! - [`writer`]: Batch writer and worker pool
//! - [`ring`]: Bounded MPMC work queue under the writer
//! - [`batch`]: Batch envelopes and chunking
//! - [`indexer`]: Repository and indexer collaborator traits
//! - [`cache`]: Metadata cache implementations and key-value stores
//! - [`keys`]: Cache key layout and resource id splitting
//! - [`metadata`]: Resource metadata and its byte encoding
//! - [`sample`]: Samples, resources and contexts
//! - [`config`]: JSON configuration
//! - [`metrics`]: Prometheus gauges and counters registered by the components
//! - [`ratelimit`]: Rate limiter for error logs
//! - [`error`]: Error types

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod metadata;
pub mod metrics;
pub mod ratelimit;
pub mod ring;
pub mod sample;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use cache::{
    InMemoryResourceMetadataCache, KeyValueStore, MemoryKeyValueStore, ResourceMetadataCache,
    SharedResourceMetadataCache,
};
#[cfg(feature = "redis")]
pub use cache::RedisKeyValueStore;
pub use config::{CacheConfig, SpoolConfig, WriterConfig};
pub use error::{Result, SpoolError};
pub use indexer::{CacheIndexer, Indexer, IndexingRepository, SampleRepository};
pub use keys::{KeyScheme, ResourceIdSplitter};
pub use metadata::ResourceMetadata;
pub use sample::{Context, MetricType, Resource, Sample};
pub use writer::{AsyncBatchWriter, PublishOutcome};
