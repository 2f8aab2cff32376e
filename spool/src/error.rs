//! Error types for the spool ingestion pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all spool operations.
///
/// Overload is deliberately absent: a full ring buffer is reported through
/// [`PublishOutcome`](crate::writer::PublishOutcome) and the dropped-sample
/// counter, never as an error.
#[derive(Error, Debug)]
pub enum SpoolError {
    /// Invalid construction parameters or configuration file.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failure talking to a metadata cache backend.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Failure encoding or decoding stored metadata.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failure reported by a persistence or indexing collaborator.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Failure registering a metric.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Failure managing writer threads.
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors raised while validating or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `max_batch_size` must be strictly positive.
    #[error("max_batch_size must be strictly positive, got {size}")]
    InvalidBatchSize {
        /// The rejected value.
        size: usize,
    },

    /// The ring buffer size must be a positive power of two.
    #[error("ring_buffer_size must be a positive power of two, got {size}")]
    InvalidRingBufferSize {
        /// The rejected value.
        size: usize,
    },

    /// At least one writer thread is required.
    #[error("writer_threads must be positive, got {count}")]
    InvalidWriterThreads {
        /// The rejected value.
        count: usize,
    },

    /// The in-process cache needs room for at least one entry.
    #[error("cache max_entries must be positive, got {count}")]
    InvalidCacheSize {
        /// The rejected value.
        count: u64,
    },

    /// A shared cache endpoint is unusable.
    #[error("invalid cache endpoint: {reason}")]
    InvalidEndpoint {
        /// Why the endpoint was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration '{}': {source}", path.display())]
    Read {
        /// The configuration path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid JSON for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised by metadata cache backends.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backend could not be reached.
    #[error("cache backend unavailable: {reason}")]
    Unavailable {
        /// Description of the connectivity failure.
        reason: String,
    },

    /// A key holds a value of the wrong kind for the requested operation.
    #[error("key '{key}' holds the wrong kind of value for this operation")]
    WrongType {
        /// The offending key, lossily decoded.
        key: String,
    },

    /// An index entry does not reference a metadata key of the expected shape.
    #[error("index entry '{entry}' is not a metadata key for context '{context_id}'")]
    MalformedIndexEntry {
        /// The stored entry, lossily decoded.
        entry: String,
        /// The context the query was scoped to.
        context_id: String,
    },

    /// Error returned by the Redis client.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No pooled connection could be obtained.
    #[cfg(feature = "redis")]
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Errors raised while encoding or decoding [`ResourceMetadata`](crate::metadata::ResourceMetadata).
#[derive(Error, Debug)]
pub enum CodecError {
    /// The stored payload is empty.
    #[error("empty metadata payload")]
    Empty,

    /// The payload was written with an encoding version this build cannot read.
    #[error("unsupported metadata encoding version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version byte found in the payload.
        found: u8,
        /// Version byte this build writes.
        expected: u8,
    },

    /// The body could not be encoded or decoded.
    #[error("bincode failure: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Errors reported by persistence and indexing collaborators.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Samples could not be persisted.
    #[error("failed to insert {count} samples: {reason}")]
    Insert {
        /// Size of the rejected chunk.
        count: usize,
        /// Description of the failure.
        reason: String,
    },

    /// Samples could not be indexed.
    #[error("failed to index {count} samples: {reason}")]
    Index {
        /// Size of the rejected chunk.
        count: usize,
        /// Description of the failure.
        reason: String,
    },

    /// Opaque failure from a collaborator backend.
    #[error("backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while registering metrics.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The Prometheus registry refused the metric, e.g. a duplicate name.
    #[error("failed to register metric: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Errors raised while managing writer threads.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The operating system refused to start a writer thread.
    #[error("failed to spawn writer thread {index}: {source}")]
    Spawn {
        /// Index of the thread within the pool.
        index: usize,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for `Result<T, SpoolError>`.
pub type Result<T> = std::result::Result<T, SpoolError>;
