//! Configuration types for the writer and the metadata cache.
//!
//! Configuration is plain data: it can be built in code or loaded from a JSON
//! document. Every field has a default, so a document only needs to name what
//! it overrides:
//!
//! ```json
//! {
//!   "writer": { "ring_buffer_size": 4096, "writer_threads": 8 },
//!   "cache": { "strategy": "redis", "hostname": "cache.local", "port": 6379 }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default maximum number of samples handed to a collaborator in one call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 16;

/// Default number of ring buffer slots.
pub const DEFAULT_RING_BUFFER_SIZE: usize = 8192;

/// Default number of writer threads.
pub const DEFAULT_WRITER_THREADS: usize = 16;

/// Default capacity of the in-process metadata cache.
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 8192;

/// Default Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Full pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Batch writer settings.
    pub writer: WriterConfig,
    /// Metadata cache settings.
    pub cache: CacheConfig,
}

impl SpoolConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and any validation
    /// error from [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, plus every
    /// error [`from_json_str`](Self::from_json_str) can return.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<()> {
        self.writer.validate()?;
        self.cache.validate()
    }
}

/// Batch writer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Largest chunk handed to the repository or indexer in one call.
    pub max_batch_size: usize,
    /// Number of ring buffer slots; must be a power of two.
    pub ring_buffer_size: usize,
    /// Number of worker threads draining the ring buffer.
    pub writer_threads: usize,
}

impl WriterConfig {
    /// Creates a validated writer configuration.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn new(max_batch_size: usize, ring_buffer_size: usize, writer_threads: usize) -> Result<Self> {
        let config = Self {
            max_batch_size,
            ring_buffer_size,
            writer_threads,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the writer settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidBatchSize`] if `max_batch_size` is zero
    /// - [`ConfigError::InvalidRingBufferSize`] if `ring_buffer_size` is zero or not a power of two
    /// - [`ConfigError::InvalidWriterThreads`] if `writer_threads` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                size: self.max_batch_size,
            }
            .into());
        }
        if !self.ring_buffer_size.is_power_of_two() {
            return Err(ConfigError::InvalidRingBufferSize {
                size: self.ring_buffer_size,
            }
            .into());
        }
        if self.writer_threads == 0 {
            return Err(ConfigError::InvalidWriterThreads {
                count: self.writer_threads,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            writer_threads: DEFAULT_WRITER_THREADS,
        }
    }
}

/// Which metadata cache backs the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum CacheConfig {
    /// Bounded cache local to this process.
    Memory {
        /// Maximum number of resources kept before the oldest is evicted.
        #[serde(default = "default_max_entries")]
        max_entries: u64,
    },
    /// Cache shared with other collectors through Redis.
    Redis {
        /// Redis host name or address.
        hostname: String,
        /// Redis port.
        #[serde(default = "default_redis_port")]
        port: u16,
    },
}

fn default_max_entries() -> u64 {
    DEFAULT_CACHE_MAX_ENTRIES
}

fn default_redis_port() -> u16 {
    DEFAULT_REDIS_PORT
}

impl CacheConfig {
    /// Validates the cache settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidCacheSize`] for a zero-capacity memory cache
    /// - [`ConfigError::InvalidEndpoint`] for an empty host or port zero
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Memory { max_entries } if *max_entries == 0 => {
                Err(ConfigError::InvalidCacheSize { count: *max_entries }.into())
            }
            Self::Redis { hostname, .. } if hostname.trim().is_empty() => {
                Err(ConfigError::InvalidEndpoint {
                    reason: "hostname is empty".to_string(),
                }
                .into())
            }
            Self::Redis { port: 0, .. } => Err(ConfigError::InvalidEndpoint {
                reason: "port must be non-zero".to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::Memory {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpoolError;

    #[test]
    fn test_defaults_are_valid() {
        let config = SpoolConfig::default();
        config.validate().unwrap();
        assert_eq!(config.writer.max_batch_size, 16);
        assert_eq!(config.writer.ring_buffer_size, 8192);
        assert_eq!(config.writer.writer_threads, 16);
    }

    #[test]
    fn test_writer_validation() {
        assert!(matches!(
            WriterConfig::new(0, 8, 1).unwrap_err(),
            SpoolError::Config(ConfigError::InvalidBatchSize { size: 0 })
        ));
        assert!(matches!(
            WriterConfig::new(4, 12, 1).unwrap_err(),
            SpoolError::Config(ConfigError::InvalidRingBufferSize { size: 12 })
        ));
        assert!(matches!(
            WriterConfig::new(4, 0, 1).unwrap_err(),
            SpoolError::Config(ConfigError::InvalidRingBufferSize { size: 0 })
        ));
        assert!(matches!(
            WriterConfig::new(4, 8, 0).unwrap_err(),
            SpoolError::Config(ConfigError::InvalidWriterThreads { count: 0 })
        ));
        WriterConfig::new(1, 1, 1).unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SpoolConfig::from_json_str(
            r#"{ "writer": { "writer_threads": 2 }, "cache": { "strategy": "redis", "hostname": "localhost" } }"#,
        )
        .unwrap();
        assert_eq!(config.writer.writer_threads, 2);
        assert_eq!(config.writer.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(
            config.cache,
            CacheConfig::Redis {
                hostname: "localhost".to_string(),
                port: DEFAULT_REDIS_PORT,
            }
        );
    }

    #[test]
    fn test_json_validation_errors_surface() {
        let err = SpoolConfig::from_json_str(r#"{ "writer": { "ring_buffer_size": 1000 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Config(ConfigError::InvalidRingBufferSize { size: 1000 })
        ));

        let err = SpoolConfig::from_json_str(r#"{ "cache": { "strategy": "memory", "max_entries": 0 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Config(ConfigError::InvalidCacheSize { count: 0 })
        ));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = SpoolConfig::from_json_str("{ writer: ").unwrap_err();
        assert!(matches!(err, SpoolError::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpoolConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SpoolError::Config(ConfigError::Read { .. })));
    }

    #[test]
    fn test_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.json");
        let config = SpoolConfig {
            writer: WriterConfig::new(8, 1024, 4).unwrap(),
            cache: CacheConfig::Memory { max_entries: 10 },
        };
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(SpoolConfig::from_json_file(&path).unwrap(), config);
    }
}
