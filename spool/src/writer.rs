//! Non-blocking batch writer over a bounded worker pool.
//!
//! Producers hand whole batches of samples to [`AsyncBatchWriter`]. A publish
//! never waits: it either lands in a free ring buffer slot or the batch is
//! dropped and counted. A fixed pool of named threads drains the ring, splits
//! every batch into chunks of at most `max_batch_size` samples, and hands each
//! chunk to the [`SampleRepository`] or, for index-only batches, the
//! [`Indexer`].
//!
//! # Design
//!
//! - Every accepted batch is taken by exactly one worker (see [`WorkRing`]).
//! - A batch holds its ring slot until its last chunk has been handed off, so
//!   at most `ring_buffer_size` batches are queued or in progress at once.
//! - Each chunk runs on its own: a chunk that fails or panics is logged and
//!   skipped, later chunks of the same batch still run, and the worker keeps
//!   serving the ring.
//! - [`AsyncBatchWriter::drain_and_halt`] holds the worker list for the whole
//!   drain, so a concurrent caller returns only after the drain is complete.
//!
//! # Metrics
//!
//! | Name                          | Type    | Value                                    |
//! |-------------------------------|---------|------------------------------------------|
//! | `ring_buffer_size`            | Gauge   | batches queued or in progress            |
//! | `ring_buffer_max_size`        | Gauge   | ring buffer capacity                     |
//! | `ring_buffer_dropped_samples` | Counter | samples dropped on a full or halted ring |

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use prometheus::{IntCounter, Registry};

use crate::batch::{SampleBatch, WriteMode};
use crate::config::WriterConfig;
use crate::error::{Result, WorkerError};
use crate::indexer::{Indexer, SampleRepository};
use crate::metrics;
use crate::ratelimit::RateLimitedLog;
use crate::ring::{Rejected, WorkRing};
use crate::sample::{Sample, distinct_resource_ids};

/// Gauge of batches accepted and not yet fully processed.
pub const RING_BUFFER_SIZE_METRIC: &str = "ring_buffer_size";
/// Gauge of the ring buffer capacity.
pub const RING_BUFFER_MAX_SIZE_METRIC: &str = "ring_buffer_max_size";
/// Counter of samples dropped because the ring was full or halted.
pub const RING_BUFFER_DROPPED_SAMPLES_METRIC: &str = "ring_buffer_dropped_samples";

/// Result of handing a batch to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The batch is queued and will be processed by one worker.
    Accepted,
    /// The ring buffer was full or halted; the batch was discarded.
    Dropped,
}

impl PublishOutcome {
    /// Whether the batch was queued.
    pub fn is_accepted(self) -> bool {
        self == PublishOutcome::Accepted
    }
}

/// State shared by the writer handle and its workers.
struct Shared {
    ring: WorkRing<SampleBatch>,
    max_batch_size: usize,
    repository: Arc<dyn SampleRepository>,
    indexer: Arc<dyn Indexer>,
    dropped: IntCounter,
    drop_log: RateLimitedLog,
    failure_log: RateLimitedLog,
}

impl Shared {
    fn process(&self, batch: SampleBatch) {
        self.write_chunks(&batch);
        self.ring.release();
    }

    fn write_chunks(&self, batch: &SampleBatch) {
        let index_only = batch.is_index_only();
        for chunk in batch.chunks(self.max_batch_size) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if index_only {
                    self.indexer.update(chunk)
                } else {
                    self.repository.insert(chunk)
                }
            }));

            match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(samples = chunk.len(), index_only, "wrote chunk");
                }
                Ok(Err(e)) => {
                    if let Some(suppressed) = self.failure_log.try_acquire() {
                        tracing::error!(
                            error = %e,
                            samples = chunk.len(),
                            index_only,
                            suppressed,
                            "failed to write chunk, some samples may be lost"
                        );
                    }
                }
                Err(payload) => {
                    if let Some(suppressed) = self.failure_log.try_acquire() {
                        tracing::error!(
                            panic = panic_message(payload.as_ref()),
                            samples = chunk.len(),
                            index_only,
                            suppressed,
                            "writer panicked while writing a chunk, some samples may be lost"
                        );
                    }
                }
            }
        }
    }

    fn run(&self) {
        while let Some(batch) = self.ring.take() {
            self.process(batch);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Accepts sample batches without blocking and writes them from a thread pool.
///
/// # Thread Safety
///
/// `insert` and `index_only` take `&self` and may be called from any number
/// of threads; share the writer behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use spool::{AsyncBatchWriter, Resource, Sample, WriterConfig};
/// use spool::indexer::{Indexer, SampleRepository};
///
/// struct Discard;
/// impl SampleRepository for Discard {
///     fn insert(&self, _: &[Sample]) -> spool::Result<()> { Ok(()) }
/// }
/// impl Indexer for Discard {
///     fn update(&self, _: &[Sample]) -> spool::Result<()> { Ok(()) }
/// }
///
/// # fn main() -> spool::Result<()> {
/// let registry = prometheus::Registry::new();
/// let writer = AsyncBatchWriter::new(
///     &WriterConfig::new(16, 64, 2)?,
///     Arc::new(Discard),
///     Arc::new(Discard),
///     &registry,
/// )?;
///
/// writer.insert(vec![Sample::new(0, Resource::new("node:1"), "loadavg1", 0.4)]);
/// writer.drain_and_halt();
/// assert_eq!(writer.occupancy(), 0);
/// # Ok(())
/// # }
/// ```
pub struct AsyncBatchWriter {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncBatchWriter {
    /// Validates `config`, registers the writer metrics and starts the workers.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) if `config` is invalid
    /// - [`RegistryError`](crate::error::RegistryError) if the writer metrics
    ///   are already registered in `registry`
    /// - [`WorkerError::Spawn`] if a worker thread cannot be started; threads
    ///   started before the failure are stopped
    pub fn new(
        config: &WriterConfig,
        repository: Arc<dyn SampleRepository>,
        indexer: Arc<dyn Indexer>,
        registry: &Registry,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            ring: WorkRing::with_capacity(config.ring_buffer_size)?,
            max_batch_size: config.max_batch_size,
            repository,
            indexer,
            dropped: metrics::register_counter(
                registry,
                RING_BUFFER_DROPPED_SAMPLES_METRIC,
                "Samples dropped because the ring buffer was full or halted",
            )?,
            drop_log: RateLimitedLog::default(),
            failure_log: RateLimitedLog::default(),
        });

        let observed: Weak<Shared> = Arc::downgrade(&shared);
        metrics::register_sampled_gauge(
            registry,
            RING_BUFFER_SIZE_METRIC,
            "Batches accepted by the writer and not yet processed",
            move || {
                observed
                    .upgrade()
                    .map_or(0, |shared| metrics::gauge_value(shared.ring.in_flight()))
            },
        )?;
        metrics::register_constant_gauge(
            registry,
            RING_BUFFER_MAX_SIZE_METRIC,
            "Ring buffer capacity in batches",
            metrics::gauge_value(config.ring_buffer_size),
        )?;

        let writer = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.writer_threads)),
        };
        for index in 0..config.writer_threads {
            let shared = Arc::clone(&writer.shared);
            let handle = thread::Builder::new()
                .name(format!("spool-writer-{index}"))
                .spawn(move || shared.run())
                .map_err(|source| WorkerError::Spawn { index, source })?;
            writer.workers.lock().push(handle);
        }

        tracing::info!(
            writer_threads = config.writer_threads,
            ring_buffer_size = config.ring_buffer_size,
            max_batch_size = config.max_batch_size,
            "batch writer started"
        );
        Ok(writer)
    }

    /// Queues `samples` for persistence (and indexing) by the repository.
    pub fn insert(&self, samples: Vec<Sample>) -> PublishOutcome {
        self.publish(samples, WriteMode::Insert)
    }

    /// Queues `samples` for indexing only; the repository is not called.
    pub fn index_only(&self, samples: Vec<Sample>) -> PublishOutcome {
        self.publish(samples, WriteMode::IndexOnly)
    }

    fn publish(&self, samples: Vec<Sample>, mode: WriteMode) -> PublishOutcome {
        let shared = &self.shared;
        let Err((reason, batch)) = shared.ring.try_publish(SampleBatch::new(samples, mode)) else {
            return PublishOutcome::Accepted;
        };

        shared.dropped.inc_by(batch.len() as u64);
        if let Some(suppressed) = shared.drop_log.try_acquire() {
            let resource_ids = distinct_resource_ids(batch.samples());
            match reason {
                Rejected::Full => tracing::error!(
                    suppressed,
                    "ring buffer is full, {} samples for resource ids {} will be dropped",
                    batch.len(),
                    resource_ids
                ),
                Rejected::Halted => tracing::error!(
                    suppressed,
                    "writer is halted, {} samples for resource ids {} will be dropped",
                    batch.len(),
                    resource_ids
                ),
            }
        }
        PublishOutcome::Dropped
    }

    /// Batches accepted but not yet fully processed.
    pub fn occupancy(&self) -> usize {
        self.shared.ring.in_flight()
    }

    /// Number of ring buffer slots.
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    /// Total samples dropped since construction.
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.get()
    }

    /// Whether [`drain_and_halt`](Self::drain_and_halt) has started.
    pub fn is_halted(&self) -> bool {
        self.shared.ring.is_halted()
    }

    /// Stops accepting batches, waits for every queued batch to be processed,
    /// and joins the workers.
    ///
    /// Later publishes are dropped and counted. A concurrent or repeated call
    /// returns once the first drain has finished.
    pub fn drain_and_halt(&self) {
        let mut workers = self.workers.lock();
        if workers.is_empty() && self.shared.ring.is_halted() {
            return;
        }

        self.shared.ring.halt();
        for handle in workers.drain(..) {
            let name = handle.thread().name().unwrap_or("spool-writer").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "writer thread terminated abnormally");
            }
        }

        // A publish racing with the halt can land after the workers exited.
        let mut stranded = 0usize;
        while let Some(batch) = self.shared.ring.try_take() {
            self.shared.process(batch);
            stranded += 1;
        }

        tracing::info!(
            stranded,
            dropped_samples = self.dropped_samples(),
            "batch writer halted"
        );
    }
}

impl Drop for AsyncBatchWriter {
    fn drop(&mut self) {
        self.drain_and_halt();
    }
}

impl std::fmt::Debug for AsyncBatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBatchWriter")
            .field("capacity", &self.capacity())
            .field("occupancy", &self.occupancy())
            .field("max_batch_size", &self.shared.max_batch_size)
            .field("workers", &self.workers.try_lock().map(|workers| workers.len()))
            .field("halted", &self.is_halted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, RepositoryError, SpoolError};
    use crate::sample::Resource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        chunks: Mutex<Vec<Vec<Sample>>>,
    }

    impl SampleRepository for Recorder {
        fn insert(&self, samples: &[Sample]) -> Result<()> {
            self.chunks.lock().push(samples.to_vec());
            Ok(())
        }
    }

    impl Indexer for Recorder {
        fn update(&self, samples: &[Sample]) -> Result<()> {
            self.chunks.lock().push(samples.to_vec());
            Ok(())
        }
    }

    fn samples(resource: &str, count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample::new(i as u64, Resource::new(resource), format!("m{i}"), i as f64))
            .collect()
    }

    fn writer(
        config: WriterConfig,
        repository: Arc<dyn SampleRepository>,
        indexer: Arc<dyn Indexer>,
    ) -> (AsyncBatchWriter, Registry) {
        let registry = Registry::new();
        let writer = AsyncBatchWriter::new(&config, repository, indexer, &registry).unwrap();
        (writer, registry)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = WriterConfig {
            max_batch_size: 4,
            ring_buffer_size: 12,
            writer_threads: 1,
        };
        let recorder = Arc::new(Recorder::default());
        let err = AsyncBatchWriter::new(&config, recorder.clone(), recorder, &Registry::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Config(ConfigError::InvalidRingBufferSize { size: 12 })
        ));
    }

    #[test]
    fn test_splits_batches_into_chunks() {
        let repository = Arc::new(Recorder::default());
        let indexer = Arc::new(Recorder::default());
        let (writer, _registry) = writer(
            WriterConfig::new(4, 8, 1).unwrap(),
            repository.clone(),
            indexer.clone(),
        );

        assert!(writer.insert(samples("node:1", 10)).is_accepted());
        writer.drain_and_halt();

        let chunks = repository.chunks.lock();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let names: Vec<&str> = chunks.iter().flatten().map(|s| s.name.as_str()).collect();
        assert_eq!(names, (0..10).map(|i| format!("m{i}")).collect::<Vec<_>>());
        assert!(indexer.chunks.lock().is_empty());
    }

    #[test]
    fn test_index_only_bypasses_repository() {
        let repository = Arc::new(Recorder::default());
        let indexer = Arc::new(Recorder::default());
        let (writer, _registry) = writer(
            WriterConfig::new(16, 8, 2).unwrap(),
            repository.clone(),
            indexer.clone(),
        );

        writer.index_only(samples("node:1", 3));
        writer.drain_and_halt();

        assert!(repository.chunks.lock().is_empty());
        assert_eq!(indexer.chunks.lock().len(), 1);
    }

    struct Gate {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SampleRepository for Gate {
        fn insert(&self, _: &[Sample]) -> Result<()> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            Ok(())
        }
    }

    #[test]
    fn test_full_ring_drops_and_counts() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let (writer, registry) = writer(
            WriterConfig::new(16, 2, 1).unwrap(),
            gate,
            Arc::new(Recorder::default()),
        );

        // The only worker holds the first batch, which still counts against
        // the capacity; one more batch fills the ring.
        assert!(writer.insert(samples("a", 1)).is_accepted());
        entered_rx.recv().unwrap();
        assert!(writer.insert(samples("b", 1)).is_accepted());
        assert_eq!(writer.insert(samples("c", 7)), PublishOutcome::Dropped);
        assert_eq!(writer.insert(samples("d", 2)), PublishOutcome::Dropped);

        assert_eq!(writer.dropped_samples(), 9);
        assert_eq!(writer.occupancy(), 2);
        assert_eq!(metrics::value(&registry, RING_BUFFER_SIZE_METRIC), Some(2.0));
        assert_eq!(metrics::value(&registry, RING_BUFFER_MAX_SIZE_METRIC), Some(2.0));
        assert_eq!(metrics::value(&registry, RING_BUFFER_DROPPED_SAMPLES_METRIC), Some(9.0));

        // Finishing the held batch frees exactly one slot.
        release_tx.send(()).unwrap();
        entered_rx.recv().unwrap();
        assert!(writer.insert(samples("e", 1)).is_accepted());
        assert_eq!(writer.insert(samples("f", 1)), PublishOutcome::Dropped);

        for _ in 0..2 {
            release_tx.send(()).unwrap();
        }
        writer.drain_and_halt();
        assert_eq!(writer.occupancy(), 0);
    }

    /// Fails the first chunk of resource "a", panics on the first chunk of "b".
    struct Flaky {
        written: AtomicUsize,
    }

    impl SampleRepository for Flaky {
        fn insert(&self, samples: &[Sample]) -> Result<()> {
            let first = &samples[0];
            match (first.resource.id(), first.name.as_str()) {
                ("a", "m0") => {
                    return Err(RepositoryError::Insert {
                        count: samples.len(),
                        reason: "timeout".to_string(),
                    }
                    .into());
                }
                ("b", "m0") => panic!("corrupt chunk"),
                _ => {}
            }
            self.written.fetch_add(samples.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_failures_do_not_stop_the_worker() {
        let flaky = Arc::new(Flaky {
            written: AtomicUsize::new(0),
        });
        let (writer, _registry) = writer(
            WriterConfig::new(2, 8, 1).unwrap(),
            flaky.clone(),
            Arc::new(Recorder::default()),
        );

        // Chunk 1 fails, the rest of that batch still runs.
        writer.insert(samples("a", 4));
        // Chunk 1 panics, the rest of that batch still runs.
        writer.insert(samples("b", 4));
        // The same worker is still alive for the third batch.
        writer.insert(samples("c", 4));
        writer.drain_and_halt();

        assert_eq!(flaky.written.load(Ordering::SeqCst), 2 + 2 + 4);
        assert_eq!(writer.occupancy(), 0);
    }

    #[test]
    fn test_publish_after_halt_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let (writer, _registry) = writer(WriterConfig::new(4, 4, 1).unwrap(), recorder.clone(), recorder);

        writer.drain_and_halt();
        writer.drain_and_halt();
        assert!(writer.is_halted());
        assert_eq!(writer.insert(samples("a", 3)), PublishOutcome::Dropped);
        assert_eq!(writer.dropped_samples(), 3);
        assert_eq!(writer.occupancy(), 0);
    }

    #[test]
    fn test_duplicate_registry_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let registry = Registry::new();
        let config = WriterConfig::new(4, 4, 1).unwrap();
        let _first = AsyncBatchWriter::new(&config, recorder.clone(), recorder.clone(), &registry).unwrap();
        let err = AsyncBatchWriter::new(&config, recorder.clone(), recorder, &registry).unwrap_err();
        assert!(matches!(err, SpoolError::Registry(_)));
    }

    #[test]
    fn test_drop_drains_queued_batches() {
        let recorder = Arc::new(Recorder::default());
        {
            let (writer, _registry) = writer(
                WriterConfig::new(8, 16, 2).unwrap(),
                recorder.clone(),
                Arc::new(Recorder::default()),
            );
            for i in 0..10 {
                writer.insert(samples(&format!("node:{i}"), 1));
            }
        }
        assert_eq!(recorder.chunks.lock().len(), 10);
    }

    #[test]
    fn test_concurrent_drain_waits_for_the_first() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let writer = Arc::new(
            AsyncBatchWriter::new(
                &WriterConfig::new(16, 4, 1).unwrap(),
                gate,
                Arc::new(Recorder::default()),
                &Registry::new(),
            )
            .unwrap(),
        );

        assert!(writer.insert(samples("a", 1)).is_accepted());
        entered_rx.recv().unwrap();

        let first = {
            let writer = Arc::clone(&writer);
            thread::spawn(move || writer.drain_and_halt())
        };
        while !writer.is_halted() {
            thread::yield_now();
        }
        let second = {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                writer.drain_and_halt();
                writer.occupancy()
            })
        };

        release_tx.send(()).unwrap();
        first.join().unwrap();
        assert_eq!(second.join().unwrap(), 0);
    }
}
