//! The unit of work carried by the ring buffer.

use crate::sample::Sample;

/// What a worker should do with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Persist the samples (the repository indexes them as part of the insert).
    Insert,
    /// Only update the searchable index; the samples were persisted elsewhere.
    IndexOnly,
}

/// A list of samples plus the mode they were published with.
///
/// Created by a single publish call and consumed by exactly one worker.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    samples: Vec<Sample>,
    mode: WriteMode,
}

impl SampleBatch {
    /// Wraps `samples` for processing in `mode`.
    pub fn new(samples: Vec<Sample>, mode: WriteMode) -> Self {
        Self { samples, mode }
    }

    /// The wrapped samples in publish order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// The processing mode.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Whether this batch skips persistence.
    pub fn is_index_only(&self) -> bool {
        self.mode == WriteMode::IndexOnly
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Splits the samples into consecutive chunks of at most `max_chunk` samples.
    ///
    /// Chunks keep publish order, so concatenating them yields the original
    /// list. Samples are not grouped by resource.
    ///
    /// # Panics
    ///
    /// Panics if `max_chunk` is zero. The writer validates its batch size at
    /// construction so this cannot happen on the worker path.
    pub fn chunks(&self, max_chunk: usize) -> std::slice::Chunks<'_, Sample> {
        self.samples.chunks(max_chunk)
    }

    /// Consumes the batch, returning the samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}
