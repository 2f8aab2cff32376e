//! Prometheus metrics registered by the writer and the caches.
//!
//! Components never own a registry. The caller builds a
//! [`prometheus::Registry`], hands it to each constructor, and decides how it
//! is exposed (scrape endpoint, push gateway, or the CLI's soak report).
//!
//! # Metrics Overview
//!
//! | Metric                        | Type    | Description                                |
//! |-------------------------------|---------|--------------------------------------------|
//! | `ring_buffer_size`            | Gauge   | Batches accepted and not yet processed     |
//! | `ring_buffer_max_size`        | Gauge   | Ring buffer capacity                       |
//! | `ring_buffer_dropped_samples` | Counter | Samples dropped on a full or halted ring   |
//! | `cache_size`                  | Gauge   | Entries (or store keys) in the cache       |
//! | `cache_max_size`              | Gauge   | Cache capacity, zero when unbounded        |

use std::collections::BTreeMap;
use std::fmt;

use prometheus::core::{Collector, Desc};
use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::error::{RegistryError, Result};

/// Gauge whose value is read from a callback every time the registry is gathered.
///
/// Used where the value already lives elsewhere (ring occupancy, cache entry
/// count) and keeping a second copy in step would only add a way to drift.
pub struct SampledGauge {
    gauge: IntGauge,
    sample: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl SampledGauge {
    /// Creates a gauge named `name` that reports `sample()` on every gather.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Prometheus`] if `name` is not a valid metric name.
    pub fn new<F>(name: &str, help: &str, sample: F) -> Result<Self>
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        let gauge = IntGauge::with_opts(Opts::new(name, help)).map_err(RegistryError::from)?;
        Ok(Self {
            gauge,
            sample: Box::new(sample),
        })
    }
}

impl Collector for SampledGauge {
    fn desc(&self) -> Vec<&Desc> {
        self.gauge.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.gauge.set((self.sample)());
        self.gauge.collect()
    }
}

impl fmt::Debug for SampledGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampledGauge")
            .field("last", &self.gauge.get())
            .finish_non_exhaustive()
    }
}

/// Registers a [`SampledGauge`] in `registry`.
///
/// # Errors
///
/// Returns [`RegistryError::Prometheus`] if the name is invalid or already registered.
pub fn register_sampled_gauge<F>(registry: &Registry, name: &str, help: &str, sample: F) -> Result<()>
where
    F: Fn() -> i64 + Send + Sync + 'static,
{
    let gauge = SampledGauge::new(name, help, sample)?;
    registry.register(Box::new(gauge)).map_err(RegistryError::from)?;
    Ok(())
}

/// Registers a gauge fixed at `value`, for figures that never change after construction.
///
/// # Errors
///
/// Returns [`RegistryError::Prometheus`] if the name is invalid or already registered.
pub fn register_constant_gauge(registry: &Registry, name: &str, help: &str, value: i64) -> Result<()> {
    let gauge = IntGauge::with_opts(Opts::new(name, help)).map_err(RegistryError::from)?;
    gauge.set(value);
    registry.register(Box::new(gauge)).map_err(RegistryError::from)?;
    Ok(())
}

/// Registers a counter and returns the handle to increment it with.
///
/// # Errors
///
/// Returns [`RegistryError::Prometheus`] if the name is invalid or already registered.
pub fn register_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help)).map_err(RegistryError::from)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(RegistryError::from)?;
    Ok(counter)
}

/// Saturating conversion for gauge values.
pub(crate) fn gauge_value<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// Current value of every unlabelled gauge and counter in `registry`, by name.
pub fn snapshot(registry: &Registry) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    for family in registry.gather() {
        let Some(metric) = family.get_metric().first() else {
            continue;
        };
        let value = match family.get_field_type() {
            MetricType::GAUGE => metric.get_gauge().get_value(),
            MetricType::COUNTER => metric.get_counter().get_value(),
            _ => continue,
        };
        values.insert(family.get_name().to_string(), value);
    }
    values
}

/// Current value of the metric `name`, if registered.
pub fn value(registry: &Registry, name: &str) -> Option<f64> {
    snapshot(registry).remove(name)
}
