//! Sample data model.
//!
//! These are the values handed to the pipeline by the collection front end.
//! They are immutable once built: the writer moves them through the ring
//! buffer and hands slices of them to collaborators, but never edits them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the context used when a sample does not name one.
pub const DEFAULT_CONTEXT_ID: &str = "G";

/// A namespace (tenant) scoping a set of resources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Context {
    id: String,
}

impl Context {
    /// Creates a context with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Returns the context identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_ID)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A monitored entity.
///
/// The identifier is a hierarchical path such as `snmp:1:eth0`; see
/// [`ResourceIdSplitter`](crate::keys::ResourceIdSplitter) for how it is
/// decomposed. Attributes are optional descriptive pairs that end up in the
/// resource's [`ResourceMetadata`](crate::metadata::ResourceMetadata).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    id: String,
    attributes: Option<BTreeMap<String, String>>,
}

impl Resource {
    /// Creates a resource without attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: None,
        }
    }

    /// Creates a resource carrying the given attributes.
    pub fn with_attributes<K, V>(id: impl Into<String>, attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            attributes: Some(
                attributes
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Returns the full resource identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the resource attributes, if any were attached.
    pub fn attributes(&self) -> Option<&BTreeMap<String, String>> {
        self.attributes.as_ref()
    }
}

/// How a sample's value should be interpreted downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Instantaneous value.
    Gauge,
    /// Monotonically increasing value that may wrap.
    Counter,
    /// Counter that may also decrease.
    Derive,
    /// Counter that is reset on every read.
    Absolute,
}

/// One timestamped observation of a metric on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Context the resource lives in.
    pub context: Context,
    /// The observed resource.
    pub resource: Resource,
    /// Metric name, unique within the resource.
    pub name: String,
    /// Interpretation of `value`.
    pub metric_type: MetricType,
    /// The observed value.
    pub value: f64,
}

impl Sample {
    /// Creates a gauge sample in the default context.
    pub fn new(timestamp_ms: u64, resource: Resource, name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp_ms,
            context: Context::default(),
            resource,
            name: name.into(),
            metric_type: MetricType::Gauge,
            value,
        }
    }

    /// Returns this sample moved into `context`.
    #[must_use]
    pub fn in_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Returns this sample with the given metric type.
    #[must_use]
    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }
}

/// Comma-separated list of the distinct resource ids in `samples`, in first-seen order.
///
/// Only meant for log messages, so callers should build it lazily.
pub(crate) fn distinct_resource_ids(samples: &[Sample]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for sample in samples {
        let id = sample.resource.id();
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen.join(", ")
}
