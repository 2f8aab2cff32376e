//! Accumulated knowledge about a resource.
//!
//! [`ResourceMetadata`] records which metrics have been seen on a resource and
//! which attributes it carries. Caches store it as an opaque byte payload:
//!
//! ```text
//! +---------+------------------------------+
//! | version | bincode(ResourceMetadata)    |
//! | 1 byte  | N bytes                      |
//! +---------+------------------------------+
//! ```
//!
//! The version byte is bumped whenever the struct layout changes; payloads
//! with any other version are rejected rather than misread.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Encoding version written in front of every payload.
pub const METADATA_ENCODING_VERSION: u8 = 1;

/// Metric names and attributes known for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    metrics: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
}

impl ResourceMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a metric name. Returns `true` if it was not already known.
    pub fn put_metric(&mut self, name: impl Into<String>) -> bool {
        self.metrics.insert(name.into())
    }

    /// Records an attribute. Returns `true` if it was absent or had a different value.
    pub fn put_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.attributes.insert(key.into(), value.clone()) {
            Some(previous) => previous != value,
            None => true,
        }
    }

    /// Whether `name` has been recorded.
    pub fn contains_metric(&self, name: &str) -> bool {
        self.metrics.contains(name)
    }

    /// Whether `key` is recorded with exactly `value`.
    pub fn contains_attribute(&self, key: &str, value: &str) -> bool {
        self.attributes.get(key).is_some_and(|v| v == value)
    }

    /// Known metric names, sorted.
    pub fn metrics(&self) -> &BTreeSet<String> {
        &self.metrics
    }

    /// Known attributes, sorted by key.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.attributes.is_empty()
    }

    /// Folds `other` into `self`.
    ///
    /// Metrics are unioned; attributes from `other` are inserted or replace
    /// differing values. Returns whether `self` changed, so merging the same
    /// metadata twice reports `false` the second time.
    pub fn merge(&mut self, other: &ResourceMetadata) -> bool {
        let mut changed = false;
        for metric in &other.metrics {
            if !self.metrics.contains(metric) {
                self.metrics.insert(metric.clone());
                changed = true;
            }
        }
        for (key, value) in &other.attributes {
            if !self.contains_attribute(key, value) {
                self.attributes.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Encodes into a versioned payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Bincode`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).map_err(CodecError::Bincode)?;
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(METADATA_ENCODING_VERSION);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decodes a payload produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// - [`CodecError::Empty`] for an empty payload
    /// - [`CodecError::UnsupportedVersion`] for an unknown version byte
    /// - [`CodecError::Bincode`] for a corrupted body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
        if version != METADATA_ENCODING_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: METADATA_ENCODING_VERSION,
            }
            .into());
        }
        Ok(bincode::deserialize(body).map_err(CodecError::Bincode)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpoolError;

    fn interface_metadata() -> ResourceMetadata {
        let mut md = ResourceMetadata::new();
        md.put_metric("ifInOctets");
        md.put_metric("ifOutOctets");
        md.put_attribute("ifName", "eth0");
        md
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut stored = ResourceMetadata::new();
        let incoming = interface_metadata();
        assert!(stored.merge(&incoming));
        assert!(!stored.merge(&incoming));
        assert_eq!(stored, incoming);
    }

    #[test]
    fn test_merge_unions_metrics() {
        let mut stored = interface_metadata();
        let mut incoming = ResourceMetadata::new();
        incoming.put_metric("ifInErrors");
        incoming.put_metric("ifInOctets");

        assert!(stored.merge(&incoming));
        assert_eq!(stored.metrics().len(), 3);
        assert!(stored.contains_metric("ifInErrors"));
    }

    #[test]
    fn test_merge_replaces_changed_attribute() {
        let mut stored = interface_metadata();
        let mut incoming = ResourceMetadata::new();
        incoming.put_attribute("ifName", "eth1");

        assert!(stored.merge(&incoming));
        assert!(stored.contains_attribute("ifName", "eth1"));
        assert!(!stored.contains_attribute("ifName", "eth0"));
    }

    #[test]
    fn test_put_attribute_reports_change() {
        let mut md = ResourceMetadata::new();
        assert!(md.put_attribute("k", "v"));
        assert!(!md.put_attribute("k", "v"));
        assert!(md.put_attribute("k", "w"));
    }

    #[test]
    fn test_bytes_round_trip() {
        let md = interface_metadata();
        let bytes = md.to_bytes().unwrap();
        assert_eq!(bytes[0], METADATA_ENCODING_VERSION);
        assert_eq!(ResourceMetadata::from_bytes(&bytes).unwrap(), md);
    }

    #[test]
    fn test_rejects_unknown_version_and_empty_payload() {
        let mut bytes = interface_metadata().to_bytes().unwrap();
        bytes[0] = 9;
        assert!(matches!(
            ResourceMetadata::from_bytes(&bytes).unwrap_err(),
            SpoolError::Codec(CodecError::UnsupportedVersion { found: 9, expected: 1 })
        ));
        assert!(matches!(
            ResourceMetadata::from_bytes(&[]).unwrap_err(),
            SpoolError::Codec(CodecError::Empty)
        ));
    }
}
