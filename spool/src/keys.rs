//! Cache key and prefix-index key scheme.
//!
//! Both cache responsibilities, metadata lookup and prefix enumeration, share
//! one keyspace. Keys are built by joining elements with [`SEPARATOR`]:
//!
//! ```text
//! metadata key:  _M:<context>:<resource id>
//! index keys:    _S:<context>:<e1>
//!                _S:<context>:<e1>:<e2>
//!                ...
//!                _S:<context>:<e1>:...:<en>
//! ```
//!
//! where `e1..en` are the path elements of the resource id. Every index key
//! holds a list of metadata keys, so a resource indexed under `a:b:c` is found
//! by queries for `a`, `a:b` and `a:b:c`. The two tags are distinct, so a
//! metadata key can never be mistaken for an index key.
//!
//! This layout is shared with any other process using the same store and must
//! not change.

use crate::error::{CacheError, Result};
use crate::sample::{Context, Resource};

/// Separator between path elements and key components.
pub const SEPARATOR: char = ':';

/// Escapes a literal separator (or itself) inside a path element.
pub const ESCAPE: char = '\\';

/// Tag of metadata keys.
pub const METADATA_TAG: &str = "_M";

/// Tag of prefix-index keys.
pub const SEARCH_TAG: &str = "_S";

/// Splits resource ids into path elements and joins them back.
///
/// An element may contain the separator if it is escaped:
/// `split("snmp:1:a\:b")` yields `["snmp", "1", "a:b"]`, and `join` of that
/// list yields the original id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceIdSplitter;

impl ResourceIdSplitter {
    /// Splits `id` on unescaped separators. An empty id has no elements.
    pub fn split(&self, id: &str) -> Vec<String> {
        if id.is_empty() {
            return Vec::new();
        }

        let mut elements = Vec::new();
        let mut current = String::new();
        let mut chars = id.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => {
                    // A trailing escape has nothing to protect; keep it literally.
                    current.push(chars.next().unwrap_or(ESCAPE));
                }
                SEPARATOR => elements.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        elements.push(current);
        elements
    }

    /// Joins elements with the separator, escaping separators inside them.
    pub fn join<I>(&self, elements: I) -> String
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut id = String::new();
        for (i, element) in elements.into_iter().enumerate() {
            if i > 0 {
                id.push(SEPARATOR);
            }
            for c in element.as_ref().chars() {
                if c == SEPARATOR || c == ESCAPE {
                    id.push(ESCAPE);
                }
                id.push(c);
            }
        }
        id
    }
}

/// Builds every key the caches read or write.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyScheme {
    splitter: ResourceIdSplitter,
}

impl KeyScheme {
    /// Creates a scheme using `splitter` for index keys.
    pub fn new(splitter: ResourceIdSplitter) -> Self {
        Self { splitter }
    }

    /// The splitter used for index keys.
    pub fn splitter(&self) -> &ResourceIdSplitter {
        &self.splitter
    }

    /// Metadata key for `(context, resource)`.
    pub fn metadata_key(&self, context: &Context, resource: &Resource) -> Vec<u8> {
        Self::raw_metadata_key(context.id(), resource.id()).into_bytes()
    }

    fn raw_metadata_key(context_id: &str, resource_id: &str) -> String {
        let mut key = String::with_capacity(METADATA_TAG.len() + context_id.len() + resource_id.len() + 2);
        key.push_str(METADATA_TAG);
        key.push(SEPARATOR);
        key.push_str(context_id);
        key.push(SEPARATOR);
        key.push_str(resource_id);
        key
    }

    /// One index key per prefix depth of `resource`, shallowest first.
    pub fn index_keys(&self, context: &Context, resource: &Resource) -> Vec<Vec<u8>> {
        let mut elements = vec![SEARCH_TAG.to_string(), context.id().to_string()];
        self.splitter
            .split(resource.id())
            .into_iter()
            .map(|element| {
                elements.push(element);
                self.splitter.join(&elements).into_bytes()
            })
            .collect()
    }

    /// The index key answering a query for `prefix`.
    ///
    /// Built exactly like the key of depth `n` in [`index_keys`](Self::index_keys)
    /// for an `n`-element prefix.
    pub fn prefix_key(&self, context: &Context, prefix: &str) -> Vec<u8> {
        let mut elements = vec![SEARCH_TAG.to_string(), context.id().to_string()];
        elements.extend(self.splitter.split(prefix));
        self.splitter.join(&elements).into_bytes()
    }

    /// Recovers the resource id from a metadata key stored in an index entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedIndexEntry`] if `key` is not a metadata
    /// key for `context`.
    pub fn resource_id(&self, context: &Context, key: &[u8]) -> Result<String> {
        let malformed = || CacheError::MalformedIndexEntry {
            entry: String::from_utf8_lossy(key).into_owned(),
            context_id: context.id().to_string(),
        };
        let key = std::str::from_utf8(key).map_err(|_| malformed())?;
        let head = Self::raw_metadata_key(context.id(), "");
        key.strip_prefix(head.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed().into())
    }
}
