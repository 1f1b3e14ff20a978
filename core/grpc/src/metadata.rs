// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Call metadata (request headers, response headers and trailers).
//!
//! Metadata is a multi-value map with case-insensitive keys. It is the
//! caller-facing view of the transport headers; conversion to and from
//! [`http::HeaderMap`] happens at the transport boundary.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::errors::MetadataError;

/// Multi-value metadata map. Keys are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for a key. Existing values are kept.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        self.entries.entry(key).or_default().push(value.into());
    }

    /// Replace all values of a key with a single value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        self.entries.insert(key, vec![value.into()]);
    }

    /// Get the first value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Get all values for a key
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Remove all values for a key
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    /// Iterate over all `(key, value)` pairs, repeating keys with many values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of values, duplicates included
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Append every value of `other`
    pub fn merge(&mut self, other: Metadata) {
        for (key, values) in other.entries {
            self.entries.entry(key).or_default().extend(values);
        }
    }

    /// Build metadata from transport headers. Values that are not visible
    /// ASCII are skipped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Metadata::new();
        for (name, value) in headers {
            match value.to_str() {
                Ok(value) => metadata.insert(name.as_str(), value),
                Err(_) => {
                    tracing::debug!(header = %name, "skipping non-ascii metadata value");
                }
            }
        }
        metadata
    }

    /// Convert into transport headers
    pub fn to_headers(&self) -> Result<HeaderMap, MetadataError> {
        let mut headers = HeaderMap::with_capacity(self.entries.len());
        self.append_to(&mut headers)?;
        Ok(headers)
    }

    /// Append every entry to an existing header map, failing at the first
    /// entry that is not a valid header
    pub fn append_to(&self, headers: &mut HeaderMap) -> Result<(), MetadataError> {
        for (key, value) in self.iter() {
            let (name, value) = to_header(key, value)?;
            headers.append(name, value);
        }
        Ok(())
    }

    /// Append every valid entry to an existing header map. Invalid entries
    /// are dropped one by one; returns how many were dropped.
    pub fn append_lossy(&self, headers: &mut HeaderMap) -> usize {
        let mut dropped = 0;
        for (key, value) in self.iter() {
            match to_header(key, value) {
                Ok((name, value)) => {
                    headers.append(name, value);
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "dropping invalid metadata entry");
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

fn to_header(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), MetadataError> {
    Ok((HeaderName::from_bytes(key.as_bytes())?, HeaderValue::from_str(value)?))
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}
