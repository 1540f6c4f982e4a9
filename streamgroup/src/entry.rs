//! Log entries as the consumer engine sees them.
//!
//! An [`Entry`] is one unit read from a stream. It is owned by the log store
//! and immutable once read; the engine only ever swaps in buckets loaded from
//! a storage strategy, which produces a new value rather than mutating the
//! original.

use crate::types::{EntryId, Environment, StreamUri, Timestamp};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Whether an entry was produced in place or copied from another stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryOrigin {
    /// The entry was appended by a producer of this stream.
    #[default]
    Original,
    /// The entry was copied or migrated from another stream.
    Copy,
}

/// Descriptive metadata carried by every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Name of the operation the producer invoked.
    pub operation: String,
    /// When the producer created the entry.
    pub produced_at: Timestamp,
    /// Producer-assigned message identifier.
    pub message_id: Uuid,
    /// Environment the entry was produced in.
    pub environment: Environment,
    /// Stream uri the entry was produced to.
    pub uri: StreamUri,
    /// Original or copied entry.
    pub origin: EntryOrigin,
}

impl EntryMetadata {
    /// Creates metadata for an original entry produced now.
    pub fn new(operation: impl Into<String>, environment: Environment, uri: StreamUri) -> Self {
        Self {
            operation: operation.into(),
            produced_at: Timestamp::now(),
            message_id: Uuid::now_v7(),
            environment,
            uri,
            origin: EntryOrigin::Original,
        }
    }

    /// Marks the entry as copied from elsewhere.
    #[must_use]
    pub const fn with_origin(mut self, origin: EntryOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Overrides the production time.
    #[must_use]
    pub const fn with_produced_at(mut self, produced_at: Timestamp) -> Self {
        self.produced_at = produced_at;
        self
    }
}

/// The two bucket categories an entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketCategory {
    /// Application payload segments.
    Segments,
    /// Data for cross-cutting interceptors.
    InterceptorData,
}

impl fmt::Display for BucketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segments => f.write_str("segments"),
            Self::InterceptorData => f.write_str("interceptor-data"),
        }
    }
}

/// A named collection of byte payloads belonging to one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket(BTreeMap<String, Bytes>);

impl Bucket {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named payload.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a named payload, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        let _ = self.0.insert(name.into(), value.into());
    }

    /// Looks up a payload by name.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.0.get(name)
    }

    /// Whether the bucket holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates payloads in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> + '_ {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for Bucket
where
    K: Into<String>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// One entry read from a stream (an "announcement").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned id.
    pub id: EntryId,
    /// Descriptive metadata.
    pub metadata: EntryMetadata,
    /// Application payload.
    pub segments: Bucket,
    /// Interceptor payload.
    pub interceptor_data: Bucket,
}

impl Entry {
    /// Creates an entry.
    pub const fn new(
        id: EntryId,
        metadata: EntryMetadata,
        segments: Bucket,
        interceptor_data: Bucket,
    ) -> Self {
        Self {
            id,
            metadata,
            segments,
            interceptor_data,
        }
    }

    /// The bucket of the given category.
    pub const fn bucket(&self, category: BucketCategory) -> &Bucket {
        match category {
            BucketCategory::Segments => &self.segments,
            BucketCategory::InterceptorData => &self.interceptor_data,
        }
    }

    /// Returns a copy of this entry with one bucket replaced.
    #[must_use]
    pub fn with_bucket(mut self, category: BucketCategory, bucket: Bucket) -> Self {
        match category {
            BucketCategory::Segments => self.segments = bucket,
            BucketCategory::InterceptorData => self.interceptor_data = bucket,
        }
        self
    }

    /// The operation name, shortcut for `metadata.operation`.
    pub fn operation(&self) -> &str {
        &self.metadata.operation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> EntryMetadata {
        EntryMetadata::new(
            "order-placed",
            Environment::new("test"),
            StreamUri::try_new("orders").unwrap(),
        )
    }

    #[test]
    fn with_bucket_replaces_only_the_requested_category() {
        let entry = Entry::new(
            EntryId::new(1, 0),
            metadata(),
            Bucket::new().with("body", "inline"),
            Bucket::new().with("trace", "abc"),
        );

        let replaced = entry.with_bucket(
            BucketCategory::Segments,
            Bucket::new().with("body", "external"),
        );

        assert_eq!(
            replaced.segments.get("body").map(Bytes::as_ref),
            Some(&b"external"[..])
        );
        assert_eq!(
            replaced.interceptor_data.get("trace").map(Bytes::as_ref),
            Some(&b"abc"[..])
        );
    }

    #[test]
    fn new_metadata_is_original() {
        let metadata = metadata();
        assert_eq!(metadata.origin, EntryOrigin::Original);
        assert_eq!(
            metadata.with_origin(EntryOrigin::Copy).origin,
            EntryOrigin::Copy
        );
    }

    #[test]
    fn bucket_collects_from_pairs() {
        let bucket: Bucket = vec![("a", "1"), ("b", "2")].into_iter().collect();
        let names: Vec<&str> = bucket.iter().map(|(name, _)| name).collect();

        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(bucket.len(), 2);
    }
}
