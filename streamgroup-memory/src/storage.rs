//! In-memory storage strategy for entry buckets.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use streamgroup::entry::{Bucket, BucketCategory, EntryMetadata};
use streamgroup::errors::StorageError;
use streamgroup::storage::StorageStrategy;
use streamgroup::types::EntryId;
use uuid::Uuid;

/// Buckets kept outside the log, keyed by the producer's message id.
#[derive(Clone, Default)]
pub struct InMemoryBucketStorage {
    buckets: Arc<RwLock<HashMap<(Uuid, BucketCategory), Bucket>>>,
}

impl InMemoryBucketStorage {
    /// Create an empty bucket storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the bucket of `category` for the message.
    pub fn put(&self, message_id: Uuid, category: BucketCategory, bucket: Bucket) {
        let _ = self.buckets.write().insert((message_id, category), bucket);
    }

    /// Number of stored buckets.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }
}

#[async_trait]
impl StorageStrategy for InMemoryBucketStorage {
    async fn load_bucket(
        &self,
        _id: EntryId,
        metadata: &EntryMetadata,
        _existing: &Bucket,
        category: BucketCategory,
    ) -> Result<Bucket, StorageError> {
        Ok(self
            .buckets
            .read()
            .get(&(metadata.message_id, category))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamgroup::types::{Environment, StreamUri};

    #[tokio::test]
    async fn returns_stored_bucket_or_empty() {
        let storage = InMemoryBucketStorage::new();
        let metadata = EntryMetadata::new("op", Environment::default(), StreamUri::try_new("s").unwrap());
        storage.put(
            metadata.message_id,
            BucketCategory::Segments,
            Bucket::new().with("body", "large payload"),
        );

        let segments = storage
            .load_bucket(EntryId::new(1, 0), &metadata, &Bucket::new(), BucketCategory::Segments)
            .await
            .unwrap();
        let interceptor_data = storage
            .load_bucket(
                EntryId::new(1, 0),
                &metadata,
                &Bucket::new(),
                BucketCategory::InterceptorData,
            )
            .await
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert!(interceptor_data.is_empty());
    }
}
