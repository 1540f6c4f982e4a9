//! Storage strategies: loading entry buckets kept outside the log.
//!
//! Large payloads are often stored elsewhere and only referenced from the log
//! entry. Before an entry reaches interceptors and the handler, each bucket
//! category is resolved through the plan's strategies in registration order.
//! The first strategy returning a non-empty bucket wins; when none does, the
//! inline bucket from the log is kept.

use crate::entry::{Bucket, BucketCategory, Entry, EntryMetadata};
use crate::errors::StorageError;
use crate::types::EntryId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Loads a bucket for an entry from an external store.
#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Returns the bucket of `category` for the entry, or an empty bucket when
    /// this strategy does not hold it.
    ///
    /// `existing` is the inline bucket read from the log; strategies commonly
    /// find their lookup keys in it.
    async fn load_bucket(
        &self,
        id: EntryId,
        metadata: &EntryMetadata,
        existing: &Bucket,
        category: BucketCategory,
    ) -> Result<Bucket, StorageError>;
}

/// Resolves both bucket categories of `entry` through `strategies`.
pub(crate) async fn resolve_buckets(
    strategies: &[Arc<dyn StorageStrategy>],
    entry: Entry,
) -> Result<Entry, StorageError> {
    if strategies.is_empty() {
        return Ok(entry);
    }

    let mut resolved = entry;
    for category in [BucketCategory::Segments, BucketCategory::InterceptorData] {
        if let Some(bucket) = load_first_non_empty(strategies, &resolved, category).await? {
            trace!(entry = %resolved.id, %category, "bucket loaded from storage strategy");
            resolved = resolved.with_bucket(category, bucket);
        }
    }
    Ok(resolved)
}

async fn load_first_non_empty(
    strategies: &[Arc<dyn StorageStrategy>],
    entry: &Entry,
    category: BucketCategory,
) -> Result<Option<Bucket>, StorageError> {
    for strategy in strategies {
        let bucket = strategy
            .load_bucket(entry.id, &entry.metadata, entry.bucket(category), category)
            .await?;
        if !bucket.is_empty() {
            return Ok(Some(bucket));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Environment, StreamUri};

    struct Fixed(Bucket);

    #[async_trait]
    impl StorageStrategy for Fixed {
        async fn load_bucket(
            &self,
            _id: EntryId,
            _metadata: &EntryMetadata,
            _existing: &Bucket,
            category: BucketCategory,
        ) -> Result<Bucket, StorageError> {
            Ok(match category {
                BucketCategory::Segments => self.0.clone(),
                BucketCategory::InterceptorData => Bucket::new(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl StorageStrategy for Failing {
        async fn load_bucket(
            &self,
            id: EntryId,
            _metadata: &EntryMetadata,
            _existing: &Bucket,
            category: BucketCategory,
        ) -> Result<Bucket, StorageError> {
            Err(StorageError {
                entry: id,
                category,
                reason: "object store offline".to_string(),
            })
        }
    }

    fn entry() -> Entry {
        Entry::new(
            EntryId::new(5, 0),
            EntryMetadata::new(
                "op",
                Environment::default(),
                StreamUri::try_new("s").unwrap(),
            ),
            Bucket::new().with("ref", "key-1"),
            Bucket::new().with("trace", "t"),
        )
    }

    #[tokio::test]
    async fn first_non_empty_strategy_wins() {
        let strategies: Vec<Arc<dyn StorageStrategy>> = vec![
            Arc::new(Fixed(Bucket::new())),
            Arc::new(Fixed(Bucket::new().with("body", "second"))),
            Arc::new(Fixed(Bucket::new().with("body", "third"))),
        ];

        let resolved = resolve_buckets(&strategies, entry()).await.unwrap();

        assert_eq!(resolved.segments, Bucket::new().with("body", "second"));
        assert_eq!(resolved.interceptor_data, Bucket::new().with("trace", "t"));
    }

    #[tokio::test]
    async fn inline_buckets_kept_without_strategies() {
        let resolved = resolve_buckets(&[], entry()).await.unwrap();
        assert_eq!(resolved, entry());
    }

    #[tokio::test]
    async fn strategy_failure_is_reported() {
        let strategies: Vec<Arc<dyn StorageStrategy>> = vec![Arc::new(Failing)];

        let error = resolve_buckets(&strategies, entry()).await.unwrap_err();

        assert_eq!(error.entry, EntryId::new(5, 0));
        assert_eq!(error.category, BucketCategory::Segments);
    }
}
