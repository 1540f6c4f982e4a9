//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use streamgroup::prelude::*;
use streamgroup::{Bucket, EntryId, EntryMetadata, LogStore, StreamKey};
use streamgroup_memory::InMemoryLogStore;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn uri(name: &str) -> StreamUri {
    StreamUri::try_new(name).unwrap()
}

pub fn group() -> ConsumerGroup {
    ConsumerGroup::try_new("billing").unwrap()
}

pub fn consumer(name: &str) -> ConsumerName {
    ConsumerName::try_new(name).unwrap()
}

pub fn key(name: &str) -> StreamKey {
    StreamKey::new(Environment::default(), uri(name))
}

/// A plan with short delays so paused-clock tests move quickly.
pub fn plan(stream: &str, name: &str) -> ConsumerPlan {
    ConsumerPlan::new(uri(stream), group(), consumer(name))
        .with_delay_when_empty(DelayWhenEmptyBehavior::doubling(
            Duration::from_millis(10),
            Duration::from_millis(200),
        ))
        .with_claiming_trigger(ClaimingTrigger {
            empty_batch_threshold: 1,
            min_idle: Duration::from_secs(1),
        })
}

pub fn metadata(stream: &StreamKey, operation: &str) -> EntryMetadata {
    EntryMetadata::new(operation, stream.environment().clone(), stream.uri().clone())
}

/// Appends `count` entries named `op-0`, `op-1`, ...
pub fn seed(store: &InMemoryLogStore, stream: &StreamKey, count: usize) -> Vec<EntryId> {
    (0..count)
        .map(|index| {
            store.append(
                stream,
                metadata(stream, &format!("op-{index}")),
                Bucket::new(),
                Bucket::new(),
            )
        })
        .collect()
}

pub fn shared(store: &InMemoryLogStore) -> Arc<dyn LogStore> {
    Arc::new(store.clone())
}

/// Polls `condition` until it holds, failing the test after `limit`.
pub async fn eventually<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within {limit:?}");
}

/// Awaits `future`, failing the test after `limit`.
pub async fn within<F, T>(limit: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| panic!("did not finish within {limit:?}"))
}
