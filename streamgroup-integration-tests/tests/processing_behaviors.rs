//! How ack behavior and partial consumer behavior combine with handler
//! outcomes, end to end against the in-memory store.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, group, key, plan, seed, shared};
use futures::FutureExt;
use streamgroup::prelude::*;
use streamgroup::SubscriptionError;
use streamgroup_memory::InMemoryLogStore;
use streamgroup_testing::{EntryCollector, RecordingLogStore, Reply, StoreCall};

const LIMIT: Duration = Duration::from_secs(60);

fn operation_index(entry: &Entry) -> usize {
    entry
        .operation()
        .trim_start_matches("op-")
        .parse()
        .unwrap_or(usize::MAX)
}

#[tokio::test(start_paused = true)]
async fn on_finally_acknowledges_failures_and_never_redelivers() {
    // Given
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let _ = seed(&store, &stream, 4);
    let collector = Arc::new(EntryCollector::failing());
    let plan = plan("orders", "alpha").with_ack_behavior(AckBehavior::OnFinally);

    // When
    let handle = subscribe(shared(&store), plan, collector.clone());
    collector.wait_for(4).await;
    eventually(LIMIT, || store.pending_ids(&stream, &group()).is_empty()).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    // Then
    assert_eq!(collector.invocations(), 4);
    assert!(!handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn on_succeed_failure_faults_and_keeps_the_rest_pending() {
    // Given
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let ids = seed(&store, &stream, 3);
    let collector = Arc::new(EntryCollector::scripted(|entry, _| {
        if operation_index(entry) == 1 {
            Reply::Fail("payment declined".to_string())
        } else {
            Reply::Handled
        }
    }));
    let plan = plan("orders", "alpha").with_ack_behavior(AckBehavior::OnSucceed);

    // When
    let handle = subscribe(shared(&store), plan, collector.clone());
    let status = tokio::time::timeout(LIMIT, handle.completion()).await.unwrap();

    // Then
    match status.error() {
        Some(SubscriptionError::Handler { entry, .. }) => assert_eq!(*entry, ids[1]),
        other => panic!("expected a handler fault, got {other:?}"),
    }
    assert_eq!(store.pending_ids(&stream, &group()), ids[1..].to_vec());
    assert_eq!(
        store.pending_owner(&stream, &group(), ids[2]),
        Some(ConsumerName::placeholder())
    );
}

#[tokio::test(start_paused = true)]
async fn strict_behavior_faults_on_an_unhandled_entry() {
    for behavior in [
        PartialConsumerBehavior::Strict,
        PartialConsumerBehavior::ThrowIfNotHandled,
    ] {
        // Given
        let store = InMemoryLogStore::new();
        let stream = key("orders");
        let ids = seed(&store, &stream, 2);
        let collector = Arc::new(EntryCollector::scripted(|_, _| Reply::NotHandled));
        let plan = plan("orders", "alpha").with_partial_behavior(behavior);

        // When
        let handle = subscribe(shared(&store), plan, collector.clone());
        let status = tokio::time::timeout(LIMIT, handle.completion()).await.unwrap();

        // Then
        assert!(
            matches!(
                status.error(),
                Some(SubscriptionError::NotHandled { entry, .. }) if *entry == ids[0]
            ),
            "{behavior:?} should fault, got {status}"
        );
        assert_eq!(collector.invocations(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn loose_behavior_acknowledges_unhandled_entries() {
    // Given
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let _ = seed(&store, &stream, 3);
    let collector = Arc::new(EntryCollector::scripted(|_, _| Reply::NotHandled));
    let plan = plan("orders", "alpha").with_partial_behavior(PartialConsumerBehavior::Loose);

    // When
    let handle = subscribe(shared(&store), plan, collector.clone());
    collector.wait_for(3).await;

    // Then
    eventually(LIMIT, || store.pending_ids(&stream, &group()).is_empty()).await;
    assert!(!handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn sequential_behavior_releases_and_redelivers_in_order() {
    // Given: "op-2" is not handled the first time it is seen
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let _ = seed(&store, &stream, 5);
    let skipped = Arc::new(AtomicBool::new(false));
    let collector = {
        let skipped = Arc::clone(&skipped);
        Arc::new(EntryCollector::scripted(move |entry, _| {
            if operation_index(entry) == 2 && !skipped.swap(true, Ordering::SeqCst) {
                Reply::NotHandled
            } else {
                Reply::Handled
            }
        }))
    };
    let recording = Arc::new(RecordingLogStore::new(store.clone()));
    let plan = plan("orders", "alpha").with_partial_behavior(PartialConsumerBehavior::Sequential);

    // When
    let _handle = subscribe(recording.clone(), plan, collector.clone());
    collector.wait_for(6).await;
    eventually(LIMIT, || store.pending_ids(&stream, &group()).is_empty()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Then: ordering survives the release
    assert_eq!(
        collector.operations(),
        ["op-0", "op-1", "op-2", "op-2", "op-3", "op-4"]
    );

    // Then: the batch size drops to one after the release and grows back
    let reclaimed: Vec<usize> = recording
        .calls()
        .iter()
        .filter_map(|call| match call {
            StoreCall::Claim { ids, .. } => Some(ids.len()),
            _ => None,
        })
        .collect();
    assert_eq!(reclaimed, [1, 2]);
    assert_eq!(recording.read_new_counts()[..2], [16, 4]);
}

#[tokio::test(start_paused = true)]
async fn manual_ack_leaves_unacknowledged_entries_pending() {
    // Given: the handler acknowledges even entries only
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let ids = seed(&store, &stream, 4);
    let handler = Arc::new(handler_fn(|entry, ack| {
        async move {
            if operation_index(entry) % 2 == 0 {
                let _ = ack
                    .acknowledge(AckCause::Manual)
                    .await
                    .map_err(|error| HandlerError::new(error.to_string()))?;
            }
            Ok::<_, HandlerError>(true)
        }
        .boxed()
    }));
    let plan = plan("orders", "alpha").with_ack_behavior(AckBehavior::Manual);

    // When
    let handle = subscribe(shared(&store), plan, handler);
    eventually(LIMIT, || handle.consumed() == 4).await;
    eventually(LIMIT, || store.pending_ids(&stream, &group()).len() == 2).await;

    // Then
    assert_eq!(store.pending_ids(&stream, &group()), vec![ids[1], ids[3]]);
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_ack_handle_releases_the_rest_of_the_batch() {
    // Given: the handler gives up on "op-1" the first time
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let ids = seed(&store, &stream, 4);
    let cancelled = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(seen::SeenIds::default());
    let handler = {
        let cancelled = Arc::clone(&cancelled);
        let seen = Arc::clone(&seen);
        Arc::new(handler_fn(move |entry, ack| {
            let cancelled = Arc::clone(&cancelled);
            let seen = Arc::clone(&seen);
            async move {
                seen.push(entry.id);
                if operation_index(entry) == 1 && !cancelled.swap(true, Ordering::SeqCst) {
                    let _ = ack.cancel(AckCause::Manual).await;
                }
                Ok(true)
            }
            .boxed()
        }))
    };

    // When
    let _handle = subscribe(shared(&store), plan("orders", "alpha"), handler);
    eventually(LIMIT, || seen.len() == 4).await;
    eventually(LIMIT, || store.pending_ids(&stream, &group()).len() == 1).await;

    // Then: the cancelled entry stays with its owner, the rest was redelivered
    assert_eq!(seen.ids(), ids);
    assert_eq!(store.pending_ids(&stream, &group()), vec![ids[1]]);
    assert_eq!(
        store.pending_owner(&stream, &group(), ids[1]),
        Some(common::consumer("alpha"))
    );
}

#[tokio::test(start_paused = true)]
async fn retry_policy_retries_before_acknowledging() {
    // Given: two failures, then success
    let store = InMemoryLogStore::new();
    let stream = key("orders");
    let _ = seed(&store, &stream, 1);
    let collector = Arc::new(EntryCollector::scripted(|_, attempt| {
        if attempt < 2 {
            Reply::Fail("flaky downstream".to_string())
        } else {
            Reply::Handled
        }
    }));
    let plan = plan("orders", "alpha")
        .with_ack_behavior(AckBehavior::OnSucceed)
        .with_retry_policy(RetryPolicy::exponential(3, Duration::from_millis(10)));

    // When
    let handle = subscribe(shared(&store), plan, collector.clone());
    collector.wait_for(3).await;
    eventually(LIMIT, || store.pending_ids(&stream, &group()).is_empty()).await;

    // Then
    assert_eq!(collector.invocations(), 3);
    assert_eq!(handle.consumed(), 1);
    assert!(!handle.is_finished());
}

mod seen {
    use std::sync::Mutex;

    use streamgroup::EntryId;

    #[derive(Default)]
    pub struct SeenIds(Mutex<Vec<EntryId>>);

    impl SeenIds {
        pub fn push(&self, id: EntryId) {
            self.0.lock().unwrap().push(id);
        }

        pub fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        pub fn ids(&self) -> Vec<EntryId> {
            self.0.lock().unwrap().clone()
        }
    }
}
