//! Contract suite for `LogStore` implementations.
//!
//! The consumer engine relies on a handful of store guarantees: idempotent
//! group creation, at-most-once delivery of fresh entries per group, per-owner
//! pending lists and an idle guard on ownership transfer. Each `test_*`
//! function checks one of them against a store built by `make_store`, using
//! `append` to put entries on the stream the way the producer side would.
//!
//! Backends wire the whole suite in with [`log_store_contract_tests!`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use streamgroup::entry::{Bucket, EntryMetadata};
use streamgroup::errors::StoreError;
use streamgroup::store::LogStore;
use streamgroup::types::{ConsumerGroup, ConsumerName, EntryId, Environment, StreamKey, StreamUri};
use uuid::Uuid;

/// A failed contract scenario.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

/// Metadata for an entry appended by a contract scenario.
pub fn contract_metadata(stream: &StreamKey, operation: &str) -> EntryMetadata {
    EntryMetadata::new(
        operation,
        stream.environment().clone(),
        stream.uri().clone(),
    )
}

/// Empty bucket, for appends that carry no payload.
pub fn no_payload() -> Bucket {
    Bucket::new()
}

fn contract_stream(
    scenario: &'static str,
    label: &str,
) -> Result<StreamKey, ContractTestFailure> {
    // Unique per run so suites can share a backend
    let raw = format!("contract.{scenario}.{label}.{}", Uuid::now_v7());

    let uri = StreamUri::try_new(raw.clone()).map_err(|error| {
        ContractTestFailure::assertion(
            scenario,
            format!("unable to construct stream uri `{raw}`: {error}"),
        )
    })?;
    Ok(StreamKey::new(Environment::new("contract"), uri))
}

fn contract_group(scenario: &'static str) -> Result<ConsumerGroup, ContractTestFailure> {
    ConsumerGroup::try_new(format!("{scenario}-group")).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid group name: {error}"))
    })
}

fn contract_consumer(
    scenario: &'static str,
    name: &str,
) -> Result<ConsumerName, ContractTestFailure> {
    ConsumerName::try_new(name).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid consumer name: {error}"))
    })
}

fn append_many<S, A>(store: &S, append: &A, stream: &StreamKey, count: usize) -> Vec<EntryId>
where
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    (0..count)
        .map(|index| append(store, stream, &format!("contract-op-{index}")))
        .collect()
}

/// Fresh entries are delivered once per group, in stream order, starting from
/// the beginning of the stream even when appended before the group existed.
pub async fn test_fresh_reads_deliver_once<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "fresh_reads_deliver_once";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let alice = contract_consumer(SCENARIO, "alice")?;
    let bob = contract_consumer(SCENARIO, "bob")?;

    let ids = append_many(&store, &append, &stream, 3);
    store
        .create_group_if_missing(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;

    let first = store
        .read_new(&stream, &group, &alice, 2)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;
    let second = store
        .read_new(&stream, &group, &bob, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;
    let third = store
        .read_new(&stream, &group, &alice, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;

    let delivered: Vec<EntryId> = first
        .iter()
        .chain(second.iter())
        .map(|entry| entry.id)
        .collect();

    if first.len() != 2 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected read_new to honor count 2, got {}", first.len()),
        ));
    }
    if delivered != ids {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected each entry delivered once in order {ids:?}, got {delivered:?}"),
        ));
    }
    if !third.is_empty() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected drained group to read nothing, got {} entries", third.len()),
        ));
    }

    Ok(())
}

/// Concurrent creations of the same group all succeed and leave one group.
pub async fn test_concurrent_group_creation<F, S, A>(
    make_store: F,
    append: A,
) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore + 'static,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "concurrent_group_creation";

    let store = Arc::new(make_store());
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let reader = contract_consumer(SCENARIO, "reader")?;

    let _ = append_many(store.as_ref(), &append, &stream, 2);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let stream = stream.clone();
            let group = group.clone();
            tokio::spawn(async move { store.create_group_if_missing(&stream, &group).await })
        })
        .collect();

    for task in tasks {
        let result = task.await.map_err(|error| {
            ContractTestFailure::assertion(SCENARIO, format!("creation task panicked: {error}"))
        })?;
        result
            .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;
    }

    let delivered = store
        .read_new(&stream, &group, &reader, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;
    store
        .create_group_if_missing(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;
    let again = store
        .read_new(&stream, &group, &reader, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;

    if delivered.len() != 2 || !again.is_empty() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!(
                "expected recreation to keep the group position, read {} then {}",
                delivered.len(),
                again.len()
            ),
        ));
    }

    Ok(())
}

/// Reading a group that was never created reports `GroupMissing`.
pub async fn test_missing_group_reads<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "missing_group_reads";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let reader = contract_consumer(SCENARIO, "reader")?;

    let _ = append_many(&store, &append, &stream, 1);

    match store.read_new(&stream, &group, &reader, 1).await {
        Err(error) if error.is_group_missing() => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(SCENARIO, "read_new", error)),
        Ok(entries) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!(
                "expected GroupMissing, got {} entries from a group that does not exist",
                entries.len()
            ),
        )),
    }
}

/// A consumer re-reads the entries it owns, oldest first, and nobody else's.
pub async fn test_self_pending_reads<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "self_pending_reads";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let alice = contract_consumer(SCENARIO, "alice")?;
    let bob = contract_consumer(SCENARIO, "bob")?;

    let ids = append_many(&store, &append, &stream, 3);
    store
        .create_group_if_missing(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;
    let _ = store
        .read_new(&stream, &group, &alice, 3)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;

    let owned = store
        .read_self_pending(&stream, &group, &alice, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_self_pending", error))?;
    let foreign = store
        .read_self_pending(&stream, &group, &bob, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_self_pending", error))?;

    let owned_ids: Vec<EntryId> = owned.iter().map(|entry| entry.id).collect();
    if owned_ids != ids {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected own pending entries {ids:?}, got {owned_ids:?}"),
        ));
    }
    if !foreign.is_empty() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "expected a consumer without pending entries to read nothing",
        ));
    }

    Ok(())
}

/// Ack removes the entry from the pending list and is idempotent.
pub async fn test_ack_is_idempotent<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "ack_is_idempotent";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let reader = contract_consumer(SCENARIO, "reader")?;

    let ids = append_many(&store, &append, &stream, 2);
    store
        .create_group_if_missing(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;
    let _ = store
        .read_new(&stream, &group, &reader, 2)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;

    for _ in 0..2 {
        store
            .ack(&stream, &group, ids[0])
            .await
            .map_err(|error| ContractTestFailure::store_error(SCENARIO, "ack", error))?;
    }

    let remaining = store
        .read_self_pending(&stream, &group, &reader, 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_self_pending", error))?;
    let remaining: Vec<EntryId> = remaining.iter().map(|entry| entry.id).collect();

    if remaining != vec![ids[1]] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected only {} pending after ack, got {remaining:?}", ids[1]),
        ));
    }

    Ok(())
}

/// Claims skip entries touched more recently than the idle guard.
pub async fn test_claim_respects_min_idle<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "claim_respects_min_idle";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let alice = contract_consumer(SCENARIO, "alice")?;
    let bob = contract_consumer(SCENARIO, "bob")?;

    let ids = append_many(&store, &append, &stream, 1);
    store
        .create_group_if_missing(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;
    let _ = store
        .read_new(&stream, &group, &alice, 1)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;

    let guarded = store
        .claim(&stream, &group, &bob, Duration::from_secs(3600), &ids)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "claim", error))?;
    if !guarded.is_empty() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "claim took an entry that was delivered moments ago",
        ));
    }

    let claimed = store
        .claim(&stream, &group, &bob, Duration::ZERO, &ids)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "claim", error))?;
    if claimed.iter().map(|entry| entry.id).collect::<Vec<_>>() != ids {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected claim without idle guard to return {ids:?}"),
        ));
    }

    let detail = store
        .pending_detail(&stream, &group, &bob, (EntryId::MIN, EntryId::MAX), 10)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "pending_detail", error))?;
    match detail.as_slice() {
        [pending] if pending.delivery_count >= 2 => Ok(()),
        other => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected the claimed entry owned by bob with a second delivery, got {other:?}"),
        )),
    }
}

/// Reassignment moves ownership to the placeholder and shows up in the
/// pending summary under its name.
pub async fn test_reassign_to_placeholder<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "reassign_to_placeholder";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;
    let group = contract_group(SCENARIO)?;
    let reader = contract_consumer(SCENARIO, "reader")?;
    let placeholder = ConsumerName::placeholder();

    let ids = append_many(&store, &append, &stream, 3);
    store
        .create_group_if_missing(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "create_group", error))?;
    let _ = store
        .read_new(&stream, &group, &reader, 3)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_new", error))?;

    store
        .reassign(&stream, &group, &placeholder, Duration::ZERO, &ids[1..])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "reassign", error))?;

    let summary = store
        .pending_summary(&stream, &group)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "pending_summary", error))?;
    let released = summary
        .iter()
        .find(|row| row.consumer.is_placeholder())
        .ok_or_else(|| {
            ContractTestFailure::assertion(SCENARIO, "placeholder missing from pending summary")
        })?;
    let kept = summary
        .iter()
        .find(|row| row.consumer == reader)
        .ok_or_else(|| {
            ContractTestFailure::assertion(SCENARIO, "reader missing from pending summary")
        })?;

    if released.count != 2 || released.lowest != ids[1] || released.highest != ids[2] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("unexpected placeholder summary {released:?}"),
        ));
    }
    if kept.count != 1 || kept.lowest != ids[0] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("unexpected reader summary {kept:?}"),
        ));
    }

    Ok(())
}

/// Range reads ignore group state and start at the given id.
pub async fn test_range_reads<F, S, A>(make_store: F, append: A) -> ContractTestResult
where
    F: Fn() -> S,
    S: LogStore,
    A: Fn(&S, &StreamKey, &str) -> EntryId,
{
    const SCENARIO: &str = "range_reads";

    let store = make_store();
    let stream = contract_stream(SCENARIO, "orders")?;

    let ids = append_many(&store, &append, &stream, 4);

    let tail = store
        .read_range(&stream, ids[1], 2)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_range", error))?;
    let tail: Vec<EntryId> = tail.iter().map(|entry| entry.id).collect();

    if tail != ids[1..3] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected {:?}, got {tail:?}", &ids[1..3]),
        ));
    }

    Ok(())
}

/// Generates one `#[tokio::test]` per contract scenario.
///
/// ```ignore
/// streamgroup_testing::log_store_contract_tests! {
///     suite = in_memory,
///     make_store = InMemoryLogStore::new,
///     append = |store: &InMemoryLogStore, stream: &StreamKey, operation: &str| {
///         store.append(stream, contract_metadata(stream, operation), no_payload(), no_payload())
///     },
/// }
/// ```
#[macro_export]
macro_rules! log_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr, append = $append:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use super::*;
            use $crate::contract::{
                test_ack_is_idempotent, test_claim_respects_min_idle,
                test_concurrent_group_creation, test_fresh_reads_deliver_once,
                test_missing_group_reads, test_range_reads, test_reassign_to_placeholder,
                test_self_pending_reads,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn fresh_reads_deliver_once_contract() {
                test_fresh_reads_deliver_once($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_group_creation_contract() {
                test_concurrent_group_creation($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn missing_group_reads_contract() {
                test_missing_group_reads($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn self_pending_reads_contract() {
                test_self_pending_reads($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn ack_is_idempotent_contract() {
                test_ack_is_idempotent($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn claim_respects_min_idle_contract() {
                test_claim_respects_min_idle($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn reassign_to_placeholder_contract() {
                test_reassign_to_placeholder($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn range_reads_contract() {
                test_range_reads($make_store, $append)
                    .await
                    .expect("log store contract failed");
            }
        }
    };
}

pub use log_store_contract_tests;
