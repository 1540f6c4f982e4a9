//! A `LogStore` wrapper that records every call.
//!
//! Used to assert on how the engine drives the store: how many entries it
//! asks for after a release, which ids it acknowledges, what it hands back to
//! the placeholder consumer.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use streamgroup::entry::Entry;
use streamgroup::errors::StoreResult;
use streamgroup::store::{LogStore, PendingConsumer, PendingEntry};
use streamgroup::types::{ConsumerGroup, ConsumerName, EntryId, StreamKey};

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `create_group_if_missing`
    CreateGroup,
    /// `read_new` with the requested count
    ReadNew {
        /// Reading consumer
        consumer: ConsumerName,
        /// Requested count
        count: usize,
    },
    /// `read_self_pending` with the requested count
    ReadSelfPending {
        /// Reading consumer
        consumer: ConsumerName,
        /// Requested count
        count: usize,
    },
    /// `read_range`
    ReadRange,
    /// `pending_summary`
    PendingSummary,
    /// `pending_detail` for one consumer
    PendingDetail(ConsumerName),
    /// `claim`
    Claim {
        /// New owner
        owner: ConsumerName,
        /// Idle guard
        min_idle: Duration,
        /// Requested ids
        ids: Vec<EntryId>,
    },
    /// `ack`
    Ack(EntryId),
    /// `reassign`
    Reassign {
        /// Target owner, normally the placeholder
        owner: ConsumerName,
        /// Reassigned ids
        ids: Vec<EntryId>,
    },
    /// `unclaim`
    Unclaim(Vec<EntryId>),
}

/// Records calls, then forwards them to the wrapped store.
pub struct RecordingLogStore<S> {
    store: S,
    calls: Mutex<Vec<StoreCall>>,
}

impl<S> RecordingLogStore<S> {
    /// Wraps `store`.
    pub const fn new(store: S) -> Self {
        Self {
            store,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Counts requested by `read_new`, in order.
    pub fn read_new_counts(&self) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::ReadNew { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }

    /// Acknowledged ids, in order.
    pub fn acked(&self) -> Vec<EntryId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::Ack(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Ids handed back through `reassign`, in order.
    pub fn reassigned(&self) -> Vec<EntryId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::Reassign { ids, .. } => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl<S> LogStore for RecordingLogStore<S>
where
    S: LogStore,
{
    async fn create_group_if_missing(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<()> {
        self.record(StoreCall::CreateGroup);
        self.store.create_group_if_missing(stream, group).await
    }

    async fn read_new(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.record(StoreCall::ReadNew {
            consumer: consumer.clone(),
            count,
        });
        self.store.read_new(stream, group, consumer, count).await
    }

    async fn read_self_pending(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.record(StoreCall::ReadSelfPending {
            consumer: consumer.clone(),
            count,
        });
        self.store
            .read_self_pending(stream, group, consumer, count)
            .await
    }

    async fn read_range(
        &self,
        stream: &StreamKey,
        from: EntryId,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.record(StoreCall::ReadRange);
        self.store.read_range(stream, from, count).await
    }

    async fn pending_summary(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<Vec<PendingConsumer>> {
        self.record(StoreCall::PendingSummary);
        self.store.pending_summary(stream, group).await
    }

    async fn pending_detail(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        range: (EntryId, EntryId),
        count: usize,
    ) -> StoreResult<Vec<PendingEntry>> {
        self.record(StoreCall::PendingDetail(consumer.clone()));
        self.store
            .pending_detail(stream, group, consumer, range, count)
            .await
    }

    async fn claim(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        new_owner: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<Vec<Entry>> {
        self.record(StoreCall::Claim {
            owner: new_owner.clone(),
            min_idle,
            ids: ids.to_vec(),
        });
        self.store
            .claim(stream, group, new_owner, min_idle, ids)
            .await
    }

    async fn ack(&self, stream: &StreamKey, group: &ConsumerGroup, id: EntryId) -> StoreResult<()> {
        self.record(StoreCall::Ack(id));
        self.store.ack(stream, group, id).await
    }

    async fn reassign(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        placeholder: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<()> {
        self.record(StoreCall::Reassign {
            owner: placeholder.clone(),
            ids: ids.to_vec(),
        });
        self.store
            .reassign(stream, group, placeholder, min_idle, ids)
            .await
    }

    async fn unclaim(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        ids: &[EntryId],
    ) -> StoreResult<bool> {
        self.record(StoreCall::Unclaim(ids.to_vec()));
        self.store.unclaim(stream, group, consumer, ids).await
    }
}
