//! In-memory adapter for the `streamgroup` consumer engine
//!
//! This crate provides an in-memory implementation of the `LogStore` trait,
//! with consumer groups, pending-entries lists and idle tracking, plus a
//! producer-side [`InMemoryLogStore::append`]. It is useful for testing and
//! development scenarios where persistence is not required.
//!
//! Idle times are measured with `tokio::time::Instant`, so tests running with
//! a paused clock can advance idle time deterministically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod storage;

pub use storage::InMemoryBucketStorage;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use streamgroup::entry::{Bucket, Entry, EntryMetadata};
use streamgroup::errors::{StoreError, StoreResult};
use streamgroup::store::{LogStore, PendingConsumer, PendingEntry};
use streamgroup::types::{ConsumerGroup, ConsumerName, EntryId, StreamKey};
use tokio::time::Instant;
use tracing::trace;

/// Thread-safe in-memory log store for testing
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    streams: Arc<RwLock<HashMap<StreamKey, StreamLog>>>,
}

#[derive(Default)]
struct StreamLog {
    entries: BTreeMap<EntryId, Entry>,
    last_id: Option<EntryId>,
    groups: HashMap<ConsumerGroup, GroupState>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: Option<EntryId>,
    pending: BTreeMap<EntryId, PendingRecord>,
}

struct PendingRecord {
    owner: ConsumerName,
    delivered_at: Instant,
    delivery_count: u64,
}

impl PendingRecord {
    fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.delivered_at)
    }
}

impl InMemoryLogStore {
    /// Create a new empty in-memory log store
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry with a store-assigned id and returns the id.
    ///
    /// Ids follow the wall clock in milliseconds and are strictly increasing
    /// per stream.
    pub fn append(
        &self,
        stream: &StreamKey,
        metadata: EntryMetadata,
        segments: Bucket,
        interceptor_data: Bucket,
    ) -> EntryId {
        let mut streams = self.streams.write();
        let log = streams.entry(stream.clone()).or_default();
        let now_millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let id = match log.last_id {
            Some(last) if last.millis() >= now_millis => last.successor(),
            _ => EntryId::new(now_millis, 0),
        };
        log.insert(Entry::new(id, metadata, segments, interceptor_data));
        id
    }

    /// Appends an entry with a caller-chosen id.
    ///
    /// # Errors
    /// Returns `StoreError::Internal` when `id` is not greater than the last id
    /// of the stream.
    pub fn append_with_id(
        &self,
        stream: &StreamKey,
        id: EntryId,
        metadata: EntryMetadata,
        segments: Bucket,
        interceptor_data: Bucket,
    ) -> StoreResult<EntryId> {
        let mut streams = self.streams.write();
        let log = streams.entry(stream.clone()).or_default();
        if log.last_id.is_some_and(|last| id <= last) {
            return Err(StoreError::Internal(format!(
                "entry id {id} is not greater than the last id of stream {stream}"
            )));
        }
        log.insert(Entry::new(id, metadata, segments, interceptor_data));
        Ok(id)
    }

    /// Number of entries in the stream.
    pub fn len(&self, stream: &StreamKey) -> usize {
        self.streams
            .read()
            .get(stream)
            .map_or(0, |log| log.entries.len())
    }

    /// Whether the stream holds no entries.
    pub fn is_empty(&self, stream: &StreamKey) -> bool {
        self.len(stream) == 0
    }

    /// Ids of entries delivered to the group and not yet acknowledged.
    pub fn pending_ids(&self, stream: &StreamKey, group: &ConsumerGroup) -> Vec<EntryId> {
        self.streams
            .read()
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|state| state.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Current owner of a pending entry.
    pub fn pending_owner(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        id: EntryId,
    ) -> Option<ConsumerName> {
        self.streams
            .read()
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .and_then(|state| state.pending.get(&id))
            .map(|record| record.owner.clone())
    }

    /// How many times a pending entry has been delivered.
    pub fn delivery_count(&self, stream: &StreamKey, group: &ConsumerGroup, id: EntryId) -> u64 {
        self.streams
            .read()
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .and_then(|state| state.pending.get(&id))
            .map_or(0, |record| record.delivery_count)
    }

    /// Whether the group exists on the stream.
    pub fn has_group(&self, stream: &StreamKey, group: &ConsumerGroup) -> bool {
        self.streams
            .read()
            .get(stream)
            .is_some_and(|log| log.groups.contains_key(group))
    }

    /// Removes a consumer group, as an operator deleting it would.
    pub fn drop_group(&self, stream: &StreamKey, group: &ConsumerGroup) -> bool {
        self.streams
            .write()
            .get_mut(stream)
            .is_some_and(|log| log.groups.remove(group).is_some())
    }

    fn with_group<T>(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        f: impl FnOnce(&BTreeMap<EntryId, Entry>, &mut GroupState) -> T,
    ) -> StoreResult<T> {
        let mut streams = self.streams.write();
        let log = streams.get_mut(stream).ok_or_else(|| group_missing(stream, group))?;
        let state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| group_missing(stream, group))?;
        Ok(f(&log.entries, state))
    }
}

impl StreamLog {
    fn insert(&mut self, entry: Entry) {
        self.last_id = Some(entry.id);
        let _ = self.entries.insert(entry.id, entry);
    }
}

fn group_missing(stream: &StreamKey, group: &ConsumerGroup) -> StoreError {
    StoreError::GroupMissing {
        stream: stream.clone(),
        group: group.clone(),
    }
}

fn take_over(
    entries: &BTreeMap<EntryId, Entry>,
    state: &mut GroupState,
    new_owner: &ConsumerName,
    min_idle: Duration,
    ids: &[EntryId],
    count_delivery: bool,
) -> Vec<Entry> {
    let now = Instant::now();
    let mut taken = Vec::new();
    for id in ids {
        let Some(record) = state.pending.get_mut(id) else {
            continue;
        };
        if record.idle(now) < min_idle {
            continue;
        }
        record.owner = new_owner.clone();
        record.delivered_at = now;
        if count_delivery {
            record.delivery_count += 1;
        }
        if let Some(entry) = entries.get(id) {
            taken.push(entry.clone());
        }
    }
    taken
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn create_group_if_missing(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<()> {
        let mut streams = self.streams.write();
        let log = streams.entry(stream.clone()).or_default();
        if !log.groups.contains_key(group) {
            trace!(%stream, %group, "creating consumer group");
            let _ = log.groups.insert(group.clone(), GroupState::default());
        }
        Ok(())
    }

    async fn read_new(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.with_group(stream, group, |entries, state| {
            let now = Instant::now();
            let fresh: Vec<Entry> = match state.last_delivered {
                Some(last) => entries
                    .range(last.successor()..)
                    .take(count)
                    .map(|(_, entry)| entry.clone())
                    .collect(),
                None => entries.values().take(count).cloned().collect(),
            };
            for entry in &fresh {
                let _ = state.pending.insert(
                    entry.id,
                    PendingRecord {
                        owner: consumer.clone(),
                        delivered_at: now,
                        delivery_count: 1,
                    },
                );
            }
            if let Some(last) = fresh.last() {
                state.last_delivered = Some(last.id);
            }
            fresh
        })
    }

    async fn read_self_pending(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.with_group(stream, group, |entries, state| {
            state
                .pending
                .iter()
                .filter(|(_, record)| &record.owner == consumer)
                .filter_map(|(id, _)| entries.get(id).cloned())
                .take(count)
                .collect()
        })
    }

    async fn read_range(
        &self,
        stream: &StreamKey,
        from: EntryId,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        let streams = self.streams.read();
        let log = streams
            .get(stream)
            .ok_or_else(|| StoreError::StreamNotFound(stream.clone()))?;
        Ok(log
            .entries
            .range(from..)
            .take(count)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn pending_summary(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<Vec<PendingConsumer>> {
        self.with_group(stream, group, |_, state| {
            let mut by_owner: BTreeMap<ConsumerName, PendingConsumer> = BTreeMap::new();
            for (id, record) in &state.pending {
                by_owner
                    .entry(record.owner.clone())
                    .and_modify(|summary| {
                        summary.count += 1;
                        summary.highest = *id;
                    })
                    .or_insert_with(|| PendingConsumer {
                        consumer: record.owner.clone(),
                        count: 1,
                        lowest: *id,
                        highest: *id,
                    });
            }
            by_owner.into_values().collect()
        })
    }

    async fn pending_detail(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        range: (EntryId, EntryId),
        count: usize,
    ) -> StoreResult<Vec<PendingEntry>> {
        let (from, to) = range;
        if from > to {
            return Ok(Vec::new());
        }
        self.with_group(stream, group, |_, state| {
            let now = Instant::now();
            state
                .pending
                .range(from..=to)
                .filter(|(_, record)| &record.owner == consumer)
                .take(count)
                .map(|(id, record)| PendingEntry {
                    id: *id,
                    consumer: record.owner.clone(),
                    idle: record.idle(now),
                    delivery_count: record.delivery_count,
                })
                .collect()
        })
    }

    async fn claim(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        new_owner: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<Vec<Entry>> {
        self.with_group(stream, group, |entries, state| {
            take_over(entries, state, new_owner, min_idle, ids, true)
        })
    }

    async fn ack(&self, stream: &StreamKey, group: &ConsumerGroup, id: EntryId) -> StoreResult<()> {
        self.with_group(stream, group, |_, state| {
            let _ = state.pending.remove(&id);
        })
    }

    async fn reassign(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        placeholder: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<()> {
        self.with_group(stream, group, |entries, state| {
            let _ = take_over(entries, state, placeholder, min_idle, ids, false);
        })
    }
}
