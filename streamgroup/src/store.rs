//! Log store abstraction for the consumer engine.
//!
//! This module defines the `LogStore` trait: the port through which the engine
//! talks to an append-only log with consumer groups and pending-entries lists.
//! The engine never re-implements ownership; every claim, ack and release goes
//! through these primitives and the store provides mutual exclusion over entry
//! ownership.

use crate::entry::Entry;
use crate::errors::StoreResult;
use crate::types::{ConsumerGroup, ConsumerName, EntryId, StreamKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summary of one consumer's pending entries within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConsumer {
    /// The owner of the pending entries
    pub consumer: ConsumerName,
    /// How many entries it owns
    pub count: u64,
    /// Lowest pending id
    pub lowest: EntryId,
    /// Highest pending id
    pub highest: EntryId,
}

/// One pending entry with its ownership details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// The entry id
    pub id: EntryId,
    /// The current owner
    pub consumer: ConsumerName,
    /// Time since the entry was last delivered or claimed
    pub idle: Duration,
    /// How many times the entry has been delivered
    pub delivery_count: u64,
}

/// The log store primitives the consumer engine relies on.
///
/// Implementations must make `create_group_if_missing` idempotent and must
/// serialize ownership changes so that a claim with a `min_idle` guard never
/// takes an entry that was touched more recently than that.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Creates the consumer group, positioned at the start of the stream, if it
    /// does not exist yet. Creates the stream too when needed.
    ///
    /// Concurrent calls for the same group must all succeed.
    async fn create_group_if_missing(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<()>;

    /// Reads up to `count` never-delivered entries for the group and records
    /// them as pending for `consumer`.
    ///
    /// # Errors
    /// Returns `StoreError::GroupMissing` when the group does not exist.
    async fn read_new(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>>;

    /// Reads up to `count` entries already pending for `consumer`, oldest first.
    async fn read_self_pending(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>>;

    /// Reads up to `count` entries starting at `from` (inclusive), ignoring groups.
    async fn read_range(
        &self,
        stream: &StreamKey,
        from: EntryId,
        count: usize,
    ) -> StoreResult<Vec<Entry>>;

    /// Lists every consumer of the group that owns pending entries.
    async fn pending_summary(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<Vec<PendingConsumer>>;

    /// Lists up to `count` pending entries of `consumer` with ids in `from..=to`.
    async fn pending_detail(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        range: (EntryId, EntryId),
        count: usize,
    ) -> StoreResult<Vec<PendingEntry>>;

    /// Transfers ownership of `ids` to `new_owner` and returns the claimed entries.
    ///
    /// Entries idle for less than `min_idle`, already acknowledged, or no longer
    /// pending are skipped. A successful claim resets the idle time.
    async fn claim(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        new_owner: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<Vec<Entry>>;

    /// Marks the entry permanently handled for the group. Idempotent.
    async fn ack(&self, stream: &StreamKey, group: &ConsumerGroup, id: EntryId)
        -> StoreResult<()>;

    /// Transfers ownership of `ids` to `placeholder` without returning them.
    ///
    /// Used to release entries so that any consumer can pick them up again.
    async fn reassign(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        placeholder: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<()>;

    /// Returns entries to the group without an owner.
    ///
    /// Stores without such a primitive keep the default, which does nothing and
    /// reports `false`; the entries then stay pending until they are idle long
    /// enough to be claimed.
    async fn unclaim(
        &self,
        _stream: &StreamKey,
        _group: &ConsumerGroup,
        _consumer: &ConsumerName,
        _ids: &[EntryId],
    ) -> StoreResult<bool> {
        Ok(false)
    }
}
