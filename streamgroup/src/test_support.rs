//! Scripted log store used by this crate's unit tests.

use crate::entry::{Bucket, Entry, EntryMetadata};
use crate::errors::{StoreError, StoreResult};
use crate::store::{LogStore, PendingConsumer, PendingEntry};
use crate::types::{ConsumerGroup, ConsumerName, EntryId, Environment, StreamKey, StreamUri};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A store call as seen by [`ScriptedStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateGroup,
    ReadNew(usize),
    ReadSelfPending(usize),
    PendingSummary,
    PendingDetail(String),
    Claim {
        owner: String,
        min_idle: Duration,
        ids: Vec<EntryId>,
    },
    Ack(EntryId),
    Reassign {
        owner: String,
        ids: Vec<EntryId>,
    },
}

/// Answers store calls from canned responses and records every call.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub(crate) fresh: Mutex<VecDeque<StoreResult<Vec<Entry>>>>,
    pub(crate) self_pending: Mutex<Vec<Entry>>,
    pub(crate) summary: Mutex<Vec<PendingConsumer>>,
    pub(crate) details: Mutex<HashMap<String, Vec<PendingEntry>>>,
    pub(crate) calls: Mutex<Vec<Call>>,
    pub(crate) fail_acks: bool,
}

impl ScriptedStore {
    pub(crate) fn push_fresh(&self, response: StoreResult<Vec<Entry>>) {
        self.fresh.lock().unwrap().push_back(response);
    }

    pub(crate) fn pending_for(&self, consumer: &str, entries: &[(u64, Duration)]) {
        let pending: Vec<PendingEntry> = entries
            .iter()
            .map(|(millis, idle)| PendingEntry {
                id: EntryId::new(*millis, 0),
                consumer: ConsumerName::try_new(consumer).unwrap(),
                idle: *idle,
                delivery_count: 1,
            })
            .collect();
        if let (Some(first), Some(last)) = (pending.first(), pending.last()) {
            self.summary.lock().unwrap().push(PendingConsumer {
                consumer: ConsumerName::try_new(consumer).unwrap(),
                count: pending.len() as u64,
                lowest: first.id,
                highest: last.id,
            });
        }
        self.details
            .lock()
            .unwrap()
            .insert(consumer.to_string(), pending);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub(crate) fn stream() -> StreamKey {
    StreamKey::new(Environment::default(), StreamUri::try_new("orders").unwrap())
}

pub(crate) fn entry(millis: u64) -> Entry {
    Entry::new(
        EntryId::new(millis, 0),
        EntryMetadata::new(
            "order-placed",
            Environment::default(),
            StreamUri::try_new("orders").unwrap(),
        ),
        Bucket::new().with("body", format!("entry-{millis}")),
        Bucket::new(),
    )
}

#[async_trait]
impl LogStore for ScriptedStore {
    async fn create_group_if_missing(&self, _: &StreamKey, _: &ConsumerGroup) -> StoreResult<()> {
        self.record(Call::CreateGroup);
        Ok(())
    }

    async fn read_new(
        &self,
        _: &StreamKey,
        _: &ConsumerGroup,
        _: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.record(Call::ReadNew(count));
        self.fresh
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn read_self_pending(
        &self,
        _: &StreamKey,
        _: &ConsumerGroup,
        _: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.record(Call::ReadSelfPending(count));
        let mut pending = self.self_pending.lock().unwrap();
        let taken = pending.len().min(count);
        Ok(pending.drain(..taken).collect())
    }

    async fn read_range(&self, _: &StreamKey, from: EntryId, count: usize) -> StoreResult<Vec<Entry>> {
        Ok((0..count as u64)
            .map(|offset| entry(from.millis() + offset))
            .collect())
    }

    async fn pending_summary(
        &self,
        _: &StreamKey,
        _: &ConsumerGroup,
    ) -> StoreResult<Vec<PendingConsumer>> {
        self.record(Call::PendingSummary);
        Ok(self.summary.lock().unwrap().clone())
    }

    async fn pending_detail(
        &self,
        _: &StreamKey,
        _: &ConsumerGroup,
        consumer: &ConsumerName,
        _: (EntryId, EntryId),
        count: usize,
    ) -> StoreResult<Vec<PendingEntry>> {
        self.record(Call::PendingDetail(consumer.to_string()));
        Ok(self
            .details
            .lock()
            .unwrap()
            .get(consumer.as_ref())
            .map(|pending| pending.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn claim(
        &self,
        _: &StreamKey,
        _: &ConsumerGroup,
        new_owner: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<Vec<Entry>> {
        self.record(Call::Claim {
            owner: new_owner.to_string(),
            min_idle,
            ids: ids.to_vec(),
        });
        Ok(ids.iter().map(|id| entry(id.millis())).collect())
    }

    async fn ack(&self, _: &StreamKey, _: &ConsumerGroup, id: EntryId) -> StoreResult<()> {
        if self.fail_acks {
            return Err(StoreError::ConnectionFailed("reset by peer".into()));
        }
        self.record(Call::Ack(id));
        Ok(())
    }

    async fn reassign(
        &self,
        _: &StreamKey,
        _: &ConsumerGroup,
        placeholder: &ConsumerName,
        _: Duration,
        ids: &[EntryId],
    ) -> StoreResult<()> {
        self.record(Call::Reassign {
            owner: placeholder.to_string(),
            ids: ids.to_vec(),
        });
        Ok(())
    }
}
