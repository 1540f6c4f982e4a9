//! Batch fetcher: produces the next batch of entries for a subscription.
//!
//! One call to [`BatchFetcher::next_batch`] runs one fetch cycle:
//!
//! 1. recover this consumer's own pending entries (after subscribing and
//!    after a fetch error)
//! 2. reclaim entries released to the placeholder while a release is outstanding
//! 3. read fresh entries, recreating the group when it is missing
//! 4. steal stale entries from peers once enough consecutive reads came back
//!    empty, or on any empty read while replaying
//! 5. back off when nothing was found, or stop when replaying up to a cutoff
//!
//! All mutable state of the loop lives in [`FetchState`], whose transitions
//! are plain methods so they can be tested without a store.

use crate::behavior::{DelayWhenEmptyBehavior, ReleaseBackoff};
use crate::claim;
use crate::entry::Entry;
use crate::errors::{StoreError, StoreResult};
use crate::plan::ConsumerPlan;
use crate::store::LogStore;
use crate::types::{EntryId, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Loop state threaded through fetch and processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchState {
    /// Consecutive fresh reads that came back empty.
    pub empty_batch_count: u32,
    /// Delay to apply on the next empty cycle.
    pub empty_delay: Duration,
    /// Pause to apply on the next release.
    pub release_delay: Duration,
    /// Batch size requested by the next fetch.
    pub current_batch_size: usize,
    /// Whether the next cycle starts with self-pending recovery.
    pub recover_self_pending: bool,
    /// Whether released entries may still be parked on the placeholder.
    pub release_outstanding: bool,
}

impl FetchState {
    /// Initial state for a freshly started subscription.
    pub fn new(plan: &ConsumerPlan) -> Self {
        Self {
            empty_batch_count: 0,
            empty_delay: plan.delay_when_empty().initial(),
            release_delay: plan.release_backoff().initial,
            current_batch_size: plan.batch_size(),
            recover_self_pending: true,
            release_outstanding: false,
        }
    }

    /// Any fetch path returned entries.
    pub fn on_entries(&mut self, behavior: &DelayWhenEmptyBehavior) {
        self.empty_batch_count = 0;
        self.empty_delay = behavior.initial();
    }

    /// A fresh read came back empty; returns the new consecutive count.
    pub fn on_empty_read(&mut self) -> u32 {
        self.empty_batch_count = self.empty_batch_count.saturating_add(1);
        self.empty_batch_count
    }

    /// A cycle found nothing; returns the delay to wait now.
    pub fn on_empty_cycle(&mut self, behavior: &DelayWhenEmptyBehavior) -> Duration {
        let delay = self.empty_delay;
        self.empty_delay = behavior.next_delay(delay);
        delay
    }

    /// Entries were released after a failure; returns the pause to take now.
    pub fn on_release(&mut self, backoff: &ReleaseBackoff) -> Duration {
        let pause = self.release_delay;
        self.release_delay = backoff.next_delay(pause);
        self.current_batch_size = 1;
        self.release_outstanding = true;
        pause
    }

    /// A batch finished without releasing anything.
    pub fn on_batch_success(&mut self, configured_batch_size: usize, backoff: &ReleaseBackoff) {
        self.current_batch_size = self
            .current_batch_size
            .saturating_mul(2)
            .min(configured_batch_size);
        self.release_delay = backoff.initial;
    }

    /// A store call failed transiently; ownership may be out of sync.
    pub fn on_fetch_error(&mut self) {
        self.recover_self_pending = true;
    }
}

/// Result of one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// Entries to process, in delivery order.
    Entries(Vec<Entry>),
    /// Nothing to process this cycle.
    Empty,
    /// The replay cutoff was reached; the subscription should complete.
    Exhausted,
}

/// Produces batches for one subscription.
pub struct BatchFetcher {
    store: Arc<dyn LogStore>,
    plan: ConsumerPlan,
    cancellation: CancellationToken,
}

impl BatchFetcher {
    /// Creates a fetcher bound to the subscription's cancellation token.
    pub fn new(store: Arc<dyn LogStore>, plan: ConsumerPlan, cancellation: CancellationToken) -> Self {
        Self {
            store,
            plan,
            cancellation,
        }
    }

    /// Runs one fetch cycle.
    ///
    /// Transient store errors are logged and treated as an empty cycle.
    ///
    /// # Errors
    /// Returns non-transient store errors.
    #[instrument(
        skip(self, state),
        fields(stream = %self.plan.stream(), consumer = %self.plan.consumer(), batch_size = state.current_batch_size)
    )]
    pub async fn next_batch(&self, state: &mut FetchState) -> StoreResult<Batch> {
        if self.cancellation.is_cancelled() {
            return Ok(Batch::Empty);
        }

        let found = match self.collect(state).await {
            Ok(found) => found,
            Err(error) if error.is_transient() => {
                warn!(error = %error, "transient store error while fetching, treating as empty batch");
                state.on_fetch_error();
                Found::Unavailable
            }
            Err(error) => {
                error!(error = %error, "fetch failed");
                return Err(error);
            }
        };

        match found {
            Found::Entries(entries) => {
                state.on_entries(self.plan.delay_when_empty());
                Ok(self.apply_cutoff(entries).await)
            }
            Found::GroupRecreated | Found::Cancelled => Ok(Batch::Empty),
            Found::Unavailable => {
                let delay = state.on_empty_cycle(self.plan.delay_when_empty());
                self.pause(delay).await;
                Ok(Batch::Empty)
            }
            Found::Nothing if self.plan.fetch_until().is_some() => {
                info!("no entries left before the replay cutoff");
                Ok(Batch::Exhausted)
            }
            Found::Nothing => {
                let delay = state.on_empty_cycle(self.plan.delay_when_empty());
                debug!(delay_ms = millis(delay), "empty cycle, backing off");
                self.pause(delay).await;
                Ok(Batch::Empty)
            }
        }
    }

    async fn collect(&self, state: &mut FetchState) -> StoreResult<Found> {
        let (stream, group, consumer) = (self.plan.stream(), self.plan.group(), self.plan.consumer());
        let count = state.current_batch_size;

        if state.recover_self_pending {
            state.recover_self_pending = false;
            let pending = self
                .store
                .read_self_pending(stream, group, consumer, count)
                .await?;
            if !pending.is_empty() {
                let ids: Vec<EntryId> = pending.iter().map(|entry| entry.id).collect();
                let recovered = self
                    .store
                    .claim(stream, group, consumer, Duration::ZERO, &ids)
                    .await?;
                if !recovered.is_empty() {
                    info!(count = recovered.len(), "recovered own pending entries");
                    return Ok(Found::Entries(recovered));
                }
            }
        }

        if state.release_outstanding {
            let released = claim::reclaim_released(self.store.as_ref(), &self.plan, count).await?;
            if !released.is_empty() {
                return Ok(Found::Entries(released));
            }
            state.release_outstanding = false;
        }

        let fresh = tokio::select! {
            () = self.cancellation.cancelled() => return Ok(Found::Cancelled),
            fresh = self.store.read_new(stream, group, consumer, count) => fresh,
        };
        match fresh {
            Ok(entries) if !entries.is_empty() => return Ok(Found::Entries(entries)),
            Ok(_) => {}
            Err(StoreError::GroupMissing { .. }) => {
                warn!("consumer group missing, recreating");
                self.store.create_group_if_missing(stream, group).await?;
                return Ok(Found::GroupRecreated);
            }
            Err(error) => return Err(error),
        }

        let empty_reads = state.on_empty_read();
        let trigger = self.plan.claiming_trigger();
        // A replay completes on its first empty read, so it gets one steal pass first.
        let replaying = self.plan.fetch_until().is_some();
        if replaying || trigger.should_claim(empty_reads) {
            debug!(empty_reads, replaying, "looking for stale entries");
            let stolen =
                claim::steal_stale(self.store.as_ref(), &self.plan, trigger.min_idle, count).await?;
            if !stolen.is_empty() {
                return Ok(Found::Entries(stolen));
            }
        }

        Ok(Found::Nothing)
    }

    /// Drops entries past the replay cutoff; completes once the oldest one is past it.
    async fn apply_cutoff(&self, entries: Vec<Entry>) -> Batch {
        let Some(cutoff) = self.plan.fetch_until() else {
            return Batch::Entries(entries);
        };

        let (within, beyond): (Vec<Entry>, Vec<Entry>) = entries
            .into_iter()
            .partition(|entry| is_within(entry.id, cutoff));

        if !beyond.is_empty() {
            let ids: Vec<EntryId> = beyond.iter().map(|entry| entry.id).collect();
            if let Err(error) = self
                .store
                .unclaim(self.plan.stream(), self.plan.group(), self.plan.consumer(), &ids)
                .await
            {
                warn!(error = %error, "could not give back entries past the replay cutoff");
            }
        }

        if within.is_empty() {
            info!(%cutoff, "replay cutoff reached");
            Batch::Exhausted
        } else {
            Batch::Entries(within)
        }
    }

    async fn pause(&self, delay: Duration) {
        tokio::select! {
            () = self.cancellation.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
}

enum Found {
    Entries(Vec<Entry>),
    GroupRecreated,
    /// A transient store error; retried after a pause, never the end of a replay.
    Unavailable,
    Cancelled,
    Nothing,
}

fn is_within(id: EntryId, cutoff: Timestamp) -> bool {
    id.timestamp().is_some_and(|appended| appended <= cutoff)
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
