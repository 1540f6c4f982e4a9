//! Processing pipeline: runs one batch through the handler.
//!
//! Entries are processed strictly in delivery order. For each entry the
//! pipeline resolves storage buckets, runs interceptors, invokes the handler
//! under the retry policy and turns the result into an [`Outcome`]. The
//! outcome, the ack behavior and the partial consumer behavior together decide
//! whether the entry is acknowledged, cancelled or released, and whether the
//! rest of the batch is processed.
//!
//! Entries that are not processed are never dropped: whenever the pipeline
//! stops early it releases the unprocessed remainder to the placeholder owner,
//! in order, so another cycle can redeliver them.

use crate::ack::{AckCause, AckHandle, AckTarget};
use crate::behavior::{AckBehavior, PartialConsumerBehavior};
use crate::entry::Entry;
use crate::errors::{HandlerError, StoreResult, SubscriptionError, SubscriptionResult};
use crate::fetch::{millis, FetchState};
use crate::handler::EntryHandler;
use crate::interceptor::run_interceptors;
use crate::plan::ConsumerPlan;
use crate::storage::resolve_buckets;
use crate::types::{ConsumerName, EntryId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Result of invoking the handler for one entry.
#[derive(Debug)]
pub enum Outcome {
    /// The handler processed the entry.
    Handled,
    /// No registered operation matched the entry.
    NotHandled,
    /// The handler failed after the retry policy gave up.
    Faulted(HandlerError),
}

/// How a batch ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every entry was processed.
    Completed,
    /// Processing stopped early and the remainder was released for redelivery.
    Released,
    /// The max-messages cutoff was reached.
    LimitReached,
    /// The subscription was cancelled mid-batch.
    Interrupted,
}

/// How a release is followed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// Pause with the release backoff and shrink the next batch.
    Backoff,
    /// The batch ends the subscription; no pause.
    Terminal,
}

/// Processes batches for one subscription.
pub struct Pipeline {
    plan: ConsumerPlan,
    target: Arc<AckTarget>,
    handler: Arc<dyn EntryHandler>,
    consumed: Arc<AtomicU64>,
    cancellation: CancellationToken,
}

impl Pipeline {
    pub(crate) fn new(
        plan: ConsumerPlan,
        target: Arc<AckTarget>,
        handler: Arc<dyn EntryHandler>,
        consumed: Arc<AtomicU64>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            plan,
            target,
            handler,
            consumed,
            cancellation,
        }
    }

    /// Processes `entries` in order.
    ///
    /// # Errors
    /// Returns `SubscriptionError::NotHandled` when an entry has no handler under
    /// a behavior requiring one, `SubscriptionError::Handler` for unrecovered
    /// handler failures, and `SubscriptionError::Store` when acknowledging or
    /// releasing fails permanently.
    #[instrument(skip_all, fields(consumer = %self.plan.consumer(), entries = entries.len()))]
    pub async fn process_batch(
        &self,
        state: &mut FetchState,
        entries: Vec<Entry>,
    ) -> SubscriptionResult<BatchOutcome> {
        let ids: Vec<EntryId> = entries.iter().map(|entry| entry.id).collect();
        let batch = self.cancellation.child_token();

        for (index, entry) in entries.into_iter().enumerate() {
            if self.cancellation.is_cancelled() {
                self.release(state, &ids[index..], Release::Terminal).await?;
                return Ok(BatchOutcome::Interrupted);
            }
            if batch.is_cancelled() {
                self.release(state, &ids[index..], Release::Backoff).await?;
                return Ok(BatchOutcome::Released);
            }

            let consumed = self.consumed.fetch_add(1, Ordering::SeqCst) + 1;
            let id = entry.id;
            let ack = AckHandle::new(Arc::clone(&self.target), id, batch.clone());
            let outcome = self.invoke(entry, &ack).await;
            let rest = &ids[index + 1..];
            if matches!(outcome, Outcome::Faulted(_))
                && self.cancellation.is_cancelled()
                && !ack.is_resolved()
            {
                debug!(entry = %id, "retry interrupted by cancellation");
                self.release(state, &ids[index..], Release::Terminal).await?;
                return Ok(BatchOutcome::Interrupted);
            }
            // The entry itself is released unless something already resolved it.
            let from_here = if ack.is_resolved() { rest } else { &ids[index..] };

            match (outcome, self.plan.partial_behavior()) {
                (Outcome::Handled, _) => {
                    self.auto_ack(state, &ack, AckCause::Handled).await?;
                }
                (Outcome::NotHandled, behavior) if behavior.requires_handler() => {
                    error!(
                        severity = "critical",
                        entry = %id,
                        ?behavior,
                        "no handler for entry"
                    );
                    self.settle_failure(state, &ack).await?;
                    self.release(state, rest, Release::Terminal).await?;
                    return Err(SubscriptionError::NotHandled { entry: id, behavior });
                }
                (Outcome::NotHandled, PartialConsumerBehavior::Sequential) => {
                    debug!(entry = %id, "entry not handled, releasing the rest of the batch");
                    self.release(state, from_here, Release::Backoff).await?;
                    return Ok(BatchOutcome::Released);
                }
                (Outcome::NotHandled, _) => {
                    self.auto_ack(state, &ack, AckCause::Bypassed).await?;
                }
                (Outcome::Faulted(source), PartialConsumerBehavior::Sequential) => {
                    error!(entry = %id, error = %source, "handler failed, releasing the rest of the batch");
                    if self.plan.ack_behavior() == AckBehavior::OnFinally {
                        self.release(state, from_here, Release::Backoff).await?;
                        return Ok(BatchOutcome::Released);
                    }
                    self.release(state, from_here, Release::Terminal).await?;
                    return Err(SubscriptionError::Handler { entry: id, source });
                }
                (Outcome::Faulted(source), _) => {
                    error!(entry = %id, error = %source, "handler failed");
                    if self.plan.ack_behavior() == AckBehavior::OnFinally {
                        self.auto_ack(state, &ack, AckCause::Finally).await?;
                    } else {
                        ack.cancel(AckCause::Faulted).await;
                        self.release(state, rest, Release::Terminal).await?;
                        return Err(SubscriptionError::Handler { entry: id, source });
                    }
                }
            }

            if self.plan.max_messages().is_reached(consumed) {
                debug!(consumed, "max messages reached");
                self.cancellation.cancel();
                self.release(state, rest, Release::Terminal).await?;
                return Ok(BatchOutcome::LimitReached);
            }
        }

        if batch.is_cancelled() && !self.cancellation.is_cancelled() {
            // Cancelled while handling the last entry: nothing left to release.
            self.release(state, &[], Release::Backoff).await?;
            return Ok(BatchOutcome::Released);
        }

        state.on_batch_success(self.plan.batch_size(), self.plan.release_backoff());
        Ok(BatchOutcome::Completed)
    }

    async fn invoke(&self, entry: Entry, ack: &AckHandle) -> Outcome {
        let entry = match resolve_buckets(self.plan.storage_strategies(), entry).await {
            Ok(entry) => entry,
            Err(error) => return Outcome::Faulted(error.into()),
        };

        run_interceptors(self.plan.interceptors(), &entry).await;

        let handler = &self.handler;
        let entry = &entry;
        let result = self
            .plan
            .retry_policy()
            .run(&self.cancellation, entry.operation(), move |_| {
                handler.handle(entry, ack)
            })
            .await;

        match result {
            Ok(true) => Outcome::Handled,
            Ok(false) => Outcome::NotHandled,
            Err(error) => Outcome::Faulted(error),
        }
    }

    /// Acknowledges unless the application owns acknowledgments.
    async fn auto_ack(
        &self,
        state: &mut FetchState,
        ack: &AckHandle,
        cause: AckCause,
    ) -> SubscriptionResult<()> {
        if self.plan.ack_behavior() == AckBehavior::Manual {
            return Ok(());
        }
        match ack.acknowledge(cause).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_transient() => {
                warn!(entry = %ack.id(), error = %error, "ack failed, entry will be redelivered");
                state.on_fetch_error();
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Resolves an entry that violated the partial consumer behavior.
    async fn settle_failure(&self, state: &mut FetchState, ack: &AckHandle) -> SubscriptionResult<()> {
        if self.plan.ack_behavior() == AckBehavior::OnFinally {
            self.auto_ack(state, ack, AckCause::Finally).await
        } else {
            ack.cancel(AckCause::Faulted).await;
            Ok(())
        }
    }

    /// Parks `ids` on the placeholder owner so any consumer can pick them up.
    async fn release(
        &self,
        state: &mut FetchState,
        ids: &[EntryId],
        mode: Release,
    ) -> SubscriptionResult<()> {
        if !ids.is_empty() {
            match self.reassign(ids).await {
                Ok(()) => {
                    warn!(count = ids.len(), first = %ids[0], "released entries for redelivery");
                    state.release_outstanding = true;
                }
                Err(error) if error.is_transient() || mode == Release::Terminal => {
                    warn!(error = %error, count = ids.len(), "release failed, entries stay pending");
                    state.on_fetch_error();
                }
                Err(error) => return Err(error.into()),
            }
        }

        if mode == Release::Backoff {
            let pause = state.on_release(self.plan.release_backoff());
            debug!(pause_ms = millis(pause), "pausing after release");
            self.pause(pause).await;
        }
        Ok(())
    }

    async fn reassign(&self, ids: &[EntryId]) -> StoreResult<()> {
        self.target
            .store
            .reassign(
                &self.target.stream,
                &self.target.group,
                &ConsumerName::placeholder(),
                Duration::ZERO,
                ids,
            )
            .await
    }

    async fn pause(&self, delay: Duration) {
        tokio::select! {
            () = self.cancellation.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
}
