//! Subscription lifecycle: the fetch/process loop and its owned handle.
//!
//! [`subscribe`] spawns one task per subscription running
//! fetch → process → fetch … until the max-messages cutoff, the replay cutoff,
//! cancellation or an unrecoverable error ends it. The returned
//! [`SubscriptionHandle`] owns the task: dropping the handle cancels it.
//!
//! The loop's cancellation token is a child of the plan's caller-supplied
//! token, so cancelling either the caller's token or the handle stops the loop,
//! while cancelling the handle never touches the caller's token.

use crate::ack::AckTarget;
use crate::errors::SubscriptionError;
use crate::fetch::{Batch, BatchFetcher, FetchState};
use crate::handler::EntryHandler;
use crate::pipeline::{BatchOutcome, Pipeline};
use crate::plan::ConsumerPlan;
use crate::store::LogStore;
use nutype::nutype;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Identifier of one running subscription.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRef))]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new time-ordered id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionStatus {
    /// Created, loop not started yet.
    Created,
    /// The loop is running.
    Running,
    /// Ended by the max-messages cutoff or the replay cutoff.
    Completed,
    /// Ended by cancellation.
    Cancelled,
    /// Ended by an unrecoverable error.
    Faulted(Arc<SubscriptionError>),
}

impl SubscriptionStatus {
    /// Whether the subscription has ended.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Faulted(_))
    }

    /// The error that ended the subscription, if any.
    pub fn error(&self) -> Option<&SubscriptionError> {
        match self {
            Self::Faulted(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Faulted(error) => write!(f, "faulted: {error}"),
        }
    }
}

/// Owned handle of a running subscription. Dropping it cancels the loop.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    status: watch::Receiver<SubscriptionStatus>,
    consumed: Arc<AtomicU64>,
    cancellation: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// The subscription's id.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Consume attempts so far, retries excluded.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    /// Whether the loop has ended.
    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    /// Asks the loop to stop. Unprocessed entries are released.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Waits for the terminal state. Every caller observes the same state.
    pub async fn completion(&self) -> SubscriptionStatus {
        let mut status = self.status.clone();
        let terminal = match status.wait_for(SubscriptionStatus::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            // The loop task is gone without reporting; treat it as cancelled.
            Err(_) => SubscriptionStatus::Cancelled,
        };
        terminal
    }

    /// Cancels the loop and waits for it to wind down.
    pub async fn dispose(mut self) -> SubscriptionStatus {
        self.cancel();
        let status = self.completion().await;
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(subscription = %self.id, error = %error, "subscription task did not shut down cleanly");
            }
        }
        status
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("status", &*self.status.borrow())
            .field("consumed", &self.consumed())
            .finish_non_exhaustive()
    }
}

/// Starts a subscription on the current tokio runtime.
pub fn subscribe(
    store: Arc<dyn LogStore>,
    plan: ConsumerPlan,
    handler: Arc<dyn EntryHandler>,
) -> SubscriptionHandle {
    let id = SubscriptionId::generate();
    let cancellation = plan.cancellation().child_token();
    let consumed = Arc::new(AtomicU64::new(0));
    let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Created);

    let span = info_span!(
        "subscription",
        subscription = %id,
        stream = %plan.stream(),
        group = %plan.group(),
        consumer = %plan.consumer(),
    );

    let worker = Worker {
        store,
        plan,
        handler,
        consumed: Arc::clone(&consumed),
        cancellation: cancellation.clone(),
    };
    let task = tokio::spawn(
        async move {
            let _ = status_tx.send(SubscriptionStatus::Running);
            info!("subscription started");
            let terminal = worker.run().await;
            match &terminal {
                SubscriptionStatus::Faulted(error) => error!(error = %error, "subscription faulted"),
                other => info!(status = %other, "subscription stopped"),
            }
            let _ = status_tx.send(terminal);
        }
        .instrument(span),
    );

    SubscriptionHandle {
        id,
        status: status_rx,
        consumed,
        cancellation,
        task: Some(task),
    }
}

struct Worker {
    store: Arc<dyn LogStore>,
    plan: ConsumerPlan,
    handler: Arc<dyn EntryHandler>,
    consumed: Arc<AtomicU64>,
    cancellation: CancellationToken,
}

impl Worker {
    async fn run(self) -> SubscriptionStatus {
        if let Err(error) = self
            .store
            .create_group_if_missing(self.plan.stream(), self.plan.group())
            .await
        {
            if !error.is_transient() {
                return SubscriptionStatus::Faulted(Arc::new(error.into()));
            }
            warn!(error = %error, "could not create consumer group, will retry while fetching");
        }

        let target = Arc::new(AckTarget {
            store: Arc::clone(&self.store),
            stream: self.plan.stream().clone(),
            group: self.plan.group().clone(),
            consumer: self.plan.consumer().clone(),
        });
        let fetcher = BatchFetcher::new(
            Arc::clone(&self.store),
            self.plan.clone(),
            self.cancellation.clone(),
        );
        let pipeline = Pipeline::new(
            self.plan.clone(),
            target,
            Arc::clone(&self.handler),
            Arc::clone(&self.consumed),
            self.cancellation.clone(),
        );
        let mut state = FetchState::new(&self.plan);

        loop {
            if self
                .plan
                .max_messages()
                .is_reached(self.consumed.load(Ordering::SeqCst))
            {
                self.cancellation.cancel();
                return SubscriptionStatus::Completed;
            }
            if self.cancellation.is_cancelled() {
                return SubscriptionStatus::Cancelled;
            }

            let entries = match fetcher.next_batch(&mut state).await {
                Ok(Batch::Entries(entries)) => entries,
                Ok(Batch::Empty) => continue,
                Ok(Batch::Exhausted) => return SubscriptionStatus::Completed,
                Err(error) => return SubscriptionStatus::Faulted(Arc::new(error.into())),
            };

            match pipeline.process_batch(&mut state, entries).await {
                Ok(BatchOutcome::LimitReached) => return SubscriptionStatus::Completed,
                Ok(BatchOutcome::Completed | BatchOutcome::Released | BatchOutcome::Interrupted) => {}
                Err(error) => return SubscriptionStatus::Faulted(Arc::new(error)),
            }
        }
    }
}
