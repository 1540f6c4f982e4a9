//! Per-entry acknowledgment handles.
//!
//! Every delivered entry gets exactly one [`AckHandle`]. The handle resolves at
//! most once: the first `acknowledge` or `cancel` wins and every later call is
//! a no-op that reports `false`. Cancelling a handle also signals the batch the
//! entry belongs to, so the pipeline releases the entries it has not started.

use crate::errors::StoreResult;
use crate::store::LogStore;
use crate::types::{ConsumerGroup, ConsumerName, EntryId, StreamKey};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PENDING: u8 = 0;
const ACKNOWLEDGED: u8 = 1;
const CANCELLED: u8 = 2;
const RESOLVING: u8 = 3;

/// Why a handle was resolved. Recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckCause {
    /// The handler processed the entry.
    Handled,
    /// No handler matched and the entry was skipped.
    Bypassed,
    /// Acknowledged after the handler completed, whatever the outcome.
    Finally,
    /// Resolved by the application.
    Manual,
    /// The handler failed.
    Faulted,
    /// The subscription stopped before the entry was finished.
    Interrupted,
}

impl fmt::Display for AckCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handled => "handled",
            Self::Bypassed => "bypassed",
            Self::Finally => "finally",
            Self::Manual => "manual",
            Self::Faulted => "faulted",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// How a handle ended up resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckResolution {
    /// The entry was acknowledged.
    Acknowledged,
    /// The entry was cancelled and left for redelivery.
    Cancelled,
}

/// Where acknowledgments of one subscription go.
#[derive(Clone)]
pub(crate) struct AckTarget {
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) stream: StreamKey,
    pub(crate) group: ConsumerGroup,
    pub(crate) consumer: ConsumerName,
}

struct AckInner {
    id: EntryId,
    target: Arc<AckTarget>,
    state: AtomicU8,
    batch: CancellationToken,
}

/// Single-resolution acknowledgment handle for one delivered entry.
///
/// Cloning yields another reference to the same handle.
#[derive(Clone)]
pub struct AckHandle {
    inner: Arc<AckInner>,
}

impl AckHandle {
    pub(crate) fn new(target: Arc<AckTarget>, id: EntryId, batch: CancellationToken) -> Self {
        Self {
            inner: Arc::new(AckInner {
                id,
                target,
                state: AtomicU8::new(PENDING),
                batch,
            }),
        }
    }

    /// The entry this handle belongs to.
    pub fn id(&self) -> EntryId {
        self.inner.id
    }

    /// Whether the handle has been acknowledged or cancelled.
    pub fn is_resolved(&self) -> bool {
        self.resolution().is_some()
    }

    /// The resolution, once one has taken effect.
    pub fn resolution(&self) -> Option<AckResolution> {
        match self.inner.state.load(Ordering::Acquire) {
            ACKNOWLEDGED => Some(AckResolution::Acknowledged),
            CANCELLED => Some(AckResolution::Cancelled),
            _ => None,
        }
    }

    /// Marks the entry permanently handled for the group.
    ///
    /// Returns `Ok(false)` when the handle was already resolved. When the store
    /// rejects the ack the handle stays unresolved and the error is returned.
    pub async fn acknowledge(&self, cause: AckCause) -> StoreResult<bool> {
        if !self.begin_resolving() {
            return Ok(false);
        }

        let target = &self.inner.target;
        match target
            .store
            .ack(&target.stream, &target.group, self.inner.id)
            .await
        {
            Ok(()) => {
                self.inner.state.store(ACKNOWLEDGED, Ordering::Release);
                debug!(entry = %self.inner.id, %cause, "entry acknowledged");
                Ok(true)
            }
            Err(error) => {
                self.inner.state.store(PENDING, Ordering::Release);
                Err(error)
            }
        }
    }

    /// Gives the entry up without acknowledging it and interrupts the batch.
    ///
    /// The store is asked to unclaim the entry; stores without that primitive
    /// leave it pending until it is idle long enough to be claimed. Returns
    /// whether this call resolved the handle.
    pub async fn cancel(&self, cause: AckCause) -> bool {
        if !self.begin_resolving() {
            return false;
        }
        self.inner.state.store(CANCELLED, Ordering::Release);
        self.inner.batch.cancel();

        let target = &self.inner.target;
        match target
            .store
            .unclaim(
                &target.stream,
                &target.group,
                &target.consumer,
                &[self.inner.id],
            )
            .await
        {
            Ok(unclaimed) => {
                debug!(entry = %self.inner.id, %cause, unclaimed, "entry cancelled");
            }
            Err(error) => {
                warn!(entry = %self.inner.id, %cause, error = %error, "unclaim failed, entry stays pending");
            }
        }
        true
    }

    fn begin_resolving(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, RESOLVING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("id", &self.inner.id)
            .field("resolution", &self.resolution())
            .finish_non_exhaustive()
    }
}
