//! Error types for the consumer engine.
//!
//! The error design mirrors the failure taxonomy of the consumer loop:
//!
//! - **StoreError**: failures talking to the log store. Transient variants are
//!   absorbed at the fetch boundary and treated as an empty batch; a missing
//!   group is self-healed; everything else terminates the subscription.
//! - **HandlerError**: failures raised by application callbacks, interceptors
//!   and storage strategies. Subject to the retry policy, then classified by
//!   the ack behavior.
//! - **SubscriptionError**: what escapes a subscription through its completion
//!   status. Cancellation is not an error and never appears here.

use crate::behavior::PartialConsumerBehavior;
use crate::types::{ConsumerGroup, EntryId, StreamKey};
use std::time::Duration;
use thiserror::Error;

/// Result type for log store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for subscription operations.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Boxed error accepted from application code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when interacting with the log store.
///
/// # Retry Strategy
///
/// - **Timeout / ConnectionFailed / Unavailable**: transient, the fetch loop
///   logs them and tries again on the next cycle
/// - **GroupMissing**: the group is recreated idempotently
/// - **everything else**: fatal for the subscription
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store did not answer in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection to the store failed or was dropped.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The store is temporarily unavailable.
    #[error("Log store unavailable: {0}")]
    Unavailable(String),

    /// The consumer group does not exist on the stream.
    #[error("Consumer group '{group}' does not exist on stream '{stream}'")]
    GroupMissing {
        /// The stream that was read
        stream: StreamKey,
        /// The group that was missing
        group: ConsumerGroup,
    },

    /// The stream does not exist.
    #[error("Stream '{0}' not found")]
    StreamNotFound(StreamKey),

    /// An entry could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the failure is expected to go away on its own.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionFailed(_) | Self::Unavailable(_)
        )
    }

    /// Whether the failure means the consumer group needs to be created.
    pub const fn is_group_missing(&self) -> bool {
        matches!(self, Self::GroupMissing { .. })
    }
}

/// Failure reported by application code processing an entry.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler failed with a message.
    #[error("{0}")]
    Failed(String),

    /// The handler failed with an underlying error.
    #[error("{0}")]
    Source(#[from] BoxError),

    /// A storage strategy could not load a bucket for the entry.
    #[error("Storage strategy failed: {0}")]
    Storage(#[from] StorageError),
}

impl HandlerError {
    /// Creates a handler failure from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Failure of a storage strategy while loading a bucket.
#[derive(Debug, Clone, Error)]
#[error("failed to load {category} bucket for entry {entry}: {reason}")]
pub struct StorageError {
    /// The entry whose bucket was requested
    pub entry: EntryId,
    /// Which bucket was requested
    pub category: crate::entry::BucketCategory,
    /// Why loading failed
    pub reason: String,
}

/// Errors that terminate a subscription.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// A non-transient log store failure.
    #[error("Log store error: {0}")]
    Store(#[from] StoreError),

    /// The application callback kept failing after the retry policy gave up.
    #[error("Handler failed for entry {entry}: {source}")]
    Handler {
        /// The entry being processed
        entry: EntryId,
        /// The last failure
        #[source]
        source: HandlerError,
    },

    /// No handler claimed an entry under a behavior that requires one.
    #[error("Entry {entry} was not handled under {behavior:?} partial consumer behavior")]
    NotHandled {
        /// The unhandled entry
        entry: EntryId,
        /// The behavior that was violated
        behavior: PartialConsumerBehavior,
    },

    /// The consumer plan cannot be used.
    #[error("Invalid consumer plan: {0}")]
    InvalidPlan(String),
}
