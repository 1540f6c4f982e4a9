//! `streamgroup` - consumer-group engine for append-only event streams
//!
//! This library turns an ordered, append-only log exposed by an external log
//! store into a reliable, at-least-once processing pipeline shared by many
//! consumers organized in named consumer groups. Consumers cooperatively drain
//! a stream, recover their own unacknowledged work after a crash, and take over
//! entries orphaned by failed peers.
//!
//! # Architecture
//!
//! - [`store::LogStore`]: the port to the log store (consumer groups, pending
//!   entries, claim, ack, reassign)
//! - [`claim`]: decides when and what to steal from other consumers
//! - [`fetch`]: produces the next batch, with self-pending recovery, fresh
//!   reads, stale-claim fallback and empty-batch backoff
//! - [`ack`]: single-resolution acknowledgment handles
//! - [`pipeline`]: runs a batch through interceptors and the handler, applying
//!   the retry policy, ack behavior and partial consumer behavior
//! - [`subscription`]: the fetch/process loop, its cancellation and completion
//!
//! # Example
//!
//! ```ignore
//! use streamgroup::prelude::*;
//!
//! let plan = ConsumerPlan::new(uri, group, consumer)
//!     .with_ack_behavior(AckBehavior::OnSucceed)
//!     .with_partial_behavior(PartialConsumerBehavior::Sequential);
//!
//! let handle = subscribe(store, plan, Arc::new(handler));
//! let status = handle.completion().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ack;
pub mod behavior;
pub mod claim;
pub mod entry;
pub mod errors;
pub mod fetch;
pub mod handler;
pub mod interceptor;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod retry;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod types;

#[cfg(test)]
mod test_support;

pub use ack::{AckCause, AckHandle, AckResolution};
pub use behavior::{
    AckBehavior, ClaimingTrigger, DelayWhenEmptyBehavior, PartialConsumerBehavior, ReleaseBackoff,
};
pub use entry::{Bucket, BucketCategory, Entry, EntryMetadata, EntryOrigin};
pub use errors::{
    BoxError, HandlerError, StorageError, StoreError, StoreResult, SubscriptionError,
    SubscriptionResult,
};
pub use handler::{handler_fn, EntryHandler, FnHandler};
pub use interceptor::ConsumerInterceptor;
pub use plan::{BatchSize, ConsumerOptions, ConsumerPlan, MaxMessages};
pub use registry::SubscriptionRegistry;
pub use retry::RetryPolicy;
pub use storage::StorageStrategy;
pub use store::{LogStore, PendingConsumer, PendingEntry};
pub use subscription::{subscribe, SubscriptionHandle, SubscriptionId, SubscriptionStatus};
pub use types::{
    ConsumerGroup, ConsumerName, EntryId, Environment, StreamKey, StreamUri, Timestamp,
    PLACEHOLDER_CONSUMER,
};

/// Commonly used types for building subscriptions.
pub mod prelude {
    pub use crate::{
        handler_fn, subscribe, AckBehavior, AckCause, AckHandle, ClaimingTrigger, ConsumerGroup,
        ConsumerName, ConsumerOptions, ConsumerPlan, DelayWhenEmptyBehavior, Entry, EntryHandler,
        Environment, HandlerError, LogStore, PartialConsumerBehavior, RetryPolicy,
        SubscriptionHandle, SubscriptionStatus, StreamUri,
    };
}
