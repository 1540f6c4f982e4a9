//! The application callback contract.

use crate::ack::AckHandle;
use crate::entry::Entry;
use crate::errors::HandlerError;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Processes entries delivered to a subscription.
///
/// `Ok(true)` means the entry was handled. `Ok(false)` means no registered
/// operation matched the entry; this is not a failure, the partial consumer
/// behavior decides what happens next. `Err` is a failure and is subject to the
/// retry policy.
///
/// Under `AckBehavior::Manual` the handler resolves `ack` itself; otherwise the
/// pipeline does.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    /// Handles one entry.
    async fn handle(&self, entry: &Entry, ack: &AckHandle) -> Result<bool, HandlerError>;
}

/// Handler built from a closure; see [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EntryHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a Entry, &'a AckHandle) -> BoxFuture<'a, Result<bool, HandlerError>>
        + Send
        + Sync,
{
    async fn handle(&self, entry: &Entry, ack: &AckHandle) -> Result<bool, HandlerError> {
        (self.0)(entry, ack).await
    }
}

/// Builds a handler from a closure returning a boxed future.
///
/// ```ignore
/// let handler = handler_fn(|entry, _ack| {
///     Box::pin(async move { Ok(entry.operation() == "order-placed") })
/// });
/// ```
pub const fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a Entry, &'a AckHandle) -> BoxFuture<'a, Result<bool, HandlerError>>
        + Send
        + Sync,
{
    FnHandler(f)
}
