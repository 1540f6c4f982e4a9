//! Process-wide bookkeeping of live subscriptions.
//!
//! Handles cancel their subscription when dropped, so a host process that
//! starts subscriptions and does not want to keep every handle around parks
//! them here. On shutdown the registry disposes all of them and is left empty.

use crate::subscription::{SubscriptionHandle, SubscriptionId, SubscriptionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Keeps subscription handles alive until they are removed or shut down.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handles: Mutex<HashMap<SubscriptionId, SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a handle and returns its id.
    pub fn register(&self, handle: SubscriptionHandle) -> SubscriptionId {
        let id = handle.id();
        let _ = self.handles.lock().insert(id, handle);
        debug!(subscription = %id, "subscription registered");
        id
    }

    /// Gives a handle back to the caller.
    pub fn remove(&self, id: SubscriptionId) -> Option<SubscriptionHandle> {
        self.handles.lock().remove(&id)
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Whether no subscription is registered.
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Current status of a registered subscription.
    pub fn status(&self, id: SubscriptionId) -> Option<SubscriptionStatus> {
        self.handles.lock().get(&id).map(SubscriptionHandle::status)
    }

    /// Drops handles whose subscriptions already ended; returns how many.
    pub fn prune_finished(&self) -> usize {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|_, handle| !handle.is_finished());
        before - handles.len()
    }

    /// Disposes every registered subscription and waits for all of them.
    pub async fn shutdown_all(&self) -> Vec<(SubscriptionId, SubscriptionStatus)> {
        let handles: Vec<SubscriptionHandle> = {
            let mut guard = self.handles.lock();
            guard.drain().map(|(_, handle)| handle).collect()
        };
        info!(count = handles.len(), "shutting down subscriptions");

        for handle in &handles {
            handle.cancel();
        }

        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            let id = handle.id();
            statuses.push((id, handle.dispose().await));
        }
        statuses
    }
}
