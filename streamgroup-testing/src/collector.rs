//! A scriptable handler that records what it was given.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use streamgroup::ack::AckHandle;
use streamgroup::entry::Entry;
use streamgroup::errors::HandlerError;
use streamgroup::handler::EntryHandler;
use streamgroup::types::EntryId;
use tokio::sync::Notify;

/// What the collector answers for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Return `Ok(true)`
    Handled,
    /// Return `Ok(false)`
    NotHandled,
    /// Return an error with this message
    Fail(String),
}

type Script = Box<dyn Fn(&Entry, usize) -> Reply + Send + Sync>;

/// Records every invocation and answers according to a script.
///
/// The script receives the entry and the zero-based invocation index, so
/// retries of the same entry are distinguishable.
pub struct EntryCollector {
    script: Script,
    seen: Mutex<Vec<Entry>>,
    invocations: AtomicUsize,
    notify: Notify,
}

impl EntryCollector {
    /// Handles every entry.
    pub fn accepting() -> Self {
        Self::scripted(|_, _| Reply::Handled)
    }

    /// Fails every invocation.
    pub fn failing() -> Self {
        Self::scripted(|entry, _| Reply::Fail(format!("cannot process {}", entry.id)))
    }

    /// Answers with `script(entry, invocation_index)`.
    pub fn scripted<F>(script: F) -> Self
    where
        F: Fn(&Entry, usize) -> Reply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            seen: Mutex::new(Vec::new()),
            invocations: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Every entry the handler was invoked with, retries included.
    pub fn entries(&self) -> Vec<Entry> {
        self.seen.lock().clone()
    }

    /// Ids of every invocation, in order.
    pub fn ids(&self) -> Vec<EntryId> {
        self.seen.lock().iter().map(|entry| entry.id).collect()
    }

    /// Operation names of every invocation, in order.
    pub fn operations(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .map(|entry| entry.operation().to_string())
            .collect()
    }

    /// How many times the handler ran.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Waits until the handler ran at least `count` times.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.invocations() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl EntryHandler for EntryCollector {
    async fn handle(&self, entry: &Entry, _ack: &AckHandle) -> Result<bool, HandlerError> {
        self.seen.lock().push(entry.clone());
        let index = self.invocations.fetch_add(1, Ordering::SeqCst);
        let reply = (self.script)(entry, index);
        self.notify.notify_waiters();

        match reply {
            Reply::Handled => Ok(true),
            Reply::NotHandled => Ok(false),
            Reply::Fail(message) => Err(HandlerError::new(message)),
        }
    }
}
