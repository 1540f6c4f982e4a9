//! Fault injection for log stores.
//!
//! [`ChaosLogStore`] wraps any `LogStore` and fails read, pending and claim
//! calls with `StoreError::Unavailable` at a configured probability, optionally
//! capped to a fixed number of failures. Group creation, acks and releases
//! always reach the wrapped store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use streamgroup::entry::Entry;
use streamgroup::errors::{StoreError, StoreResult};
use streamgroup::store::{LogStore, PendingConsumer, PendingEntry};
use streamgroup::types::{ConsumerGroup, ConsumerName, EntryId, StreamKey};

/// Probability value for failure injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
///
/// ```ignore
/// use streamgroup_testing::chaos::Probability;
///
/// assert!(Probability::try_new(0.5).is_ok());
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f64);

/// How a [`ChaosLogStore`] misbehaves.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    max_failures: Option<u32>,
}

impl ChaosConfig {
    /// Seeded configuration, reproducible across runs.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Fails calls with the given probability, clamped to [0.0, 1.0].
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Stops injecting after `max_failures` failures.
    #[must_use]
    pub const fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = Some(max_failures);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            max_failures: None,
        }
    }
}

/// Wraps a store with [`ChaosLogStore`].
pub trait ChaosLogStoreExt: Sized {
    /// Wraps `self` with fault injection.
    fn with_chaos(self, config: ChaosConfig) -> ChaosLogStore<Self>;
}

/// A `LogStore` wrapper injecting transient failures.
pub struct ChaosLogStore<S> {
    store: S,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    injected: AtomicU32,
}

impl<S> ChaosLogStore<S> {
    /// Wraps `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            config,
            rng: Mutex::new(rng),
            injected: AtomicU32::new(0),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, operation: &str) -> StoreResult<()> {
        let probability: f64 = self.config.failure_probability.into();
        if probability <= 0.0 {
            return Ok(());
        }
        if self
            .config
            .max_failures
            .is_some_and(|max| self.injected_failures() >= max)
        {
            return Ok(());
        }
        if probability < 1.0 && !self.rng.lock().random_bool(probability) {
            return Ok(());
        }

        self.injected.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable(format!(
            "chaos injected failure in {operation}"
        )))
    }
}

#[async_trait]
impl<S> LogStore for ChaosLogStore<S>
where
    S: LogStore,
{
    async fn create_group_if_missing(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<()> {
        self.store.create_group_if_missing(stream, group).await
    }

    async fn read_new(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.maybe_fail("read_new")?;
        self.store.read_new(stream, group, consumer, count).await
    }

    async fn read_self_pending(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.maybe_fail("read_self_pending")?;
        self.store
            .read_self_pending(stream, group, consumer, count)
            .await
    }

    async fn read_range(
        &self,
        stream: &StreamKey,
        from: EntryId,
        count: usize,
    ) -> StoreResult<Vec<Entry>> {
        self.maybe_fail("read_range")?;
        self.store.read_range(stream, from, count).await
    }

    async fn pending_summary(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
    ) -> StoreResult<Vec<PendingConsumer>> {
        self.maybe_fail("pending_summary")?;
        self.store.pending_summary(stream, group).await
    }

    async fn pending_detail(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        range: (EntryId, EntryId),
        count: usize,
    ) -> StoreResult<Vec<PendingEntry>> {
        self.maybe_fail("pending_detail")?;
        self.store
            .pending_detail(stream, group, consumer, range, count)
            .await
    }

    async fn claim(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        new_owner: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<Vec<Entry>> {
        self.maybe_fail("claim")?;
        self.store
            .claim(stream, group, new_owner, min_idle, ids)
            .await
    }

    async fn ack(&self, stream: &StreamKey, group: &ConsumerGroup, id: EntryId) -> StoreResult<()> {
        self.store.ack(stream, group, id).await
    }

    async fn reassign(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        placeholder: &ConsumerName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> StoreResult<()> {
        self.store
            .reassign(stream, group, placeholder, min_idle, ids)
            .await
    }

    async fn unclaim(
        &self,
        stream: &StreamKey,
        group: &ConsumerGroup,
        consumer: &ConsumerName,
        ids: &[EntryId],
    ) -> StoreResult<bool> {
        self.store.unclaim(stream, group, consumer, ids).await
    }
}

impl<S> ChaosLogStoreExt for S
where
    S: LogStore,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosLogStore<Self> {
        ChaosLogStore::new(self, config)
    }
}
