//! Consumer plans: the immutable configuration of one subscription.
//!
//! A [`ConsumerPlan`] is built once per subscription. Every `with_*` method
//! consumes the plan and returns an updated copy, so a derived plan (another
//! environment, a different batch size) never affects the plan it came from
//! once the caller has cloned it. Collaborators are shared through `Arc`.
//!
//! Host applications usually load tunables from configuration files through
//! [`ConsumerOptions`] and apply them with [`ConsumerPlan::with_options`].

use crate::behavior::{
    AckBehavior, ClaimingTrigger, DelayWhenEmptyBehavior, PartialConsumerBehavior, ReleaseBackoff,
};
use crate::errors::{SubscriptionError, SubscriptionResult};
use crate::interceptor::ConsumerInterceptor;
use crate::retry::RetryPolicy;
use crate::storage::StorageStrategy;
use crate::types::{ConsumerGroup, ConsumerName, Environment, StreamKey, StreamUri, Timestamp};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Number of entries requested per fetch. Always at least 1.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct BatchSize(usize);

impl Default for BatchSize {
    fn default() -> Self {
        Self::try_new(16).expect("default batch size is always valid")
    }
}

/// Number of consume attempts after which a subscription completes; 0 means unlimited.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Into,
    Display,
    Serialize,
    Deserialize
))]
pub struct MaxMessages(u64);

impl MaxMessages {
    /// No cutoff.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Whether `consumed` attempts reach the cutoff.
    pub fn is_reached(self, consumed: u64) -> bool {
        let limit: u64 = self.into();
        limit > 0 && consumed >= limit
    }
}

impl Default for MaxMessages {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Subscription tunables in a form suitable for configuration files.
///
/// Every field has a default, so partial documents deserialize. Durations are
/// expressed in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Entries requested per fetch.
    pub batch_size: usize,
    /// Consecutive empty reads before stealing from peers; 0 disables stealing.
    pub empty_batch_threshold: u32,
    /// Minimum idle time of a peer's entry before it can be stolen.
    pub min_idle_ms: u64,
    /// First delay after an empty cycle.
    pub empty_delay_initial_ms: u64,
    /// Cap for the empty-cycle delay.
    pub empty_delay_max_ms: u64,
    /// First pause after releasing entries.
    pub release_delay_initial_ms: u64,
    /// Cap for the release pause.
    pub release_delay_max_ms: u64,
    /// When acknowledgments are sent.
    pub ack_behavior: AckBehavior,
    /// What happens to unmatched entries.
    pub partial_behavior: PartialConsumerBehavior,
    /// Handler attempts per entry, including the first.
    pub retry_max_attempts: u32,
    /// Delay before the first handler retry.
    pub retry_base_delay_ms: u64,
    /// Cap for the handler retry delay.
    pub retry_max_delay_ms: u64,
    /// Whether handler retry delays are jittered.
    pub retry_jitter: bool,
    /// Consume attempts before the subscription completes; 0 means unlimited.
    pub max_messages: u64,
    /// Stop once entries newer than this are reached.
    pub fetch_until: Option<Timestamp>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            empty_batch_threshold: 3,
            min_idle_ms: 10_000,
            empty_delay_initial_ms: 100,
            empty_delay_max_ms: 5_000,
            release_delay_initial_ms: 100,
            release_delay_max_ms: 5_000,
            ack_behavior: AckBehavior::default(),
            partial_behavior: PartialConsumerBehavior::default(),
            retry_max_attempts: 1,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5_000,
            retry_jitter: false,
            max_messages: 0,
            fetch_until: None,
        }
    }
}

/// Immutable configuration of one subscription.
#[derive(Clone)]
pub struct ConsumerPlan {
    stream: StreamKey,
    group: ConsumerGroup,
    consumer: ConsumerName,
    batch_size: BatchSize,
    claiming_trigger: ClaimingTrigger,
    delay_when_empty: DelayWhenEmptyBehavior,
    release_backoff: ReleaseBackoff,
    ack_behavior: AckBehavior,
    partial_behavior: PartialConsumerBehavior,
    retry_policy: RetryPolicy,
    max_messages: MaxMessages,
    fetch_until: Option<Timestamp>,
    cancellation: CancellationToken,
    storage_strategies: Vec<Arc<dyn StorageStrategy>>,
    interceptors: Vec<Arc<dyn ConsumerInterceptor>>,
}

impl ConsumerPlan {
    /// Creates a plan with default settings for a stream in the default environment.
    pub fn new(uri: StreamUri, group: ConsumerGroup, consumer: ConsumerName) -> Self {
        Self {
            stream: StreamKey::new(Environment::default(), uri),
            group,
            consumer,
            batch_size: BatchSize::default(),
            claiming_trigger: ClaimingTrigger::default(),
            delay_when_empty: DelayWhenEmptyBehavior::default(),
            release_backoff: ReleaseBackoff::default(),
            ack_behavior: AckBehavior::default(),
            partial_behavior: PartialConsumerBehavior::default(),
            retry_policy: RetryPolicy::default(),
            max_messages: MaxMessages::default(),
            fetch_until: None,
            cancellation: CancellationToken::new(),
            storage_strategies: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    /// Derives a plan for the same uri in another environment.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.stream = StreamKey::new(environment, self.stream.uri().clone());
        self
    }

    /// Sets the number of entries requested per fetch.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: BatchSize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets when and what is stolen from peers.
    #[must_use]
    pub const fn with_claiming_trigger(mut self, trigger: ClaimingTrigger) -> Self {
        self.claiming_trigger = trigger;
        self
    }

    /// Sets the backoff applied to empty cycles.
    #[must_use]
    pub fn with_delay_when_empty(mut self, behavior: DelayWhenEmptyBehavior) -> Self {
        self.delay_when_empty = behavior;
        self
    }

    /// Sets the pause taken after releasing entries.
    #[must_use]
    pub const fn with_release_backoff(mut self, backoff: ReleaseBackoff) -> Self {
        self.release_backoff = backoff;
        self
    }

    /// Sets the ack behavior.
    #[must_use]
    pub const fn with_ack_behavior(mut self, behavior: AckBehavior) -> Self {
        self.ack_behavior = behavior;
        self
    }

    /// Sets the partial consumer behavior.
    #[must_use]
    pub const fn with_partial_behavior(mut self, behavior: PartialConsumerBehavior) -> Self {
        self.partial_behavior = behavior;
        self
    }

    /// Sets the retry policy for handler invocations.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Completes the subscription after this many consume attempts.
    #[must_use]
    pub const fn with_max_messages(mut self, max_messages: MaxMessages) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Replays entries up to `cutoff` and then completes.
    #[must_use]
    pub const fn with_fetch_until(mut self, cutoff: Timestamp) -> Self {
        self.fetch_until = Some(cutoff);
        self
    }

    /// Binds the subscription to a caller-supplied cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Appends a storage strategy; strategies are consulted in registration order.
    #[must_use]
    pub fn with_storage_strategy(mut self, strategy: Arc<dyn StorageStrategy>) -> Self {
        self.storage_strategies.push(strategy);
        self
    }

    /// Appends an interceptor; interceptors run in registration order.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ConsumerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Applies configuration-file settings on top of this plan.
    ///
    /// # Errors
    /// Returns `SubscriptionError::InvalidPlan` when the batch size is out of range.
    pub fn with_options(self, options: &ConsumerOptions) -> SubscriptionResult<Self> {
        let batch_size = BatchSize::try_new(options.batch_size).map_err(|error| {
            SubscriptionError::InvalidPlan(format!(
                "batch size {}: {error}",
                options.batch_size
            ))
        })?;

        let retry_policy = RetryPolicy {
            max_attempts: options.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(options.retry_base_delay_ms),
            max_delay: Duration::from_millis(options.retry_max_delay_ms),
            backoff_multiplier: 2.0,
            use_jitter: options.retry_jitter,
        };

        let plan = self
            .with_batch_size(batch_size)
            .with_claiming_trigger(ClaimingTrigger {
                empty_batch_threshold: options.empty_batch_threshold,
                min_idle: Duration::from_millis(options.min_idle_ms),
            })
            .with_delay_when_empty(DelayWhenEmptyBehavior::doubling(
                Duration::from_millis(options.empty_delay_initial_ms),
                Duration::from_millis(options.empty_delay_max_ms),
            ))
            .with_release_backoff(ReleaseBackoff {
                initial: Duration::from_millis(options.release_delay_initial_ms),
                max_delay: Duration::from_millis(options.release_delay_max_ms),
            })
            .with_ack_behavior(options.ack_behavior)
            .with_partial_behavior(options.partial_behavior)
            .with_retry_policy(retry_policy)
            .with_max_messages(MaxMessages::new(options.max_messages));

        Ok(match options.fetch_until {
            Some(cutoff) => plan.with_fetch_until(cutoff),
            None => plan,
        })
    }

    /// The stream this plan reads.
    pub const fn stream(&self) -> &StreamKey {
        &self.stream
    }

    /// The consumer group.
    pub const fn group(&self) -> &ConsumerGroup {
        &self.group
    }

    /// This consumer's name within the group.
    pub const fn consumer(&self) -> &ConsumerName {
        &self.consumer
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size.into()
    }

    /// Claim trigger thresholds.
    pub const fn claiming_trigger(&self) -> &ClaimingTrigger {
        &self.claiming_trigger
    }

    /// Empty-cycle backoff.
    pub const fn delay_when_empty(&self) -> &DelayWhenEmptyBehavior {
        &self.delay_when_empty
    }

    /// Release pause backoff.
    pub const fn release_backoff(&self) -> &ReleaseBackoff {
        &self.release_backoff
    }

    /// Ack behavior.
    pub const fn ack_behavior(&self) -> AckBehavior {
        self.ack_behavior
    }

    /// Partial consumer behavior.
    pub const fn partial_behavior(&self) -> PartialConsumerBehavior {
        self.partial_behavior
    }

    /// Retry policy for handler invocations.
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Consume-attempt cutoff.
    pub const fn max_messages(&self) -> MaxMessages {
        self.max_messages
    }

    /// Bounded replay cutoff, if any.
    pub const fn fetch_until(&self) -> Option<Timestamp> {
        self.fetch_until
    }

    /// The caller-supplied cancellation token.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Storage strategies in registration order.
    pub fn storage_strategies(&self) -> &[Arc<dyn StorageStrategy>] {
        &self.storage_strategies
    }

    /// Interceptors in registration order.
    pub fn interceptors(&self) -> &[Arc<dyn ConsumerInterceptor>] {
        &self.interceptors
    }
}

impl fmt::Debug for ConsumerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerPlan")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("batch_size", &self.batch_size)
            .field("claiming_trigger", &self.claiming_trigger)
            .field("delay_when_empty", &self.delay_when_empty)
            .field("release_backoff", &self.release_backoff)
            .field("ack_behavior", &self.ack_behavior)
            .field("partial_behavior", &self.partial_behavior)
            .field("retry_policy", &self.retry_policy)
            .field("max_messages", &self.max_messages)
            .field("fetch_until", &self.fetch_until)
            .field("storage_strategies", &self.storage_strategies.len())
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
