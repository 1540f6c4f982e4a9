//! Policies that shape how a subscription acknowledges, fails, claims and waits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// When an acknowledgment reaches the log store relative to the callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckBehavior {
    /// Acknowledge right after the callback succeeds.
    #[default]
    OnSucceed,
    /// Acknowledge after the callback completes, whatever the outcome.
    OnFinally,
    /// The application resolves the ack handle itself.
    Manual,
}

/// What happens when a callback reports "not handled" or the batch is interrupted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialConsumerBehavior {
    /// Unmatched entries are acknowledged as bypassed and processing continues.
    #[default]
    Loose,
    /// Every entry must have exactly one owner; an unmatched entry is fatal.
    Strict,
    /// Like `Strict`: an unmatched entry is fatal.
    ThrowIfNotHandled,
    /// An unmatched entry releases itself and the rest of the batch, in order.
    Sequential,
}

impl PartialConsumerBehavior {
    /// Whether an unmatched entry is a protocol violation.
    pub const fn requires_handler(self) -> bool {
        matches!(self, Self::Strict | Self::ThrowIfNotHandled)
    }
}

/// Governs when and what the claim engine steals from peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimingTrigger {
    /// Consecutive empty fresh reads before a steal is attempted; 0 disables stealing.
    pub empty_batch_threshold: u32,
    /// Minimum time a peer's entry must have been idle to be stolen.
    pub min_idle: Duration,
}

impl Default for ClaimingTrigger {
    fn default() -> Self {
        Self {
            empty_batch_threshold: 3,
            min_idle: Duration::from_secs(10),
        }
    }
}

impl ClaimingTrigger {
    /// Whether `empty_batches` consecutive empty reads warrant a steal attempt.
    pub const fn should_claim(&self, empty_batches: u32) -> bool {
        self.empty_batch_threshold > 0 && empty_batches >= self.empty_batch_threshold
    }
}

type NextDelay = dyn Fn(Duration) -> Duration + Send + Sync;

/// Backoff applied when a fetch cycle comes back empty.
///
/// The next delay is computed from the previous one by a pluggable function
/// and clamped to `max_delay`.
#[derive(Clone)]
pub struct DelayWhenEmptyBehavior {
    initial: Duration,
    max_delay: Duration,
    next: Arc<NextDelay>,
}

impl DelayWhenEmptyBehavior {
    /// Doubles the delay on every empty cycle, starting at `initial`.
    pub fn doubling(initial: Duration, max_delay: Duration) -> Self {
        Self::custom(initial, max_delay, |previous| previous.saturating_mul(2))
    }

    /// Uses `next` to derive each delay from the previous one.
    pub fn custom<F>(initial: Duration, max_delay: Duration, next: F) -> Self
    where
        F: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        Self {
            initial,
            max_delay,
            next: Arc::new(next),
        }
    }

    /// Delay used for the first empty cycle and after every reset.
    pub fn initial(&self) -> Duration {
        self.initial.min(self.max_delay)
    }

    /// Upper bound for any delay.
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// The delay that follows `previous`, capped.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        (self.next)(previous).min(self.max_delay)
    }
}

impl Default for DelayWhenEmptyBehavior {
    fn default() -> Self {
        Self::doubling(Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl fmt::Debug for DelayWhenEmptyBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayWhenEmptyBehavior")
            .field("initial", &self.initial)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// Pause taken after releasing entries, doubling up to a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseBackoff {
    /// Pause after the first release and after every successful batch.
    pub initial: Duration,
    /// Upper bound for the pause.
    pub max_delay: Duration,
}

impl ReleaseBackoff {
    /// The pause that follows `previous`.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        previous.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for ReleaseBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}
