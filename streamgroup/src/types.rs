//! Core identifier types for the consumer engine.
//!
//! Names are validated at construction time with smart constructors, following
//! the "parse, don't validate" principle: once a `ConsumerGroup` exists it is
//! known to be non-empty and bounded, and nothing downstream re-checks it.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the placeholder owner that released entries are reassigned to.
pub const PLACEHOLDER_CONSUMER: &str = "none";

/// The environment a stream lives in (e.g. `prod`, `staging`).
///
/// An empty environment is valid and means "no environment prefix".
#[nutype(
    sanitize(trim),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Environment(String);

impl Default for Environment {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// The URI of a stream within an environment.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamUri(String);

/// Name of a consumer group sharing a stream.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ConsumerGroup(String);

/// Name of one consumer instance inside a group.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ConsumerName(String);

impl ConsumerName {
    /// The placeholder owner released entries are parked on.
    pub fn placeholder() -> Self {
        Self::try_new(PLACEHOLDER_CONSUMER).expect("placeholder consumer name is always valid")
    }

    /// Returns true when this is the release placeholder rather than a live consumer.
    pub fn is_placeholder(&self) -> bool {
        self.as_ref() == PLACEHOLDER_CONSUMER
    }
}

/// Fully qualified key of a stream: environment plus uri.
///
/// Rendered as `"<env>:<uri>"`, or just `"<uri>"` when the environment is empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    environment: Environment,
    uri: StreamUri,
}

impl StreamKey {
    /// Creates a stream key from its parts.
    pub const fn new(environment: Environment, uri: StreamUri) -> Self {
        Self { environment, uri }
    }

    /// The environment part of the key.
    pub const fn environment(&self) -> &Environment {
        &self.environment
    }

    /// The uri part of the key.
    pub const fn uri(&self) -> &StreamUri {
        &self.uri
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.environment.as_ref().is_empty() {
            write!(f, "{}", self.uri)
        } else {
            write!(f, "{}:{}", self.environment, self.uri)
        }
    }
}

/// Store-assigned identifier of a log entry.
///
/// Ids are `<millis>-<sequence>` pairs: the millisecond the entry was appended
/// and a sequence number disambiguating entries appended in the same
/// millisecond. Ordering is total and matches append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId {
    millis: u64,
    sequence: u64,
}

impl EntryId {
    /// The smallest possible id; useful as an open lower range bound.
    pub const MIN: Self = Self::new(0, 0);

    /// The largest possible id; useful as an open upper range bound.
    pub const MAX: Self = Self::new(u64::MAX, u64::MAX);

    /// Creates an id from its parts.
    pub const fn new(millis: u64, sequence: u64) -> Self {
        Self { millis, sequence }
    }

    /// Milliseconds since the unix epoch at which the entry was appended.
    pub const fn millis(&self) -> u64 {
        self.millis
    }

    /// Sequence within the millisecond.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The append time encoded in the id, if representable.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let millis = i64::try_from(self.millis).ok()?;
        DateTime::from_timestamp_millis(millis).map(Timestamp::new)
    }

    /// The smallest id strictly greater than this one.
    #[must_use]
    pub const fn successor(self) -> Self {
        if self.sequence == u64::MAX {
            Self::new(self.millis.saturating_add(1), 0)
        } else {
            Self::new(self.millis, self.sequence + 1)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}

/// Error returned when an entry id cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entry id '{0}': expected '<millis>-<sequence>'")]
pub struct EntryIdParseError(String);

impl FromStr for EntryId {
    type Err = EntryIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EntryIdParseError(s.to_string());
        let (millis, sequence) = s.split_once('-').ok_or_else(invalid)?;
        let millis = millis.parse().map_err(|_| invalid())?;
        let sequence = sequence.parse().map_err(|_| invalid())?;
        Ok(Self::new(millis, sequence))
    }
}

/// A point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Milliseconds since the unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
