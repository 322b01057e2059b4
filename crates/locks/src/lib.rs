//! Abstract interface for single-node, time-bounded mutual exclusion locks.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// TTL applied when a caller does not supply one.
pub const DEFAULT_TTL: Duration = Duration::from_millis(5000);

/// Delay added to the TTL before an expiry action fires.
pub const DEFAULT_EXPIRY_GRACE: Duration = Duration::from_millis(10);

/// Marker trait for `LockTable` errors
pub trait LockTableError: Debug + Error + Send + Sync + 'static {}

/// Identity of a single successful acquisition.
///
/// Ids are issued in strictly increasing order for the lifetime of a table and
/// are never reused, even after the lock they identify is released or expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u64);

impl LockId {
    /// The first id a fresh table issues.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id issued after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<LockId> for u64 {
    fn from(id: LockId) -> Self {
        id.0
    }
}

/// A lock currently stored in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockEntry {
    /// Id issued by the acquisition that created this entry.
    pub lock_id: LockId,

    /// Monotonic instant after which the entry is lapsed.
    pub expires_at: Instant,
}

impl LockEntry {
    /// Whether the entry still blocks acquisitions at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    /// Whether the entry still blocks acquisitions.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_live_at(Instant::now())
    }

    /// Time left before the entry lapses, zero if it already has.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Result of an acquisition attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was granted under the given id.
    Acquired(LockId),

    /// A live lock already exists for the resource. Nothing was changed.
    Conflict,
}

impl AcquireOutcome {
    /// Returns the granted id, if any.
    #[must_use]
    pub const fn lock_id(self) -> Option<LockId> {
        match self {
            Self::Acquired(lock_id) => Some(lock_id),
            Self::Conflict => None,
        }
    }
}

/// Result of a release attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// An entry existed and was removed.
    Released,

    /// No entry existed for the resource.
    NotFound,
}

/// Represents the current status of a lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockStatus {
    /// No live entry exists. Lapsed entries report as free.
    Free,

    /// A live entry holds the resource.
    Held(LockEntry),
}

/// A table of exclusive, TTL-bounded locks keyed by resource name.
///
/// At most one live entry exists per resource. Entries lapse on their own once
/// their TTL passes and are reclaimed without any caller polling the table.
#[async_trait]
pub trait LockTable: Clone + Send + Sync + 'static {
    /// The error type for lock operations.
    type Error: LockTableError;

    /// Attempts to acquire an exclusive lock on `resource` without waiting.
    ///
    /// `ttl` falls back to the table's default when `None`. Returns
    /// `AcquireOutcome::Conflict` when a live lock is already held.
    ///
    /// # Arguments
    /// * `resource`: Non-empty name of the resource to lock.
    /// * `ttl`: How long the lock is held before it lapses.
    async fn acquire(
        &self,
        resource: String,
        ttl: Option<Duration>,
    ) -> Result<AcquireOutcome, Self::Error>;

    /// Removes the entry for `resource`, live or lapsed.
    ///
    /// Releases are not identity checked: any caller that knows the resource
    /// name can release a lock acquired by somebody else.
    ///
    /// # Arguments
    /// * `resource`: Non-empty name of the resource to release.
    async fn release(&self, resource: String) -> Result<ReleaseOutcome, Self::Error>;

    /// Returns a copy of every stored entry, including lapsed entries that
    /// have not been reclaimed yet.
    async fn snapshot(&self) -> Result<HashMap<String, LockEntry>, Self::Error>;

    /// Checks the status of a single lock.
    ///
    /// # Arguments
    /// * `resource`: Non-empty name of the resource to inspect.
    async fn check(&self, resource: String) -> Result<LockStatus, Self::Error>;
}
