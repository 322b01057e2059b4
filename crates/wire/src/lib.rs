//! JSON bodies exchanged between the coordinator and its clients.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use latch_locks::LockEntry;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Body of `POST /lock/acquire`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AcquireRequest {
    /// Resource to lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Requested TTL in milliseconds. The coordinator default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl AcquireRequest {
    /// Request for `resource` held for `ttl`, or the coordinator default.
    ///
    /// Sub-millisecond remainders round up, so any positive `ttl` stays positive.
    #[must_use]
    pub fn new(resource: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            resource: Some(resource.into()),
            ttl_ms: ttl.map(ttl_millis),
        }
    }
}

/// Successful response of `POST /lock/acquire`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireResponse {
    /// Id of the granted lock.
    pub lock_id: u64,
}

/// Body of `POST /lock/release`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ReleaseRequest {
    /// Resource to release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Response of `POST /lock/release`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ReleaseResponse {
    /// Whether an entry was removed.
    pub released: bool,
}

/// Error body returned for rejected requests.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Short description of the failure.
    pub error: String,
}

/// One entry of `GET /locks`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    /// Id of the lock.
    pub lock_id: u64,

    /// Expiry as Unix epoch milliseconds.
    ///
    /// Saturates at `u64::MAX` for expiries past the representable range,
    /// which only very large requested TTLs reach.
    pub expires_at: u64,
}

impl From<LockEntry> for LockView {
    fn from(entry: LockEntry) -> Self {
        Self {
            lock_id: entry.lock_id.get(),
            expires_at: unix_millis(entry.expires_at),
        }
    }
}

/// Response of `GET /locks/{resource}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatusResponse {
    /// The inspected resource.
    pub resource: String,

    /// Whether a live lock holds the resource.
    pub held: bool,

    /// Id of the live lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<u64>,

    /// Expiry of the live lock as Unix epoch milliseconds, saturating like
    /// [`LockView::expires_at`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,

    /// Milliseconds left before the live lock lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

impl LockStatusResponse {
    /// Status of a resource no live lock holds.
    #[must_use]
    pub const fn free(resource: String) -> Self {
        Self {
            resource,
            held: false,
            lock_id: None,
            expires_at: None,
            remaining_ms: None,
        }
    }

    /// Status of a resource held by `entry`.
    #[must_use]
    pub fn held(resource: String, entry: LockEntry) -> Self {
        let view = LockView::from(entry);

        Self {
            resource,
            held: true,
            lock_id: Some(view.lock_id),
            expires_at: Some(view.expires_at),
            remaining_ms: Some(millis(entry.remaining())),
        }
    }
}

/// Maps a monotonic instant onto the wall clock, as Unix epoch milliseconds.
///
/// Instants before the epoch map to `0`; instants beyond what the wall clock
/// or a `u64` can represent map to `u64::MAX`.
#[must_use]
pub fn unix_millis(instant: Instant) -> u64 {
    let now = Instant::now();
    let wall_now = SystemTime::now();

    if instant >= now {
        return wall_now
            .checked_add(instant - now)
            .and_then(|wall| wall.duration_since(UNIX_EPOCH).ok())
            .map_or(u64::MAX, millis);
    }

    wall_now
        .checked_sub(now - instant)
        .and_then(|wall| wall.duration_since(UNIX_EPOCH).ok())
        .map_or(0, millis)
}

/// Whole milliseconds in `ttl`, rounded up and saturating at `u64::MAX`.
#[must_use]
pub fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
