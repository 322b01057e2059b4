//! In-memory (single node) implementation of TTL-bounded locks.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use latch_locks::{
    AcquireOutcome, DEFAULT_EXPIRY_GRACE, DEFAULT_TTL, LockEntry, LockId, LockStatus, LockTable,
    ReleaseOutcome,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Options for creating a `MemoryLockTable`.
#[derive(Clone, Copy, Debug)]
pub struct MemoryLockTableOptions {
    /// TTL used when an acquisition does not supply one.
    pub default_ttl: Duration,

    /// Extra delay after a lock lapses before its expiry action runs.
    pub expiry_grace: Duration,
}

impl Default for MemoryLockTableOptions {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            expiry_grace: DEFAULT_EXPIRY_GRACE,
        }
    }
}

// Entries and the id counter share one mutex so that check, allocate and
// insert happen as a single step.
#[derive(Debug)]
struct State {
    entries: HashMap<String, LockEntry>,
    next_lock_id: LockId,
}

impl Default for State {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_lock_id: LockId::FIRST,
        }
    }
}

impl State {
    fn try_insert(&mut self, resource: &str, ttl: Duration) -> Result<AcquireOutcome, Error> {
        let now = Instant::now();

        if self
            .entries
            .get(resource)
            .is_some_and(|entry| entry.is_live_at(now))
        {
            return Ok(AcquireOutcome::Conflict);
        }

        let expires_at = now.checked_add(ttl).ok_or(Error::InvalidTtl)?;
        let lock_id = self.next_lock_id;
        self.next_lock_id = lock_id.next();

        self.entries.insert(
            resource.to_string(),
            LockEntry {
                lock_id,
                expires_at,
            },
        );

        Ok(AcquireOutcome::Acquired(lock_id))
    }

    // Removes the entry only if it is still the one `lock_id` was issued for
    // and it has actually lapsed.
    fn remove_if_expired(&mut self, resource: &str, lock_id: LockId) -> bool {
        let expired = self
            .entries
            .get(resource)
            .is_some_and(|entry| entry.lock_id == lock_id && !entry.is_live());

        if expired {
            self.entries.remove(resource);
        }

        expired
    }
}

/// In-memory lock table.
///
/// Clones share the same table. Every successful acquisition spawns a task on
/// the current tokio runtime that reclaims the entry once it lapses.
#[derive(Clone, Debug)]
pub struct MemoryLockTable {
    state: Arc<Mutex<State>>,
    default_ttl: Duration,
    expiry_grace: Duration,
}

impl Default for MemoryLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockTable {
    /// Creates a new instance of `MemoryLockTable` with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MemoryLockTableOptions::default())
    }

    /// Creates a new instance of `MemoryLockTable`.
    #[must_use]
    pub fn with_options(
        MemoryLockTableOptions {
            default_ttl,
            expiry_grace,
        }: MemoryLockTableOptions,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            default_ttl,
            expiry_grace,
        }
    }

    /// TTL applied when an acquisition does not supply one.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn schedule_expiry(&self, resource: String, lock_id: LockId, ttl: Duration) {
        let state = Arc::downgrade(&self.state);
        let delay = ttl.saturating_add(self.expiry_grace);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            expire(&state, &resource, lock_id);
        });
    }
}

fn expire(state: &Weak<Mutex<State>>, resource: &str, lock_id: LockId) {
    let Some(state) = state.upgrade() else {
        return;
    };

    if state.lock().remove_if_expired(resource, lock_id) {
        info!(resource, %lock_id, "Auto-released lock");
    } else {
        debug!(resource, %lock_id, "Expiry skipped, lock released or superseded");
    }
}

fn validate_resource(resource: &str) -> Result<(), Error> {
    if resource.is_empty() {
        return Err(Error::MissingResource);
    }
    Ok(())
}

#[async_trait]
impl LockTable for MemoryLockTable {
    type Error = Error;

    #[instrument(skip(self), fields(resource = %resource))]
    async fn acquire(
        &self,
        resource: String,
        ttl: Option<Duration>,
    ) -> Result<AcquireOutcome, Self::Error> {
        validate_resource(&resource)?;

        let ttl = match ttl {
            Some(ttl) if ttl.is_zero() => return Err(Error::InvalidTtl),
            Some(ttl) => ttl,
            None => self.default_ttl,
        };

        let outcome = self.state.lock().try_insert(&resource, ttl)?;

        match outcome {
            AcquireOutcome::Acquired(lock_id) => {
                info!(%lock_id, ttl = ?ttl, "Lock acquired");
                self.schedule_expiry(resource, lock_id, ttl);
            }
            AcquireOutcome::Conflict => {
                debug!("Lock already held");
            }
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(resource = %resource))]
    async fn release(&self, resource: String) -> Result<ReleaseOutcome, Self::Error> {
        validate_resource(&resource)?;

        let removed = self.state.lock().entries.remove(&resource);

        Ok(match removed {
            Some(entry) => {
                info!(lock_id = %entry.lock_id, "Lock released");
                ReleaseOutcome::Released
            }
            None => {
                debug!("No lock to release");
                ReleaseOutcome::NotFound
            }
        })
    }

    async fn snapshot(&self) -> Result<HashMap<String, LockEntry>, Self::Error> {
        Ok(self.state.lock().entries.clone())
    }

    #[instrument(skip(self), fields(resource = %resource))]
    async fn check(&self, resource: String) -> Result<LockStatus, Self::Error> {
        validate_resource(&resource)?;

        let now = Instant::now();
        let state = self.state.lock();

        Ok(match state.entries.get(&resource) {
            Some(entry) if entry.is_live_at(now) => LockStatus::Held(*entry),
            _ => LockStatus::Free,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::time::sleep;

    const TTL: Duration = Duration::from_millis(100);

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    async fn acquire_id(table: &MemoryLockTable, resource: &str, ttl: Duration) -> LockId {
        table
            .acquire(resource.to_string(), Some(ttl))
            .await
            .expect("acquire failed")
            .lock_id()
            .expect("lock should be granted")
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_release_lock() {
        let table = MemoryLockTable::new();

        let db1 = table.acquire("db1".to_string(), Some(ms(200))).await;
        assert_eq!(db1, Ok(AcquireOutcome::Acquired(LockId::new(1))));

        let again = table.acquire("db1".to_string(), Some(ms(200))).await;
        assert_eq!(again, Ok(AcquireOutcome::Conflict));

        let released = table.release("db1".to_string()).await;
        assert_eq!(released, Ok(ReleaseOutcome::Released));

        let reacquired = table.acquire("db1".to_string(), Some(ms(200))).await;
        assert_eq!(reacquired, Ok(AcquireOutcome::Acquired(LockId::new(2))));

        let never_acquired = table.release("db2".to_string()).await;
        assert_eq!(never_acquired, Ok(ReleaseOutcome::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_does_not_mutate() {
        let table = MemoryLockTable::new();
        let lock_id = acquire_id(&table, "res", TTL).await;
        let before = table.snapshot().await.unwrap();

        sleep(ms(50)).await;
        assert_matches!(
            table.acquire("res".to_string(), Some(ms(1000))).await,
            Ok(AcquireOutcome::Conflict)
        );

        let after = table.snapshot().await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after["res"].lock_id, lock_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_resource_rejected() {
        let table = MemoryLockTable::new();

        assert_eq!(
            table.acquire(String::new(), None).await,
            Err(Error::MissingResource)
        );
        assert_eq!(
            table.release(String::new()).await,
            Err(Error::MissingResource)
        );
        assert_eq!(table.check(String::new()).await, Err(Error::MissingResource));

        // Rejected input must not consume an id.
        assert_eq!(acquire_id(&table, "res", TTL).await, LockId::FIRST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_rejected() {
        let table = MemoryLockTable::new();

        assert_eq!(
            table.acquire("res".to_string(), Some(Duration::ZERO)).await,
            Err(Error::InvalidTtl)
        );
        assert!(table.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applied() {
        let table = MemoryLockTable::with_options(MemoryLockTableOptions {
            default_ttl: ms(300),
            ..Default::default()
        });
        let start = Instant::now();

        table.acquire("res".to_string(), None).await.unwrap();

        let snapshot = table.snapshot().await.unwrap();
        assert_eq!(snapshot["res"].expires_at, start + ms(300));
        assert_eq!(table.default_ttl(), ms(300));
        assert_eq!(MemoryLockTable::new().default_ttl(), DEFAULT_TTL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires() {
        let table = MemoryLockTable::new();
        let first = acquire_id(&table, "res", TTL).await;

        sleep(ms(99)).await;
        assert_matches!(
            table.acquire("res".to_string(), Some(TTL)).await,
            Ok(AcquireOutcome::Conflict)
        );

        sleep(ms(2)).await;
        let second = acquire_id(&table, "res", TTL).await;
        assert!(second > first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_reclaims_entry() {
        let table = MemoryLockTable::new();
        acquire_id(&table, "res", TTL).await;

        sleep(TTL + DEFAULT_EXPIRY_GRACE + ms(1)).await;

        assert!(table.snapshot().await.unwrap().is_empty());
        assert_eq!(
            table.release("res".to_string()).await,
            Ok(ReleaseOutcome::NotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_expiry_keeps_newer_lock() {
        let table = MemoryLockTable::new();
        let first = acquire_id(&table, "res", TTL).await;

        // Lapsed but not yet swept: the first expiry action is due at 110ms.
        sleep(ms(105)).await;
        let second = acquire_id(&table, "res", TTL).await;
        assert!(second > first);

        // Past the first action's deadline, the newer entry must survive.
        sleep(ms(20)).await;
        let snapshot = table.snapshot().await.unwrap();
        assert_eq!(snapshot["res"].lock_id, second);
        assert_matches!(
            table.acquire("res".to_string(), Some(TTL)).await,
            Ok(AcquireOutcome::Conflict)
        );

        // The second lock's own action still reclaims it.
        sleep(ms(100)).await;
        assert!(table.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_after_conflict_and_sweep() {
        let table = MemoryLockTable::new();
        let first = acquire_id(&table, "res", TTL).await;

        assert_matches!(
            table.acquire("res".to_string(), Some(TTL)).await,
            Ok(AcquireOutcome::Conflict)
        );

        sleep(ms(150)).await;
        let third = acquire_id(&table, "res", TTL).await;
        assert!(third > first);

        sleep(ms(50)).await;
        assert_eq!(table.snapshot().await.unwrap()["res"].lock_id, third);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_lapsed_entry() {
        let table = MemoryLockTable::new();
        acquire_id(&table, "res", TTL).await;

        sleep(ms(105)).await;
        assert_eq!(table.check("res".to_string()).await, Ok(LockStatus::Free));
        assert_eq!(
            table.release("res".to_string()).await,
            Ok(ReleaseOutcome::Released)
        );

        // The pending expiry action finds nothing and does nothing.
        sleep(ms(20)).await;
        assert!(table.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_not_identity_checked() {
        let owner = MemoryLockTable::new();
        let stranger = owner.clone();
        acquire_id(&owner, "res", TTL).await;

        assert_eq!(
            stranger.release("res".to_string()).await,
            Ok(ReleaseOutcome::Released)
        );
        assert_eq!(owner.check("res".to_string()).await, Ok(LockStatus::Free));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_strictly_increase() {
        let table = MemoryLockTable::new();
        let mut issued = Vec::new();

        issued.push(acquire_id(&table, "a", TTL).await);
        issued.push(acquire_id(&table, "b", TTL).await);
        table.release("a".to_string()).await.unwrap();
        issued.push(acquire_id(&table, "a", TTL).await);
        sleep(ms(200)).await;
        issued.push(acquire_id(&table, "b", TTL).await);
        issued.push(acquire_id(&table, "c", ms(10)).await);

        assert!(issued.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(issued.first(), Some(&LockId::FIRST));
        assert_eq!(issued.last(), Some(&LockId::new(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_fidelity() {
        let table = MemoryLockTable::new();
        let start = Instant::now();
        let mut expected = HashMap::new();

        for resource in ["r1", "r2", "r3"] {
            let lock_id = acquire_id(&table, resource, TTL).await;
            expected.insert(resource.to_string(), lock_id);
        }

        let snapshot = table.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), expected.len());
        for (resource, lock_id) in &expected {
            assert_eq!(snapshot[resource].lock_id, *lock_id);
            assert_eq!(snapshot[resource].expires_at, start + TTL);
        }

        // Lapsed entries stay visible until their expiry action runs.
        sleep(ms(105)).await;
        let lapsed = table.snapshot().await.unwrap();
        assert_eq!(lapsed.len(), 3);
        assert!(lapsed.values().all(|entry| !entry.is_live()));

        sleep(ms(10)).await;
        assert!(table.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status() {
        let table = MemoryLockTable::new();

        assert_eq!(table.check("res".to_string()).await, Ok(LockStatus::Free));

        let lock_id = acquire_id(&table, "res", TTL).await;
        assert_matches!(
            table.check("res".to_string()).await,
            Ok(LockStatus::Held(entry)) if entry.lock_id == lock_id
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_single_winner() {
        let table = MemoryLockTable::new();

        let attempts = (0..32)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move {
                    table
                        .acquire("contended".to_string(), Some(Duration::from_secs(30)))
                        .await
                })
            })
            .collect::<Vec<_>>();

        let mut granted = Vec::new();
        for attempt in attempts {
            if let AcquireOutcome::Acquired(lock_id) = attempt.await.unwrap().unwrap() {
                granted.push(lock_id);
            }
        }

        assert_eq!(granted, vec![LockId::FIRST]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_unique() {
        let table = MemoryLockTable::new();

        let attempts = (0..64)
            .map(|i| {
                let table = table.clone();
                tokio::spawn(async move {
                    table
                        .acquire(format!("resource-{i}"), Some(Duration::from_secs(30)))
                        .await
                })
            })
            .collect::<Vec<_>>();

        let mut ids = Vec::new();
        for attempt in attempts {
            ids.push(attempt.await.unwrap().unwrap().lock_id().unwrap().get());
        }
        ids.sort_unstable();

        assert_eq!(ids, (1..=64).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_table_expiry_is_noop() {
        let table = MemoryLockTable::new();
        acquire_id(&table, "res", TTL).await;
        drop(table);

        // Must not panic once the action fires with the table gone.
        sleep(ms(200)).await;
    }
}
