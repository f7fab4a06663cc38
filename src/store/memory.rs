//! In-process store with TTL expiry.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::Store;
use crate::error::Result;
use crate::ratelimit::{Clock, RateLimitRecord, SystemClock};

/// Default interval between background sweeps.
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoreEntry {
    value: RateLimitRecord,
    /// Expiry in ms since epoch
    expires_at: u64,
}

impl StoreEntry {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// An in-memory [`Store`] backed by a concurrent hash map.
///
/// Expired records are dropped lazily when read, and a background task
/// sweeps the whole map on a fixed interval to reclaim keys that are never
/// read again. The sweep only reclaims memory; `get` alone already hides
/// expired records.
///
/// The sweep task belongs to the store. It is cancelled by
/// [`MemoryStore::shutdown`] or when the store is dropped.
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoreEntry>>,
    clock: Arc<dyn Clock>,
    cleanup_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for a [`MemoryStore`].
pub struct MemoryStoreBuilder {
    cleanup_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryStoreBuilder {
    /// Interval between background sweeps. Zero disables the sweep.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Time source used for expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the store and start its sweep task.
    ///
    /// The sweep is spawned on the current tokio runtime. Outside a runtime
    /// the store still works, relying on lazy expiry alone.
    pub fn build(self) -> MemoryStore {
        let entries = Arc::new(DashMap::new());
        let sweeper = spawn_sweeper(entries.clone(), self.clock.clone(), self.cleanup_interval);

        MemoryStore {
            entries,
            clock: self.clock,
            cleanup_interval: self.cleanup_interval,
            sweeper: Mutex::new(sweeper),
        }
    }
}

impl MemoryStore {
    /// Create a store with the default sweep interval and the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a store.
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }

    /// Number of entries held, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Interval between background sweeps.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Run one sweep now and return how many entries were removed.
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.entries, self.clock.now_ms())
    }

    /// Whether the background sweep task is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background sweep. Stored records are unaffected.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            info!("Memory store sweeper stopped");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        let now = self.clock.now_ms();

        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        // Only drop the entry if nobody refreshed it since the read above.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        trace!(key = %key, "Dropped expired record on read");
        Ok(None)
    }

    async fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now_ms().saturating_add(ttl.as_millis() as u64);
        self.entries.insert(
            key.to_string(),
            StoreEntry {
                value: record,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Remove every expired entry. `retain` locks one shard at a time.
fn sweep_expired(entries: &DashMap<String, StoreEntry>, now: u64) -> usize {
    let mut removed = 0;
    entries.retain(|_, entry| {
        let keep = !entry.is_expired(now);
        if !keep {
            removed += 1;
        }
        keep
    });
    removed
}

fn spawn_sweeper(
    entries: Arc<DashMap<String, StoreEntry>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        debug!("Memory store sweep disabled");
        return None;
    }

    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            warn!("No tokio runtime available, memory store will rely on lazy expiry only");
            return None;
        }
    };

    info!(interval_ms = interval.as_millis() as u64, "Starting memory store sweeper");

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = sweep_expired(&entries, clock.now_ms());
            if removed > 0 {
                debug!(removed = removed, remaining = entries.len(), "Swept expired records");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    fn record(count: u64) -> RateLimitRecord {
        RateLimitRecord::FixedWindow {
            count,
            window_start: 0,
        }
    }

    fn manual_store(clock: &ManualClock) -> MemoryStore {
        MemoryStore::builder()
            .cleanup_interval(Duration::ZERO)
            .clock(Arc::new(clock.clone()))
            .build()
    }

    #[tokio::test]
    async fn test_set_then_get_returns_record() {
        let clock = ManualClock::new(1_000);
        let store = manual_store(&clock);

        store.set("k", record(3), Duration::from_millis(100)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(record(3)));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_an_error() {
        let store = manual_store(&ManualClock::new(0));
        assert_eq!(store.get("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_record_is_absent_without_sweep() {
        let clock = ManualClock::new(1_000);
        let store = manual_store(&clock);

        store.set("k", record(1), Duration::from_millis(20)).await.unwrap();
        clock.advance(Duration::from_millis(19));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        // lazy expiry removed the entry
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_resets_expiry() {
        let clock = ManualClock::new(0);
        let store = manual_store(&clock);

        store.set("k", record(1), Duration::from_millis(20)).await.unwrap();
        clock.advance(Duration::from_millis(15));
        store.set("k", record(2), Duration::from_millis(20)).await.unwrap();
        clock.advance(Duration::from_millis(15));

        assert_eq!(store.get("k").await.unwrap(), Some(record(2)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = manual_store(&ManualClock::new(0));

        store.set("k", record(1), Duration::from_secs(1)).await.unwrap();
        tokio_test::assert_ok!(store.delete("k").await);
        tokio_test::assert_ok!(store.delete("k").await);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manual_sweep_removes_only_expired() {
        let clock = ManualClock::new(0);
        let store = manual_store(&clock);

        store.set("short", record(1), Duration::from_millis(10)).await.unwrap();
        store.set("long", record(1), Duration::from_millis(1_000)).await.unwrap();
        clock.advance(Duration::from_millis(50));

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_background_sweep_reclaims_entries() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::builder()
            .cleanup_interval(Duration::from_millis(10))
            .clock(Arc::new(clock.clone()))
            .build();
        assert!(store.is_sweeping());

        store.set("a", record(1), Duration::from_millis(5)).await.unwrap();
        store.set("b", record(1), Duration::from_millis(5)).await.unwrap();
        clock.advance(Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper_and_keeps_data() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::builder()
            .cleanup_interval(Duration::from_millis(10))
            .clock(Arc::new(clock.clone()))
            .build();

        store.set("k", record(7), Duration::from_millis(100)).await.unwrap();
        store.shutdown();
        tokio::task::yield_now().await;

        assert!(!store.is_sweeping());
        assert_eq!(store.get("k").await.unwrap(), Some(record(7)));

        // expiry still holds once the sweeper is gone
        clock.advance(Duration::from_millis(100));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_interval_disables_sweeper() {
        let store = MemoryStore::builder().cleanup_interval(Duration::ZERO).build();
        assert!(!store.is_sweeping());
    }

    #[test]
    fn test_build_outside_runtime_relies_on_lazy_expiry() {
        let store = MemoryStore::new();
        assert!(!store.is_sweeping());
        assert_eq!(store.cleanup_interval(), DEFAULT_CLEANUP_INTERVAL);
    }

    #[tokio::test]
    async fn test_real_clock_ttl() {
        let store = MemoryStore::new();

        store.set("key_ttl", record(1), Duration::from_millis(20)).await.unwrap();
        assert!(store.get("key_ttl").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("key_ttl").await.unwrap(), None);
    }
}
