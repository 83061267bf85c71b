//! The cache layer.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, join_all};
use polystore_config::CacheSection;
use polystore_core::{CachePolicy, CacheStrategy};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fingerprint::{normalize_table, record_key};

/// Re-fetches the value behind a refresh-ahead entry.
pub type Refresher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// One cached value.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key.
    pub fingerprint: String,
    /// Normalized table the value was read from.
    pub table: String,
    /// Cached value.
    pub value: Value,
    /// Lifetime granted at insertion.
    pub ttl: Duration,
    /// Invalidation tags.
    pub tags: Vec<String>,
    /// Insertion time.
    pub inserted_at: Instant,
    /// Expiry; `None` if the TTL overflowed the clock.
    pub expires_at: Option<Instant>,
    /// Most recent read.
    pub last_read: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn matches(&self, pattern: &str) -> bool {
        key_matches(&self.fingerprint, &self.table, &self.tags, pattern)
    }
}

/// Whether a key stored for `table` with `tags` falls under `pattern`.
fn key_matches(fingerprint: &str, table: &str, tags: &[String], pattern: &str) -> bool {
    if fingerprint == pattern || table == normalize_table(pattern) {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return fingerprint.starts_with(prefix);
    }
    tags.iter().any(|t| t == pattern)
}

/// A fetch that may store its result once it returns.
struct Pending {
    fingerprint: String,
    table: String,
    tags: Vec<String>,
}

/// Result of [`CacheLayer::get_or_fetch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// The value.
    pub value: Value,
    /// Whether it was served without calling the fetcher.
    pub from_cache: bool,
}

/// Counters exposed through the platform metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries.
    pub entries: u64,
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Fetcher invocations.
    pub fetches: u64,
    /// Callers that waited on another caller's fetch.
    pub coalesced: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
    /// Entries removed for capacity or expiry.
    pub evictions: u64,
    /// Successful refresh-ahead reloads.
    pub refreshes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    refreshes: AtomicU64,
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(u64::try_from(by).unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Fingerprint-keyed result cache.
///
/// Population is single-flight: concurrent misses for one fingerprint share
/// a per-fingerprint lock held only while the first caller fetches, and the
/// others read the value it stored.
///
/// Invalidation is synchronous and bumps a per-table epoch before removing
/// entries. A fetch stores its result only if its table's epoch is unchanged,
/// and the check happens under the entry's shard lock, so a fetch that
/// started before an invalidation never repopulates the stale value. Fetches
/// against other tables are unaffected.
pub struct CacheLayer {
    config: CacheSection,
    entries: DashMap<String, CacheEntry>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    refreshers: DashMap<String, Refresher>,
    epochs: DashMap<String, u64>,
    pending: DashMap<u64, Pending>,
    next_pending: AtomicU64,
    counters: Counters,
    task: std::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("enabled", &self.config.enabled)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl CacheLayer {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: CacheSection) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            flights: DashMap::new(),
            refreshers: DashMap::new(),
            epochs: DashMap::new(),
            pending: DashMap::new(),
            next_pending: AtomicU64::new(0),
            counters: Counters::default(),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Whether the cache is switched on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// TTL for entries stored without one.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.config.default_ttl_secs)
    }

    /// Look up a live entry. Expired entries are dropped on the way.
    pub fn get(&self, fingerprint: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(fingerprint)
            && !entry.is_expired(now)
        {
            entry.last_read = Some(now);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }
        if self
            .entries
            .remove_if(fingerprint, |_, e| e.is_expired(now))
            .is_some()
        {
            self.refreshers.remove(fingerprint);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` under `fingerprint`. A zero TTL stores nothing.
    pub fn put(
        &self,
        fingerprint: &str,
        table: &str,
        value: Value,
        ttl: Duration,
        tags: Vec<String>,
    ) {
        self.store(fingerprint, &normalize_table(table), value, ttl, tags, None);
    }

    /// Insert an entry. With `expected_epoch`, the table's epoch is compared
    /// under the shard lock and nothing is stored if it moved. Returns whether
    /// the entry was stored.
    fn store(
        &self,
        fingerprint: &str,
        table: &str,
        value: Value,
        ttl: Duration,
        tags: Vec<String>,
        expected_epoch: Option<u64>,
    ) -> bool {
        if !self.config.enabled || ttl.is_zero() {
            return false;
        }
        if !self.entries.contains_key(fingerprint) && self.entries.len() >= self.config.max_entries
        {
            self.evict_one();
        }
        let slot = self.entries.entry(fingerprint.to_owned());
        if expected_epoch.is_some_and(|epoch| self.epoch(table) != epoch) {
            return false;
        }
        let now = Instant::now();
        slot.insert(CacheEntry {
            fingerprint: fingerprint.to_owned(),
            table: table.to_owned(),
            value,
            ttl,
            tags,
            inserted_at: now,
            expires_at: now.checked_add(ttl),
            last_read: None,
        });
        true
    }

    fn epoch(&self, table: &str) -> u64 {
        self.epochs.get(table).map_or(0, |e| *e)
    }

    fn bump_epoch(&self, table: &str) {
        let mut epoch = self.epochs.entry(table.to_owned()).or_insert(0);
        *epoch = epoch.saturating_add(1);
    }

    /// Move the epoch of every table `pattern` can reach: the table it names
    /// and the tables of in-flight fetches it matches.
    fn fence(&self, pattern: &str) {
        let mut tables = vec![normalize_table(pattern)];
        for p in &self.pending {
            if key_matches(&p.fingerprint, &p.table, &p.tags, pattern) && !tables.contains(&p.table) {
                tables.push(p.table.clone());
            }
        }
        for table in &tables {
            self.bump_epoch(table);
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, fingerprint: &str) -> bool {
        self.fence(fingerprint);
        self.refreshers.remove(fingerprint);
        let removed = self.entries.remove(fingerprint).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every entry matching `pattern`: an exact fingerprint, a table
    /// name, a key prefix ending in `*`, or a tag. Returns the number removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.fence(pattern);
        let mut removed = 0_usize;
        let mut touched: Vec<String> = Vec::new();
        self.entries.retain(|_, entry| {
            let hit = entry.matches(pattern);
            if hit {
                removed = removed.saturating_add(1);
                if !touched.contains(&entry.table) {
                    touched.push(entry.table.clone());
                }
            }
            !hit
        });
        // Tag and prefix matches reach tables the pattern does not name.
        for table in &touched {
            self.bump_epoch(table);
        }
        self.refreshers.retain(|k, _| self.entries.contains_key(k));
        bump(&self.counters.invalidations, removed);
        debug!(pattern, removed, "Cache invalidated");
        removed
    }

    /// Drop everything.
    pub fn clear(&self) -> usize {
        let tables: Vec<String> = self
            .pending
            .iter()
            .map(|p| p.table.clone())
            .chain(self.entries.iter().map(|e| e.table.clone()))
            .collect();
        for table in &tables {
            self.bump_epoch(table);
        }
        let n = self.entries.len();
        self.entries.clear();
        self.refreshers.clear();
        bump(&self.counters.invalidations, n);
        n
    }

    /// Serve `fingerprint` from the cache or populate it with `fetch`.
    ///
    /// With an inactive policy (strategy `none` or zero TTL) or a disabled
    /// cache, `fetch` runs unconditionally and nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error. Failed fetches are not cached, so the
    /// next caller fetches again.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        fingerprint: &str,
        table: &str,
        policy: &CachePolicy,
        fetch: F,
    ) -> Result<Lookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if !self.config.enabled || !policy.is_active() {
            return fetch().await.map(|value| Lookup {
                value,
                from_cache: false,
            });
        }
        if let Some(value) = self.get(fingerprint) {
            return Ok(Lookup {
                value,
                from_cache: true,
            });
        }

        let flight = self
            .flights
            .entry(fingerprint.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = flight.lock().await;

        if let Some(value) = self.peek(fingerprint) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            drop(guard);
            return Ok(Lookup {
                value,
                from_cache: true,
            });
        }

        let table = normalize_table(table);
        let id = self.next_pending.fetch_add(1, Ordering::SeqCst);
        self.pending.insert(
            id,
            Pending {
                fingerprint: fingerprint.to_owned(),
                table: table.clone(),
                tags: policy.tags.clone(),
            },
        );
        let epoch = self.epoch(&table);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let result = fetch().await;
        if let Ok(value) = &result
            && !self.store(
                fingerprint,
                &table,
                value.clone(),
                policy.ttl,
                policy.tags.clone(),
                Some(epoch),
            )
        {
            debug!(fingerprint, "Invalidated during fetch, not caching");
        }
        self.pending.remove(&id);
        drop(guard);
        self.flights
            .remove_if(fingerprint, |_, lock| Arc::ptr_eq(lock, &flight));

        result.map(|value| Lookup {
            value,
            from_cache: false,
        })
    }

    /// Apply a write's cache effect. The table's entries are always
    /// invalidated first; write-through then stores the written record
    /// synchronously and write-behind stores it from a background task.
    pub fn on_write(
        self: &Arc<Self>,
        table: &str,
        policy: &CachePolicy,
        written: Option<(&str, Value)>,
    ) {
        self.invalidate(table);
        let Some((id, value)) = written else {
            return;
        };
        let key = record_key(table, id);
        let ttl = if policy.ttl.is_zero() {
            self.default_ttl()
        } else {
            policy.ttl
        };
        match policy.strategy {
            CacheStrategy::WriteThrough => {
                self.put(&key, table, value, ttl, policy.tags.clone());
            },
            CacheStrategy::WriteBehind => {
                let this = Arc::clone(self);
                let table = table.to_owned();
                let tags = policy.tags.clone();
                tokio::spawn(async move {
                    this.put(&key, &table, value, ttl, tags);
                });
            },
            CacheStrategy::None | CacheStrategy::ReadThrough | CacheStrategy::RefreshAhead => {},
        }
    }

    /// Attach a refresher to an entry stored with the refresh-ahead strategy.
    pub fn register_refresher(&self, fingerprint: &str, refresher: Refresher) {
        if self.entries.contains_key(fingerprint) {
            self.refreshers.insert(fingerprint.to_owned(), refresher);
        }
    }

    /// Reload every refresh-ahead entry that expires within the refresh
    /// window and was read during the window before that. Returns the number
    /// reloaded.
    pub async fn refresh_due(&self) -> usize {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.refresh_window_secs);
        let due: Vec<(CacheEntry, Refresher)> = self
            .refreshers
            .iter()
            .filter_map(|r| {
                let entry = self.entries.get(r.key())?;
                let expiring = entry
                    .expires_at
                    .is_some_and(|at| at.saturating_duration_since(now) <= window);
                let recently_read = entry
                    .last_read
                    .is_some_and(|t| now.saturating_duration_since(t) <= window);
                (expiring && recently_read).then(|| (entry.value().clone(), Arc::clone(r.value())))
            })
            .collect();
        if due.is_empty() {
            return 0;
        }

        let results = join_all(due.into_iter().map(|(entry, refresher)| async move {
            let epoch = self.epoch(&entry.table);
            let outcome = refresher().await;
            (entry, epoch, refresher, outcome)
        }))
        .await;

        let mut refreshed = 0_usize;
        for (entry, epoch, refresher, outcome) in results {
            match outcome {
                Ok(value) => {
                    let stored = self.store(
                        &entry.fingerprint,
                        &entry.table,
                        value,
                        entry.ttl,
                        entry.tags,
                        Some(epoch),
                    );
                    if stored {
                        self.refreshers.insert(entry.fingerprint, refresher);
                        refreshed = refreshed.saturating_add(1);
                    }
                },
                Err(error) => {
                    warn!(fingerprint = %entry.fingerprint, %error, "Refresh-ahead reload failed");
                },
            }
        }
        bump(&self.counters.refreshes, refreshed);
        refreshed
    }

    /// Drop expired entries. Returns the number dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0_usize;
        self.entries.retain(|_, e| {
            let expired = e.is_expired(now);
            if expired {
                dropped = dropped.saturating_add(1);
            }
            !expired
        });
        if dropped > 0 {
            self.refreshers.retain(|k, _| self.entries.contains_key(k));
            bump(&self.counters.evictions, dropped);
        }
        dropped
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            entries: u64::try_from(self.entries.len()).unwrap_or(u64::MAX),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
        }
    }

    /// Start the background task that runs refresh-ahead reloads and purges
    /// expired entries. Calling it while running is a no-op; after
    /// [`CacheLayer::stop`] it starts a fresh task.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut slot) = self.task.lock() else {
            return;
        };
        if slot.is_some() || !self.config.enabled {
            return;
        }
        let this = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let refreshed = this.refresh_due().await;
                        let purged = this.purge_expired();
                        if refreshed > 0 || purged > 0 {
                            debug!(refreshed, purged, "Cache maintenance pass");
                        }
                    }
                }
            }
        });
        *slot = Some((cancel, handle));
        info!(interval_secs = period.as_secs(), "Cache maintenance started");
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(&self) {
        let running = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache maintenance task ended abnormally");
            }
            info!("Cache maintenance stopped");
        }
    }

    /// Whether the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn peek(&self, fingerprint: &str) -> Option<Value> {
        let now = Instant::now();
        self.entries
            .get(fingerprint)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| (e.expires_at.is_none(), e.expires_at, e.inserted_at))
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.refreshers.remove(&key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> Arc<CacheLayer> {
        Arc::new(CacheLayer::new(CacheSection::default()))
    }

    fn read_through(secs: u64) -> CachePolicy {
        CachePolicy::new(CacheStrategy::ReadThrough, Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let c = cache();
        let calls = AtomicUsize::new(0);
        for expect_cached in [false, true] {
            let got = c
                .get_or_fetch("users:select:x", "users", &read_through(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(json!([1]))
                })
                .await
                .unwrap();
            assert_eq!(got.from_cache, expect_cached);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = c.stats();
        assert_eq!((stats.hits, stats.fetches), (1, 1));
    }

    #[tokio::test]
    async fn bypass_never_stores() {
        let c = cache();
        c.get_or_fetch("k", "t", &CachePolicy::bypass(), || async { Ok::<_, String>(json!(1)) })
            .await
            .unwrap();
        assert!(c.get("k").is_none());
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let c = cache();
        let err = c
            .get_or_fetch("k", "t", &read_through(60), || async { Err::<Value, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(c.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let c = cache();
        c.put("k", "t", json!(1), Duration::from_secs(5), vec![]);
        assert!(c.get("k").is_some());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(c.get("k").is_none());
        assert_eq!(c.stats().evictions, 1);
    }

    #[tokio::test]
    async fn invalidate_by_table_tag_prefix_and_key() {
        let c = cache();
        let ttl = Duration::from_secs(60);
        c.put("users:select:a", "users", json!(1), ttl, vec!["hot".into()]);
        c.put("users:select:b", "users", json!(2), ttl, vec![]);
        c.put("users_archive:select:c", "users_archive", json!(3), ttl, vec![]);
        c.put("orders:select:d", "orders", json!(4), ttl, vec!["hot".into()]);

        assert_eq!(c.invalidate("users"), 2);
        assert!(c.get("users_archive:select:c").is_some());
        assert_eq!(c.invalidate("hot"), 1);
        assert_eq!(c.invalidate("users_*"), 1);
        c.put("k", "t", json!(5), ttl, vec![]);
        assert_eq!(c.invalidate("k"), 1);
        assert_eq!(c.stats().entries, 0);
    }

    #[tokio::test]
    async fn capacity_evicts_soonest_expiring() {
        let c = Arc::new(CacheLayer::new(CacheSection {
            max_entries: 2,
            ..CacheSection::default()
        }));
        c.put("a", "t", json!(1), Duration::from_secs(10), vec![]);
        c.put("b", "t", json!(2), Duration::from_secs(100), vec![]);
        c.put("c", "t", json!(3), Duration::from_secs(100), vec![]);
        assert!(c.get("a").is_none());
        assert!(c.get("b").is_some() && c.get("c").is_some());
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let c = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = read_through(60);
        let tasks = (0..10).map(|_| {
            let c = Arc::clone(&c);
            let calls = Arc::clone(&calls);
            let policy = policy.clone();
            tokio::spawn(async move {
                c.get_or_fetch("k", "t", &policy, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, String>(json!("v"))
                })
                .await
                .unwrap()
                .value
            })
        });
        let values = join_all(tasks).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.into_iter().all(|v| v.unwrap() == json!("v")));
    }

    #[tokio::test]
    async fn invalidation_during_fetch_is_not_cached() {
        let c = cache();
        let inner = Arc::clone(&c);
        c.get_or_fetch("users:select:a", "users", &read_through(60), || async move {
            inner.invalidate("users");
            Ok::<_, String>(json!("stale"))
        })
        .await
        .unwrap();
        assert!(c.get("users:select:a").is_none());
    }

    #[tokio::test]
    async fn invalidating_another_table_during_fetch_still_caches() {
        let c = cache();
        let inner = Arc::clone(&c);
        c.get_or_fetch("users:select:a", "users", &read_through(60), || async move {
            inner.invalidate("orders");
            Ok::<_, String>(json!("fresh"))
        })
        .await
        .unwrap();
        assert_eq!(c.get("users:select:a"), Some(json!("fresh")));
    }

    #[tokio::test]
    async fn tag_invalidation_during_fetch_is_not_cached() {
        let c = cache();
        let inner = Arc::clone(&c);
        let policy = read_through(60).with_tags(vec!["hot".into()]);
        c.get_or_fetch("users:select:a", "users", &policy, || async move {
            inner.invalidate("hot");
            Ok::<_, String>(json!("stale"))
        })
        .await
        .unwrap();
        assert!(c.get("users:select:a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_restarts_after_stop() {
        let c = cache();
        c.start();
        assert!(c.is_running());
        c.stop().await;
        assert!(!c.is_running());

        c.start();
        assert!(c.is_running());
        c.put("k", "t", json!(1), Duration::from_secs(1), vec![]);
        tokio::time::sleep(Duration::from_secs(20)).await;
        // Purged by the restarted task, not by a read.
        assert_eq!(c.stats().entries, 0);
        assert_eq!(c.stats().misses, 0);
        c.stop().await;
    }

    #[tokio::test]
    async fn write_through_stores_record_after_invalidating() {
        let c = cache();
        let ttl = Duration::from_secs(60);
        c.put("users:select:a", "users", json!([]), ttl, vec![]);
        let policy = CachePolicy::new(CacheStrategy::WriteThrough, ttl);
        c.on_write("users", &policy, Some(("1", json!({"id": "1"}))));
        assert!(c.get("users:select:a").is_none());
        assert_eq!(c.get(&record_key("users", "1")), Some(json!({"id": "1"})));
    }

    #[tokio::test]
    async fn write_behind_stores_eventually() {
        let c = cache();
        let policy = CachePolicy::new(CacheStrategy::WriteBehind, Duration::from_secs(60));
        c.on_write("users", &policy, Some(("2", json!({"id": "2"}))));
        let key = record_key("users", "2");
        for _ in 0..50 {
            if c.get(&key).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("write-behind entry never appeared");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_ahead_reloads_recently_read_entries() {
        let c = Arc::new(CacheLayer::new(CacheSection {
            refresh_window_secs: 10,
            ..CacheSection::default()
        }));
        let policy = CachePolicy::new(CacheStrategy::RefreshAhead, Duration::from_secs(30));
        c.get_or_fetch("k", "t", &policy, || async { Ok::<_, String>(json!(1)) })
            .await
            .unwrap();
        let version = Arc::new(AtomicUsize::new(1));
        let v = Arc::clone(&version);
        c.register_refresher(
            "k",
            Arc::new(move || {
                let n = v.fetch_add(1, Ordering::SeqCst).saturating_add(1);
                async move { Ok::<_, String>(json!(n)) }.boxed()
            }),
        );

        // Not expiring yet.
        assert_eq!(c.refresh_due().await, 0);
        tokio::time::advance(Duration::from_secs(22)).await;
        // Expiring but never read.
        assert_eq!(c.refresh_due().await, 0);
        assert_eq!(c.get("k"), Some(json!(1)));
        assert_eq!(c.refresh_due().await, 1);
        assert_eq!(c.get("k"), Some(json!(2)));
        tokio::time::advance(Duration::from_secs(25)).await;
        // Fresh TTL after the reload.
        assert!(c.get("k").is_some());
    }
}
