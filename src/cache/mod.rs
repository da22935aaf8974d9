//! Request-keyed synchronization cache.
//!
//! Each key owns one `CacheEntry`. At most one fetch per key is counted as
//! in flight; concurrent callers join it through a watch channel. Every fetch
//! carries the entry generation it started under and is discarded on commit
//! if the entry was invalidated in the meantime.

use log::{debug, info};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Error;
use crate::metrics;

pub mod entry;
pub mod retry;

pub use entry::{fetcher, CacheEntry, CacheValue, EntryState, Fetcher, Resolved};
pub use retry::{CachePolicy, FetchOutcome, RetryPolicy};

use entry::{detached, InFlight};

type Slot<V> = Arc<Mutex<CacheEntry<V>>>;
type Done<V> = watch::Receiver<Option<Resolved<V>>>;

pub struct SyncCache<K, V> {
    name: String,
    policy: CachePolicy,
    entries: Arc<RwLock<HashMap<K, Slot<V>>>>,
    changes: Arc<watch::Sender<u64>>,
}

impl<K, V> SyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: CacheValue,
{
    pub fn new(name: impl Into<String>, policy: CachePolicy) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            name: name.into(),
            policy,
            entries: Arc::new(RwLock::new(HashMap::new())),
            changes: Arc::new(changes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Ticks on every entry change: fetch start, commit, invalidation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Returns cached data for `key`, fetching as the entry's state requires.
    ///
    /// Waits only when the entry has no data yet. Stale data is returned at
    /// once while a single background refresh runs. The entry counts as
    /// observed from here on.
    pub async fn resolve(&self, key: K, fetcher: Fetcher<V>) -> Resolved<V> {
        let slot = self.slot(&key, &fetcher).await;
        let pending = {
            let mut entry = slot.lock().await;
            entry.fetcher = fetcher;
            let now = Instant::now();
            entry.touch(now);

            if let Some(in_flight) = &entry.in_flight {
                metrics::CACHE_JOINED_FETCHES.inc();
                if entry.data.is_some() {
                    return entry.snapshot(now, &self.policy);
                }
                debug!("[{}] joining in-flight fetch for {:?}", self.name, key);
                in_flight.done.clone()
            } else if entry.state(now, &self.policy) == EntryState::Fresh {
                metrics::CACHE_HITS.inc();
                return entry.snapshot(now, &self.policy);
            } else {
                // A fresh retry sequence. The previous error is served with
                // the stale data until this fetch settles.
                entry.retry_count = 0;
                let done = self.start_fetch(&slot, &mut entry, &key);
                if entry.data.is_some() {
                    return entry.snapshot(now, &self.policy);
                }
                done
            }
        };
        wait_for_outcome(pending).await
    }

    /// Current snapshot without triggering any fetch.
    pub async fn peek(&self, key: &K) -> Option<Resolved<V>> {
        let slot = self.entries.read().await.get(key).cloned()?;
        let entry = slot.lock().await;
        Some(entry.snapshot(Instant::now(), &self.policy))
    }

    pub async fn state(&self, key: &K) -> Option<EntryState> {
        self.peek(key).await.map(|r| r.state)
    }

    /// Forces matching entries stale. In-flight fetches keep running but their
    /// results will be discarded and new callers no longer join them.
    pub async fn invalidate<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let slots: Vec<Slot<V>> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(_, slot)| slot.clone())
            .collect();

        for slot in &slots {
            slot.lock().await.invalidate();
        }
        if !slots.is_empty() {
            info!("[{}] invalidated {} entries", self.name, slots.len());
            self.notify();
        }
        slots.len()
    }

    pub async fn invalidate_all(&self) -> usize {
        self.invalidate(|_| true).await
    }

    /// Starts a background refresh for `key` unless one is already running.
    /// Returns whether a fetch was started.
    pub async fn mark_refresh_due(&self, key: &K) -> bool {
        let Some(slot) = self.entries.read().await.get(key).cloned() else {
            return false;
        };
        let mut entry = slot.lock().await;
        if entry.in_flight.is_some() {
            return false;
        }
        entry.touch(Instant::now());
        self.start_fetch(&slot, &mut entry, key);
        true
    }

    /// Marks the entries matching `predicate` observed and every other entry
    /// unobserved. Unobserved entries are not polled and are dropped once idle
    /// for `gc_time`. Returns the number of observed entries.
    pub async fn set_observed<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let now = Instant::now();
        let mut observed = 0;
        for (key, slot) in self.slots().await {
            let mut entry = slot.lock().await;
            if predicate(&key) {
                entry.touch(now);
                observed += 1;
            } else {
                entry.observed = false;
            }
        }
        observed
    }

    /// One polling pass: refreshes every observed entry whose refetch interval
    /// elapsed and drops expired unobserved ones.
    pub async fn refresh_due(&self) -> usize {
        let now = Instant::now();
        let mut started = 0;
        let mut expired = Vec::new();
        for (key, slot) in self.slots().await {
            let mut entry = slot.lock().await;
            if entry.collectable(now, &self.policy) {
                expired.push(key);
            } else if entry.poll_due(now, &self.policy) {
                debug!("[{}] polling refresh for {:?}", self.name, key);
                self.start_fetch(&slot, &mut entry, &key);
                started += 1;
            }
        }

        if !expired.is_empty() {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            for key in &expired {
                // Skip entries picked up again since the scan.
                let still_expired = entries
                    .get(key)
                    .and_then(|slot| slot.try_lock().ok().map(|e| e.collectable(now, &self.policy)))
                    .unwrap_or(false);
                if still_expired {
                    entries.remove(key);
                }
            }
            let dropped = before - entries.len();
            drop(entries);
            if dropped > 0 {
                debug!("[{}] dropped {} idle entries", self.name, dropped);
                self.notify();
            }
        }
        started
    }

    /// Runs `refresh_due` every `tick` until the handle is aborted.
    pub fn spawn_poller(self: &Arc<Self>, tick: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.refresh_due().await;
            }
        })
    }

    pub async fn evict(&self, key: &K) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.notify();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<K> {
        self.entries.read().await.keys().cloned().collect()
    }

    async fn slots(&self) -> Vec<(K, Slot<V>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect()
    }

    async fn slot(&self, key: &K, fetcher: &Fetcher<V>) -> Slot<V> {
        if let Some(slot) = self.entries.read().await.get(key) {
            return slot.clone();
        }
        self.entries
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new(fetcher.clone()))))
            .clone()
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Spawns the fetch task for an entry whose lock the caller holds.
    fn start_fetch(&self, slot: &Slot<V>, entry: &mut CacheEntry<V>, key: &K) -> Done<V> {
        let generation = entry.generation;
        let (tx, rx) = watch::channel(None);
        entry.in_flight = Some(InFlight { generation, done: rx.clone() });

        let fetcher = entry.fetcher.clone();
        let retry = self.policy.retry;
        let policy = self.policy;
        let slot = Arc::clone(slot);
        let changes = Arc::clone(&self.changes);
        let label = format!("{}:{:?}", self.name, key);

        tokio::spawn(async move {
            let outcome = retry.run(&label, || fetcher()).await;
            let resolved = {
                let mut entry = slot.lock().await;
                let now = Instant::now();
                if entry.commit(generation, outcome.clone(), now) {
                    entry.snapshot(now, &policy)
                } else {
                    debug!(
                        "Discarding superseded fetch for {} (generation {} < {})",
                        label, generation, entry.generation
                    );
                    detached(outcome)
                }
            };
            let _ = tx.send(Some(resolved));
            changes.send_modify(|n| *n = n.wrapping_add(1));
        });

        self.notify();
        rx
    }
}

async fn wait_for_outcome<V: Clone>(mut done: Done<V>) -> Resolved<V> {
    loop {
        let current = done.borrow().clone();
        if let Some(resolved) = current {
            return resolved;
        }
        if done.changed().await.is_err() {
            let last = done.borrow().clone();
            return last.unwrap_or_else(|| Resolved {
                data: None,
                state: EntryState::Failed,
                error: Some(Error::Internal("fetch task ended without a result".into())),
                is_fetching: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sourced;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Value = Sourced<u32>;

    fn quick_policy() -> CachePolicy {
        CachePolicy {
            stale_time: Duration::from_secs(30),
            refetch_interval: Some(Duration::from_secs(60)),
            gc_time: Duration::from_secs(300),
            retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_secs(1),
                attempt_timeout: Duration::from_secs(5),
            },
        }
    }

    /// Counts calls and answers with the call number after `delay`.
    fn counting(calls: Arc<AtomicU32>, delay: Duration) -> Fetcher<Value> {
        fetcher(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(Sourced::live(n, "stub"))
            }
        })
    }

    fn failing(calls: Arc<AtomicU32>) -> Fetcher<Value> {
        fetcher(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::NetworkFailure("upstream down".into()))
            }
        })
    }

    fn fixed(value: u32, delay: Duration) -> Fetcher<Value> {
        fetcher(move || async move {
            tokio::time::sleep(delay).await;
            Ok(Sourced::live(value, "stub"))
        })
    }

    /// Lets spawned fetch tasks run to completion under paused time.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_share_one_fetch() {
        let cache = Arc::new(SyncCache::new("test", quick_policy()));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let f = counting(calls.clone(), Duration::from_millis(200));
            handles.push(tokio::spawn(async move { cache.resolve("k", f).await }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for r in &results {
            assert_eq!(r.data.as_ref().map(|d| d.value), Some(1));
            assert!(r.error.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_served_without_fetch() {
        let cache = SyncCache::new("test", quick_policy());
        let calls = Arc::new(AtomicU32::new(0));

        let first = cache.resolve("k", counting(calls.clone(), Duration::ZERO)).await;
        assert_eq!(first.state, EntryState::Fresh);

        tokio::time::advance(Duration::from_secs(10)).await;
        let second = cache.resolve("k", counting(calls.clone(), Duration::ZERO)).await;
        assert_eq!(second.state, EntryState::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_refreshes_once_in_background() {
        let cache = SyncCache::new("test", quick_policy());
        let calls = Arc::new(AtomicU32::new(0));
        let slow = Duration::from_secs(2);

        cache.resolve("k", counting(calls.clone(), Duration::ZERO)).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let stale = cache.resolve("k", counting(calls.clone(), slow)).await;
        assert_eq!(stale.data.as_ref().map(|d| d.value), Some(1));
        assert!(stale.is_fetching);
        assert_eq!(stale.state, EntryState::Refreshing);

        let again = cache.resolve("k", counting(calls.clone(), slow)).await;
        assert_eq!(again.data.as_ref().map(|d| d.value), Some(1));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        let refreshed = cache.peek(&"k").await.unwrap();
        assert_eq!(refreshed.data.as_ref().map(|d| d.value), Some(2));
        assert_eq!(refreshed.state, EntryState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_serve_stale_data_with_error() {
        let cache = SyncCache::new("test", quick_policy());
        let calls = Arc::new(AtomicU32::new(0));

        cache.resolve("k", counting(Arc::new(AtomicU32::new(0)), Duration::ZERO)).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.resolve("k", failing(calls.clone())).await;

        // Three attempts with two one-second delays between them.
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.state(&"k").await, Some(EntryState::Failed));

        // Resolving again serves the last good data together with the error
        // while a new retry sequence runs.
        let resolved = cache.resolve("k", failing(calls.clone())).await;
        assert_eq!(resolved.data.as_ref().map(|d| d.value), Some(1));
        assert!(matches!(resolved.error, Some(Error::NetworkFailure(_))));
        assert!(resolved.is_fetching);

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        let failed = cache.peek(&"k").await.unwrap();
        assert_eq!(failed.state, EntryState::Failed);
        assert_eq!(failed.data.as_ref().map(|d| d.value), Some(1));
        assert!(failed.error.is_some());

        // A successful refresh clears the error.
        cache.resolve("k", counting(Arc::new(AtomicU32::new(0)), Duration::ZERO)).await;
        settle().await;
        let recovered = cache.peek(&"k").await.unwrap();
        assert_eq!(recovered.state, EntryState::Fresh);
        assert!(recovered.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_load_failure_surfaces_error() {
        let cache = SyncCache::new("test", quick_policy());
        let calls = Arc::new(AtomicU32::new(0));

        let resolved = cache.resolve("k", failing(calls.clone())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(resolved.state, EntryState::Failed);
        assert!(resolved.data.is_none());
        assert!(resolved.error.is_some());

        // The next explicit resolve tries again; success clears the error.
        let ok = cache.resolve("k", counting(Arc::new(AtomicU32::new(0)), Duration::ZERO)).await;
        assert_eq!(ok.state, EntryState::Fresh);
        assert!(ok.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch_of_fresh_entry() {
        let cache = SyncCache::new("test", quick_policy());
        let calls = Arc::new(AtomicU32::new(0));

        cache.resolve("k", counting(calls.clone(), Duration::ZERO)).await;
        assert_eq!(cache.state(&"k").await, Some(EntryState::Fresh));

        assert_eq!(cache.invalidate_all().await, 1);
        assert_eq!(cache.state(&"k").await, Some(EntryState::Stale));

        cache.resolve("k", counting(calls.clone(), Duration::ZERO)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let refreshed = cache.peek(&"k").await.unwrap();
        assert_eq!(refreshed.data.as_ref().map(|d| d.value), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_fetch_is_discarded() {
        let cache = SyncCache::new("test", quick_policy());

        cache.resolve("k", fixed(1, Duration::ZERO)).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        // A slow refresh starts, then the entry is invalidated.
        cache.resolve("k", fixed(20, Duration::from_secs(10))).await;
        cache.invalidate(|k| *k == "k").await;

        // The replacement refresh finishes first.
        cache.resolve("k", fixed(30, Duration::from_secs(1))).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(cache.peek(&"k").await.unwrap().data.map(|d| d.value), Some(30));

        // The superseded fetch completes later and must not overwrite.
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        let current = cache.peek(&"k").await.unwrap();
        assert_eq!(current.data.map(|d| d.value), Some(30));
        assert_eq!(current.state, EntryState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_refreshes_after_interval() {
        let cache = Arc::new(SyncCache::new("test", quick_policy()));
        let calls = Arc::new(AtomicU32::new(0));
        cache.resolve("k", counting(calls.clone(), Duration::ZERO)).await;

        let poller = cache.spawn_poller(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        poller.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unobserved_entries_are_not_polled_and_expire() {
        let cache = Arc::new(SyncCache::new("test", quick_policy()));
        let calls = Arc::new(AtomicU32::new(0));
        for key in ["a", "b", "c", "d", "e"] {
            cache.resolve(key, counting(calls.clone(), Duration::ZERO)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(cache.set_observed(|k| *k == "a").await, 1);

        let poller = cache.spawn_poller(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(10 * 60 - 30)).await;
        settle().await;
        poller.abort();

        // Only "a" kept polling, once a minute.
        assert_eq!(calls.load(Ordering::SeqCst), 5 + 9);
        assert_eq!(cache.keys().await, vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_refresh_due_is_deduplicated() {
        let cache = SyncCache::new("test", quick_policy());
        let calls = Arc::new(AtomicU32::new(0));
        cache.resolve("k", counting(calls.clone(), Duration::from_secs(1))).await;

        // The stored fetcher sleeps a second, so the first refresh is still running.
        assert!(cache.mark_refresh_due(&"k").await);
        assert!(!cache.mark_refresh_due(&"k").await);
        assert!(!cache.mark_refresh_due(&"missing").await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_reaches_terminal_state() {
        let cache = SyncCache::new("test", quick_policy());
        let hung: Fetcher<Value> = fetcher(|| async {
            std::future::pending::<()>().await;
            Ok(Sourced::live(0u32, "never"))
        });

        let resolved = cache.resolve("k", hung).await;
        assert_eq!(resolved.state, EntryState::Failed);
        assert!(!resolved.is_fetching);
        assert!(matches!(resolved.error, Some(Error::NetworkFailure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_are_broadcast() {
        let cache = SyncCache::new("test", quick_policy());
        let mut changes = cache.subscribe();
        cache.resolve("k", counting(Arc::new(AtomicU32::new(0)), Duration::ZERO)).await;
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        cache.evict(&"k").await;
        assert!(changes.has_changed().unwrap());
        assert!(cache.is_empty().await);
    }
}
