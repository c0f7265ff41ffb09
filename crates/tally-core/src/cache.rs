//! Request-keyed resource cache.
//!
//! Entries are addressed by a hierarchical [`QueryKey`]. Loads for the same key
//! are deduplicated while in flight, successful values are served without a
//! round-trip for the freshness window, and [`ResourceCache::invalidate`] marks
//! every entry under a key prefix stale so the next read refetches.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tally_shared::{Category, Page, Todo, TodoQuery};
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::error::{Result, TallyError};

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Key factories. Lists and details live under their resource root so a
/// single prefix can invalidate either or both.
pub mod keys {
    use super::*;

    pub fn todos() -> QueryKey {
        QueryKey::new(["todos"])
    }

    pub fn todo_lists() -> QueryKey {
        todos().child("list")
    }

    pub fn todo_list(query: &TodoQuery) -> QueryKey {
        todo_lists().child(query.canonical())
    }

    /// Whole collection, used by client-side filtering.
    pub fn todo_list_all() -> QueryKey {
        todo_lists().child("all")
    }

    pub fn todo_details() -> QueryKey {
        todos().child("detail")
    }

    pub fn todo_detail(id: i64) -> QueryKey {
        todo_details().child(id.to_string())
    }

    pub fn categories() -> QueryKey {
        QueryKey::new(["categories"])
    }

    pub fn category_lists() -> QueryKey {
        categories().child("list")
    }

    pub fn category_list() -> QueryKey {
        category_lists()
    }

    pub fn category_details() -> QueryKey {
        categories().child("detail")
    }

    pub fn category_detail(id: i64) -> QueryKey {
        category_details().child(id.to_string())
    }
}

/// What a reader sees for a key.
#[derive(Debug, Clone)]
pub enum CacheState<V> {
    /// Never fetched.
    Absent,
    /// A load is in flight; `previous` is the last good value, if any.
    Pending { previous: Option<Arc<V>> },
    Ready {
        data: Arc<V>,
        fetched_at: Instant,
        stale: bool,
    },
    /// The last load failed; the last good value stays available.
    Failed {
        error: TallyError,
        previous: Option<Arc<V>>,
    },
}

impl<V> CacheState<V> {
    pub fn data(&self) -> Option<&Arc<V>> {
        match self {
            CacheState::Absent => None,
            CacheState::Pending { previous } | CacheState::Failed { previous, .. } => {
                previous.as_ref()
            }
            CacheState::Ready { data, .. } => Some(data),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, CacheState::Pending { .. })
    }

    pub fn error(&self) -> Option<&TallyError> {
        match self {
            CacheState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

type InFlight<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

struct Entry<V> {
    data: Option<Arc<V>>,
    error: Option<TallyError>,
    fetched_at: Option<Instant>,
    stale: bool,
    generation: u64,
    in_flight: Option<InFlight<V>>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            fetched_at: None,
            stale: false,
            generation: 0,
            in_flight: None,
        }
    }
}

impl<V> Entry<V> {
    fn fresh_data(&self, now: Instant, window: Duration) -> Option<Arc<V>> {
        if self.stale || self.error.is_some() {
            return None;
        }
        let fetched_at = self.fetched_at?;
        if now.saturating_duration_since(fetched_at) >= window {
            return None;
        }
        self.data.clone()
    }
}

struct Inner<V> {
    entries: HashMap<QueryKey, Entry<V>>,
    freshness: Duration,
    loads: u64,
}

/// Cache for one value type. Cloning shares the underlying entries.
pub struct ResourceCache<V> {
    name: &'static str,
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for ResourceCache<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> ResourceCache<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(name: &'static str, freshness: Duration) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                freshness,
                loads: 0,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set_freshness_window(&self, window: Duration) {
        debug!(cache = self.name, window_ms = window.as_millis() as u64, "freshness window set");
        self.inner.lock().freshness = window;
    }

    pub fn freshness_window(&self) -> Duration {
        self.inner.lock().freshness
    }

    /// Number of loader invocations so far. Joins and fresh hits do not count.
    pub fn load_count(&self) -> u64 {
        self.inner.lock().loads
    }

    pub fn get(&self, key: &QueryKey) -> CacheState<V> {
        let inner = self.inner.lock();
        let Some(entry) = inner.entries.get(key) else {
            return CacheState::Absent;
        };

        if entry.in_flight.is_some() {
            return CacheState::Pending {
                previous: entry.data.clone(),
            };
        }
        if let Some(error) = entry.error.clone() {
            return CacheState::Failed {
                error,
                previous: entry.data.clone(),
            };
        }
        match (entry.data.clone(), entry.fetched_at) {
            (Some(data), Some(fetched_at)) => {
                let expired = Instant::now().saturating_duration_since(fetched_at) >= inner.freshness;
                CacheState::Ready {
                    data,
                    fetched_at,
                    stale: entry.stale || expired,
                }
            }
            _ => CacheState::Absent,
        }
    }

    /// Returns the cached value when fresh, joins an identical in-flight load,
    /// or starts `loader`. The load runs as its own task and records its result
    /// in the cache, so it completes even when every caller has gone away.
    #[instrument(skip(self, loader), fields(cache = self.name, key = %key))]
    pub async fn fetch<F, Fut>(&self, key: QueryKey, loader: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let window = inner.freshness;
            let entry = inner.entries.entry(key.clone()).or_default();

            if let Some(data) = entry.fresh_data(Instant::now(), window) {
                trace!("fresh cache hit");
                return Ok(data);
            }

            match entry.in_flight.clone() {
                Some(in_flight) => {
                    debug!("joining in-flight load");
                    in_flight
                }
                None => {
                    let generation = entry.generation;
                    let load = loader();
                    let cache = Arc::clone(&self.inner);
                    let name = self.name;
                    let load_key = key.clone();
                    let task = tokio::spawn(async move {
                        let result = load.await.map(Arc::new);
                        record_result(&cache, name, &load_key, generation, &result);
                        result
                    });
                    let shared = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                            Err(_) => Err(TallyError::Cancelled),
                        }
                    }
                    .boxed()
                    .shared();

                    entry.in_flight = Some(shared.clone());
                    inner.loads += 1;
                    debug!(generation, "starting load");
                    shared
                }
            }
        };

        shared.await
    }

    /// Marks every entry under `prefix` stale and detaches in-flight loads so
    /// the next read starts a new one. Returns the number of entries touched.
    #[instrument(skip(self), fields(cache = self.name, prefix = %prefix))]
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut inner = self.inner.lock();
        let mut touched = 0;
        for (key, entry) in inner.entries.iter_mut() {
            if key.starts_with(prefix) {
                entry.stale = true;
                entry.generation += 1;
                entry.in_flight = None;
                touched += 1;
            }
        }
        debug!(touched, "invalidated entries");
        touched
    }

    /// Drops entries under `prefix` entirely.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        before - inner.entries.len()
    }
}

fn record_result<V>(
    cache: &Mutex<Inner<V>>,
    name: &'static str,
    key: &QueryKey,
    generation: u64,
    result: &Result<Arc<V>>,
) {
    let mut inner = cache.lock();
    let Some(entry) = inner.entries.get_mut(key) else {
        return;
    };

    if entry.generation != generation {
        debug!(cache = name, key = %key, generation, current = entry.generation, "discarding superseded load");
        return;
    }

    entry.in_flight = None;
    match result {
        Ok(data) => {
            entry.data = Some(Arc::clone(data));
            entry.error = None;
            entry.fetched_at = Some(Instant::now());
            entry.stale = false;
        }
        Err(err) => {
            debug!(cache = name, key = %key, error = %err, "load failed; keeping previous value");
            entry.error = Some(err.clone());
        }
    }
}

/// The caches the store reads through, one per value type.
#[derive(Clone)]
pub struct Caches {
    pub todo_lists: ResourceCache<Page<Todo>>,
    pub todo_details: ResourceCache<Todo>,
    pub category_lists: ResourceCache<Vec<Category>>,
    pub category_details: ResourceCache<Category>,
}

impl Caches {
    pub fn new(freshness: Duration) -> Self {
        Self {
            todo_lists: ResourceCache::new("todo_lists", freshness),
            todo_details: ResourceCache::new("todo_details", freshness),
            category_lists: ResourceCache::new("category_lists", freshness),
            category_details: ResourceCache::new("category_details", freshness),
        }
    }

    pub fn set_freshness_window(&self, window: Duration) {
        self.todo_lists.set_freshness_window(window);
        self.todo_details.set_freshness_window(window);
        self.category_lists.set_freshness_window(window);
        self.category_details.set_freshness_window(window);
    }

    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.todo_lists.invalidate(prefix)
            + self.todo_details.invalidate(prefix)
            + self.category_lists.invalidate(prefix)
            + self.category_details.invalidate(prefix)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_loader(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[test]
    fn key_prefix_matching_is_by_segment() {
        let list = keys::todo_list(&TodoQuery::new(1, 10));
        assert!(list.starts_with(&keys::todos()));
        assert!(list.starts_with(&keys::todo_lists()));
        assert!(!list.starts_with(&keys::todo_details()));
        assert!(!QueryKey::new(["todosx"]).starts_with(&keys::todos()));
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_load() {
        let cache: ResourceCache<u32> = ResourceCache::new("test", DEFAULT_FRESHNESS);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new(["numbers"]);

        let (a, b) = tokio::join!(
            cache.fetch(key.clone(), counting_loader(&calls, 7)),
            cache.fetch(key.clone(), counting_loader(&calls, 8)),
        );

        let a = a.expect("first reader");
        let b = b.expect("second reader");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*a, 7);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.load_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_window_and_invalidation() {
        let cache: ResourceCache<u32> = ResourceCache::new("test", Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new(["todos", "list", "page=1"]);

        cache.fetch(key.clone(), counting_loader(&calls, 1)).await.expect("load");
        tokio::time::advance(Duration::from_secs(30)).await;
        let hit = cache.fetch(key.clone(), counting_loader(&calls, 2)).await.expect("hit");
        assert_eq!(*hit, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.invalidate(&keys::todos()), 1);
        assert!(matches!(cache.get(&key), CacheState::Ready { stale: true, .. }));
        let refetched = cache.fetch(key.clone(), counting_loader(&calls, 3)).await.expect("refetch");
        assert_eq!(*refetched, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        let expired = cache.fetch(key.clone(), counting_loader(&calls, 4)).await.expect("expired");
        assert_eq!(*expired, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_value() {
        let cache: ResourceCache<u32> = ResourceCache::new("test", Duration::ZERO);
        let key = QueryKey::new(["categories", "list"]);

        assert!(matches!(cache.get(&key), CacheState::Absent));
        cache.fetch(key.clone(), || async { Ok(5) }).await.expect("first load");

        let err = cache
            .fetch(key.clone(), || async { Err(TallyError::network()) })
            .await
            .expect_err("second load fails");
        assert_eq!(err, TallyError::network());

        match cache.get(&key) {
            CacheState::Failed { error, previous } => {
                assert_eq!(error, TallyError::network());
                assert_eq!(previous.as_deref(), Some(&5));
            }
            other => panic!("expected failed state, got {other:?}"),
        }

        let recovered = cache.fetch(key.clone(), || async { Ok(6) }).await.expect("retry");
        assert_eq!(*recovered, 6);
        assert!(matches!(cache.get(&key), CacheState::Ready { .. }));
    }

    #[tokio::test]
    async fn load_completes_after_its_caller_is_dropped() {
        let cache: ResourceCache<u32> = ResourceCache::new("test", DEFAULT_FRESHNESS);
        let key = QueryKey::new(["categories", "list"]);
        let gate = Arc::new(tokio::sync::Notify::new());

        let started = {
            let gate = Arc::clone(&gate);
            cache.fetch(key.clone(), move || async move {
                gate.notified().await;
                Ok(9)
            })
        };
        let abandoned = tokio::time::timeout(Duration::from_millis(10), started).await;
        assert!(abandoned.is_err(), "caller gave up while the load was gated");
        assert!(cache.get(&key).is_loading());

        gate.notify_one();
        for _ in 0..10 {
            if !cache.get(&key).is_loading() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(cache.get(&key).data().map(|v| **v), Some(9));
        assert_eq!(cache.load_count(), 1);
    }

    #[tokio::test]
    async fn load_superseded_by_invalidation_is_not_recorded() {
        let cache: ResourceCache<u32> = ResourceCache::new("test", DEFAULT_FRESHNESS);
        let key = QueryKey::new(["todos", "detail", "1"]);
        let gate = Arc::new(tokio::sync::Notify::new());

        let slow = {
            let gate = Arc::clone(&gate);
            cache.fetch(key.clone(), move || async move {
                gate.notified().await;
                Ok(1)
            })
        };
        let invalidate_then_reload = async {
            tokio::task::yield_now().await;
            assert!(cache.get(&key).is_loading());
            cache.invalidate(&keys::todo_details());
            let fresh = cache.fetch(key.clone(), || async { Ok(2) }).await;
            gate.notify_one();
            fresh
        };

        let (old, new) = tokio::join!(slow, invalidate_then_reload);
        assert_eq!(*old.expect("old load still resolves for its caller"), 1);
        assert_eq!(*new.expect("new load"), 2);
        assert_eq!(cache.get(&key).data().map(|v| **v), Some(2));
    }
}
