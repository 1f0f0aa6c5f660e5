//! The query cache: key-addressed results, request deduplication, staleness,
//! and subscriber fan-out.
//!
//! Inspired by TanStack Query. Callers subscribe with a [`QueryKey`] and an
//! async fetcher; the cache guarantees at most one in-flight fetch per key
//! and delivers every settlement to all subscribers of that key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::entry::{Entry, ErasedData, QueryOptions, QuerySnapshot, QueryStatus, Subscriber};
use super::subscription::Subscription;
use crate::error::FetchError;
use crate::key::QueryKey;

/// Type-erased fetcher stored per entry, so `invalidate` can refetch without
/// a subscription in hand.
pub(crate) type ErasedFetcher =
  Arc<dyn Fn() -> BoxFuture<'static, Result<ErasedData, FetchError>> + Send + Sync>;

struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  /// Source of subscriber ids and fetch sequence numbers.
  next_seq: AtomicU64,
  grace_period: Duration,
}

/// In-memory cache of remote query results.
///
/// Cloning is cheap and clones share the same cache. All bookkeeping is
/// synchronous under one lock; only the fetcher future itself runs on a
/// spawned task, so starting a fetch requires a tokio runtime.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    Self::with_grace_period(Duration::from_secs(5 * 60))
  }

  /// Create a cache that retains entries with no subscribers for
  /// `grace_period` before evicting them.
  pub fn with_grace_period(grace_period: Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        next_seq: AtomicU64::new(0),
        grace_period,
      }),
    }
  }

  /// Register a subscriber for `key`.
  ///
  /// If the entry is missing or stale, no fetch is in flight, and at least
  /// one enabled subscriber is present, exactly one fetch starts. Concurrent
  /// subscriptions sharing a key observe the same resolved `Arc` value or
  /// the same error.
  ///
  /// All subscriptions of one key must use the same result type `T`.
  pub fn subscribe<T, F, Fut>(
    &self,
    key: QueryKey,
    fetcher: F,
    options: QueryOptions,
  ) -> Subscription<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let erased: ErasedFetcher = Arc::new(move || {
      let fut = fetcher();
      Box::pin(async move { fut.await.map(|value| Arc::new(value) as ErasedData) })
    });

    let (id, rx) = self.subscribe_erased(key.clone(), erased, options);
    Subscription::new(self.clone(), key, id, rx)
  }

  fn subscribe_erased(
    &self,
    key: QueryKey,
    fetcher: ErasedFetcher,
    options: QueryOptions,
  ) -> (u64, mpsc::UnboundedReceiver<()>) {
    let mut entries = self.lock_entries();
    self.sweep(&mut entries);

    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| Entry::new(options.stale_after));
    entry.stale_after = options.stale_after;
    entry.fetcher = Some(fetcher);
    entry.vacated_at = None;

    let id = self.next_seq();
    let (tx, rx) = mpsc::unbounded_channel();
    entry.subscribers.push(Subscriber {
      id,
      enabled: options.enabled,
      tx: tx.clone(),
    });

    if !entry.in_flight && entry.is_stale() && entry.has_enabled_subscriber() {
      self.start_fetch(&key, entry);
    }

    // An entry that is already settled and needed no fetch still notifies
    // the new subscriber, so an immediate `changed().await` observes the
    // current state instead of waiting for a settlement that never comes.
    if !entry.in_flight && entry.status != QueryStatus::Pending {
      let _ = tx.send(());
    }

    (id, rx)
  }

  /// Mark `key` stale. With at least one enabled subscriber this starts a
  /// new fetch immediately, superseding any fetch still in flight; with none
  /// it only marks.
  pub fn invalidate(&self, key: &QueryKey) {
    let mut entries = self.lock_entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };

    entry.fetched_at = None;
    // A fetch already in flight predates this invalidation; its settlement
    // must not clear the stale mark.
    entry.stale_seq = entry.fetch_seq;
    if entry.has_enabled_subscriber() {
      self.start_fetch(key, entry);
    } else {
      debug!(key = %key, "invalidated entry with no active subscriber");
    }
  }

  /// Synchronous read of the entry for `key`. No side effects.
  pub fn snapshot<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QuerySnapshot<T>> {
    let entries = self.lock_entries();
    entries.get(key).map(|entry| entry.snapshot())
  }

  /// Remove one subscriber. Never cancels in-flight work: a late settlement
  /// is still cached for future subscribers.
  pub(crate) fn unsubscribe(&self, key: &QueryKey, id: u64) {
    let mut entries = self.lock_entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };

    entry.subscribers.retain(|s| s.id != id);
    if !entry.subscribers.is_empty() {
      return;
    }
    entry.vacated_at = Some(Instant::now());
    drop(entries);

    // Arm the eviction timer when a runtime is available; otherwise the
    // sweep on a later cache operation reaps the entry.
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
      let cache = self.clone();
      let key = key.clone();
      let grace = self.inner.grace_period;
      handle.spawn(async move {
        tokio::time::sleep(grace).await;
        cache.evict_if_vacated(&key);
      });
    }
  }

  fn start_fetch(&self, key: &QueryKey, entry: &mut Entry) {
    let Some(fetcher) = entry.fetcher.clone() else {
      return;
    };

    let seq = self.next_seq();
    entry.fetch_seq = seq;
    entry.in_flight = true;
    // Prior data is retained so consumers can show it while refreshing.
    entry.status = QueryStatus::Pending;
    debug!(key = %key, seq, "fetch started");

    let fut = fetcher();
    let cache = self.clone();
    let key = key.clone();
    tokio::spawn(async move {
      let result = fut.await;
      cache.settle(&key, seq, result);
    });
  }

  fn settle(&self, key: &QueryKey, seq: u64, result: Result<ErasedData, FetchError>) {
    let mut entries = self.lock_entries();
    let Some(entry) = entries.get_mut(key) else {
      debug!(key = %key, seq, "dropping settlement for evicted entry");
      return;
    };

    // Only the most recently started fetch for a key may settle the entry.
    if entry.fetch_seq != seq {
      debug!(key = %key, seq, current = entry.fetch_seq, "discarding superseded fetch result");
      return;
    }

    entry.in_flight = false;
    // A result from a fetch started before the last invalidation is stored
    // but the entry stays stale.
    entry.fetched_at = if seq > entry.stale_seq {
      Some(Instant::now())
    } else {
      None
    };
    match result {
      Ok(data) => {
        entry.data = Some(data);
        entry.error = None;
        entry.status = QueryStatus::Success;
        debug!(key = %key, seq, "fetch resolved");
      }
      Err(error) => {
        warn!(key = %key, seq, %error, "fetch failed");
        entry.error = Some(error);
        entry.status = QueryStatus::Error;
        // Previously resolved data is kept untouched.
      }
    }

    // Notify in registration order, still under the lock, so every current
    // subscriber observes this settlement before any later operation on the
    // key is processed.
    for subscriber in &entry.subscribers {
      let _ = subscriber.tx.send(());
    }
  }

  fn evict_if_vacated(&self, key: &QueryKey) {
    let mut entries = self.lock_entries();
    let expired = entries.get(key).is_some_and(|e| {
      e.subscribers.is_empty()
        && e
          .vacated_at
          .is_some_and(|at| at.elapsed() >= self.inner.grace_period)
    });
    if expired {
      entries.remove(key);
      debug!(key = %key, "evicted entry past grace period");
    }
  }

  /// Reap entries whose grace period expired without a timer firing.
  fn sweep(&self, entries: &mut HashMap<QueryKey, Entry>) {
    let grace = self.inner.grace_period;
    entries.retain(|key, e| {
      let expired =
        e.subscribers.is_empty() && e.vacated_at.is_some_and(|at| at.elapsed() >= grace);
      if expired {
        debug!(key = %key, "evicted entry past grace period");
      }
      !expired
    });
  }

  fn next_seq(&self) -> u64 {
    self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn lock_entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    // Bookkeeping never panics while holding the lock.
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicU32;
  use tokio::time::sleep;

  fn init_logging() {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  }

  fn counting_fetcher(
    counter: &Arc<AtomicU32>,
    value: i32,
  ) -> impl Fn() -> BoxFuture<'static, Result<i32, FetchError>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || {
      let counter = Arc::clone(&counter);
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(10)).await;
        Ok(value)
      })
    }
  }

  #[tokio::test]
  async fn test_two_subscriptions_share_one_fetch() {
    init_logging();
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));

    let mut a: Subscription<i32> = cache.subscribe(
      QueryKey::new("teams"),
      counting_fetcher(&counter, 7),
      QueryOptions::default(),
    );
    let mut b: Subscription<i32> = cache.subscribe(
      QueryKey::new("teams"),
      counting_fetcher(&counter, 7),
      QueryOptions::default(),
    );

    assert!(a.changed().await);
    assert!(b.changed().await);

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let snap_a = a.snapshot();
    let snap_b = b.snapshot();
    assert!(snap_a.is_success());
    // Both subscribers hold the identical resolved value.
    assert!(Arc::ptr_eq(
      snap_a.data.as_ref().unwrap(),
      snap_b.data.as_ref().unwrap()
    ));
  }

  #[tokio::test]
  async fn test_snapshot_after_success() {
    let cache = QueryCache::new();
    let mut sub: Subscription<Vec<i32>> = cache.subscribe(
      QueryKey::new("numbers"),
      || async { Ok(vec![1, 2, 3]) },
      QueryOptions::default(),
    );

    assert!(sub.snapshot().is_pending());
    sub.changed().await;

    let snap = cache
      .snapshot::<Vec<i32>>(&QueryKey::new("numbers"))
      .unwrap();
    assert!(snap.is_success());
    assert_eq!(snap.data(), Some(&vec![1, 2, 3]));
    assert!(!snap.is_refreshing());
  }

  #[tokio::test]
  async fn test_error_is_surfaced_and_prior_data_retained() {
    let cache = QueryCache::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let mut sub: Subscription<i32> = cache.subscribe(
      QueryKey::new("flaky"),
      move || {
        let attempts = Arc::clone(&attempts_clone);
        async move {
          if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(1)
          } else {
            Err(FetchError::Auth("unauthorized".to_string()))
          }
        }
      },
      QueryOptions::default().with_stale_after(Duration::from_secs(60)),
    );

    sub.changed().await;
    assert!(sub.snapshot().is_success());

    sub.refetch();
    sub.changed().await;

    let snap = sub.snapshot();
    assert!(snap.is_error());
    assert_eq!(snap.error().unwrap().message(), "unauthorized");
    // Data from the earlier success is unchanged by the failed attempt.
    assert_eq!(snap.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_fresh_entry_survives_unsubscribe_within_grace() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("teams");
    let options = QueryOptions::default().with_stale_after(Duration::from_secs(60));

    let mut sub: Subscription<i32> =
      cache.subscribe(key.clone(), counting_fetcher(&counter, 7), options);
    sub.changed().await;
    drop(sub);

    // The entry is not cleared immediately; a resubscribe sees fresh data
    // without a new fetch.
    let sub2: Subscription<i32> = cache.subscribe(key, counting_fetcher(&counter, 7), options);
    let snap = sub2.snapshot();
    assert!(snap.is_success());
    assert_eq!(snap.data(), Some(&7));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_changed_resolves_for_already_settled_fresh_entry() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("feature-flags");
    let options = QueryOptions::default().with_stale_after(Duration::from_secs(300));

    let mut a: Subscription<i32> =
      cache.subscribe(key.clone(), counting_fetcher(&counter, 7), options);
    a.changed().await;

    // The second subscription hits the warm cache: no fetch starts, but
    // changed() must still resolve with the settled state.
    let mut b: Subscription<i32> = cache.subscribe(key, counting_fetcher(&counter, 7), options);
    let notified = tokio::time::timeout(Duration::from_millis(100), b.changed())
      .await
      .expect("changed() should resolve for a settled entry");
    assert!(notified);
    assert!(b.snapshot().is_success());
    assert_eq!(b.snapshot().data(), Some(&7));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidate_outlives_inflight_settlement() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = Arc::clone(&counter);
    let key = QueryKey::new("teams");

    let sub: Subscription<i32> = cache.subscribe(
      key.clone(),
      move || {
        let counter = Arc::clone(&counter_clone);
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          sleep(Duration::from_millis(50)).await;
          Ok(7)
        }
      },
      QueryOptions::default().with_stale_after(Duration::from_secs(60)),
    );

    // Invalidate with no subscribers left while the fetch is still in
    // flight: the result is stored, the stale mark is not erased.
    drop(sub);
    cache.invalidate(&key);
    sleep(Duration::from_millis(100)).await;

    let snap = cache.snapshot::<i32>(&key).unwrap();
    assert!(snap.is_success());
    assert_eq!(snap.data(), Some(&7));
    assert!(snap.is_stale());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidate_without_subscribers_marks_stale_only() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("teams");
    let options = QueryOptions::default().with_stale_after(Duration::from_secs(60));

    let mut sub: Subscription<i32> =
      cache.subscribe(key.clone(), counting_fetcher(&counter, 7), options);
    sub.changed().await;
    drop(sub);

    cache.invalidate(&key);
    sleep(Duration::from_millis(30)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let snap = cache.snapshot::<i32>(&key).unwrap();
    assert!(snap.is_stale());
    assert_eq!(snap.data(), Some(&7));
  }

  #[tokio::test]
  async fn test_invalidate_with_subscriber_triggers_one_refetch() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("teams");

    let mut sub: Subscription<i32> = cache.subscribe(
      key.clone(),
      counting_fetcher(&counter, 7),
      QueryOptions::default().with_stale_after(Duration::from_secs(60)),
    );
    sub.changed().await;

    cache.invalidate(&key);
    sub.changed().await;

    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_superseded_fetch_result_is_discarded() {
    init_logging();
    let cache = QueryCache::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);

    // First fetch is slow and resolves to 1; the superseding fetch is fast
    // and resolves to 2. Only the most recently started fetch may settle.
    let key = QueryKey::new("race");
    let mut sub: Subscription<i32> = cache.subscribe(
      key.clone(),
      move || {
        let attempts = Arc::clone(&attempts_clone);
        async move {
          if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(80)).await;
            Ok(1)
          } else {
            sleep(Duration::from_millis(10)).await;
            Ok(2)
          }
        }
      },
      QueryOptions::default(),
    );

    sleep(Duration::from_millis(20)).await;
    cache.invalidate(&key);

    sub.changed().await;
    sleep(Duration::from_millis(100)).await;

    let snap = sub.snapshot();
    assert!(snap.is_success());
    assert_eq!(snap.data(), Some(&2));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_disabled_subscription_never_fetches() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));

    let sub: Subscription<i32> = cache.subscribe(
      QueryKey::new("teams"),
      counting_fetcher(&counter, 7),
      QueryOptions::default().with_enabled(false),
    );

    sleep(Duration::from_millis(30)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(sub.snapshot().is_pending());
    assert!(sub.snapshot().data().is_none());
  }

  #[tokio::test]
  async fn test_entry_evicted_after_grace_period() {
    let cache = QueryCache::with_grace_period(Duration::from_millis(20));
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("teams");

    let mut sub: Subscription<i32> = cache.subscribe(
      key.clone(),
      counting_fetcher(&counter, 7),
      QueryOptions::default(),
    );
    sub.changed().await;
    drop(sub);

    sleep(Duration::from_millis(80)).await;
    assert!(cache.snapshot::<i32>(&key).is_none());
  }

  #[tokio::test]
  async fn test_refreshing_entry_retains_stale_data() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("teams");

    let mut sub: Subscription<i32> = cache.subscribe(
      key.clone(),
      counting_fetcher(&counter, 7),
      QueryOptions::default(),
    );
    sub.changed().await;

    cache.invalidate(&key);
    let snap = sub.snapshot();
    assert!(snap.is_refreshing());
    assert_eq!(snap.data(), Some(&7));
  }

  #[tokio::test]
  async fn test_failures_are_isolated_per_key() {
    let cache = QueryCache::new();

    let mut ok: Subscription<i32> = cache.subscribe(
      QueryKey::new("good"),
      || async { Ok(1) },
      QueryOptions::default(),
    );
    let mut bad: Subscription<i32> = cache.subscribe(
      QueryKey::new("bad"),
      || async { Err(FetchError::Network("connection refused".to_string())) },
      QueryOptions::default(),
    );

    ok.changed().await;
    bad.changed().await;

    assert!(ok.snapshot().is_success());
    assert!(bad.snapshot().is_error());
  }
}
