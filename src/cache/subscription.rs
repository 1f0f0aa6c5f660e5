//! Live subscriber handles.

use std::fmt;
use std::marker::PhantomData;

use tokio::sync::mpsc;

use super::entry::QuerySnapshot;
use super::layer::QueryCache;
use crate::key::QueryKey;

/// A live view of one cache entry.
///
/// Holds the entry alive while it exists and receives a notification for
/// every settlement of the key. Dropping the subscription unregisters it;
/// in-flight fetches are never cancelled.
pub struct Subscription<T> {
  cache: QueryCache,
  key: QueryKey,
  id: u64,
  rx: mpsc::UnboundedReceiver<()>,
  _result: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
  pub(crate) fn new(
    cache: QueryCache,
    key: QueryKey,
    id: u64,
    rx: mpsc::UnboundedReceiver<()>,
  ) -> Self {
    Self {
      cache,
      key,
      id,
      rx,
      _result: PhantomData,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current state of the entry. Synchronous, no side effects.
  pub fn snapshot(&self) -> QuerySnapshot<T> {
    self
      .cache
      .snapshot(&self.key)
      .unwrap_or_else(QuerySnapshot::pending)
  }

  /// Wait for the next settlement of this key.
  ///
  /// Returns `false` if the cache side of the channel is gone, which only
  /// happens when the entry was evicted.
  pub async fn changed(&mut self) -> bool {
    self.rx.recv().await.is_some()
  }

  /// Non-blocking variant of [`changed`](Self::changed) for event loops.
  /// Drains queued notifications and returns `true` if there was at least
  /// one.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while self.rx.try_recv().is_ok() {
      changed = true;
    }
    changed
  }

  /// Mark this key stale and refetch. Equivalent to
  /// [`QueryCache::invalidate`] for this subscription's key.
  pub fn refetch(&self) {
    self.cache.invalidate(&self.key);
  }

  /// Explicit unsubscribe; identical to dropping the handle.
  pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
  fn drop(&mut self) {
    self.cache.unsubscribe(&self.key, self.id);
  }
}

impl<T> fmt::Debug for Subscription<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish_non_exhaustive()
  }
}
