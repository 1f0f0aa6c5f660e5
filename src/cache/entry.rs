//! Per-key cache entry state and the snapshot view handed to callers.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::error::FetchError;

/// Type-erased settled value. One cache map holds entries of many result
/// types, so the entry stores `Arc<dyn Any>` and the typed view downcasts.
pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;

/// The settlement state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// No settled result yet, or a refetch is in flight.
  Pending,
  /// The most recent fetch resolved; data is present.
  Success,
  /// The most recent fetch failed; the error is present.
  Error,
}

/// Per-subscription options.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
  /// How long a settled result stays fresh. Zero means always stale: every
  /// new subscription triggers a refetch. Subscribers of one key should
  /// agree on this value; the entry keeps the most recent one.
  pub stale_after: Duration,
  /// While false, this subscriber never triggers fetching. It still
  /// registers, observes settlements, and holds the entry alive.
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_after: Duration::ZERO,
      enabled: true,
    }
  }
}

impl QueryOptions {
  pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
    self.stale_after = stale_after;
    self
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }
}

/// A typed, synchronous read of a cache entry.
///
/// `data` and `error` can be present at the same time: a failed refetch
/// keeps the previously resolved value, and a refetch in flight keeps both
/// until it settles.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
  pub status: QueryStatus,
  pub data: Option<Arc<T>>,
  pub error: Option<FetchError>,
  pub fetched_at: Option<Instant>,
  is_stale: bool,
}

impl<T> QuerySnapshot<T> {
  /// Snapshot of a key with no entry: pending, nothing settled.
  pub(crate) fn pending() -> Self {
    Self {
      status: QueryStatus::Pending,
      data: None,
      error: None,
      fetched_at: None,
      is_stale: true,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.status == QueryStatus::Pending
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// The settled value, if any fetch for this key ever resolved.
  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.error.as_ref()
  }

  /// Whether the settled value has outlived its `stale_after` window (or the
  /// key was invalidated).
  pub fn is_stale(&self) -> bool {
    self.is_stale
  }

  /// A refetch is in flight while a previously resolved value is still
  /// shown. Consumers may render the old data with a refresh indicator.
  pub fn is_refreshing(&self) -> bool {
    self.status == QueryStatus::Pending && self.data.is_some()
  }
}

/// One registered subscriber of an entry.
pub(crate) struct Subscriber {
  pub id: u64,
  pub enabled: bool,
  /// Settlement notifications. Unbounded so delivery under the cache lock
  /// never blocks.
  pub tx: mpsc::UnboundedSender<()>,
}

/// Internal state for one query key.
pub(crate) struct Entry {
  pub status: QueryStatus,
  pub data: Option<ErasedData>,
  pub error: Option<FetchError>,
  /// When the last fetch settled. `None` means never fetched or invalidated.
  pub fetched_at: Option<Instant>,
  pub stale_after: Duration,
  /// The fetcher most recently supplied for this key, kept so `invalidate`
  /// can refetch without a subscription in hand.
  pub fetcher: Option<super::layer::ErasedFetcher>,
  /// Sequence number of the most recently started fetch. A settlement
  /// carrying an older number is discarded.
  pub fetch_seq: u64,
  /// Fetches started at or before this sequence predate the last
  /// invalidation: their settlements store the result but leave the entry
  /// stale.
  pub stale_seq: u64,
  pub in_flight: bool,
  /// Registration order is preserved: notifications go out in this order.
  pub subscribers: Vec<Subscriber>,
  /// Set when the last subscriber leaves; the entry is evicted once this is
  /// older than the grace period.
  pub vacated_at: Option<Instant>,
}

impl Entry {
  pub fn new(stale_after: Duration) -> Self {
    Self {
      status: QueryStatus::Pending,
      data: None,
      error: None,
      fetched_at: None,
      stale_after,
      fetcher: None,
      fetch_seq: 0,
      stale_seq: 0,
      in_flight: false,
      subscribers: Vec::new(),
      vacated_at: None,
    }
  }

  pub fn is_stale(&self) -> bool {
    match self.fetched_at {
      Some(at) => at.elapsed() >= self.stale_after,
      None => true,
    }
  }

  pub fn has_enabled_subscriber(&self) -> bool {
    self.subscribers.iter().any(|s| s.enabled)
  }

  /// Typed view of this entry. `data` is `None` when the stored value was
  /// produced under a different type, which is a caller bug (all
  /// subscriptions of one key must share the result type).
  pub fn snapshot<T: Send + Sync + 'static>(&self) -> QuerySnapshot<T> {
    let data = self
      .data
      .as_ref()
      .and_then(|d| Arc::clone(d).downcast::<T>().ok());
    debug_assert!(
      data.is_some() == self.data.is_some(),
      "cache entry downcast to mismatched result type"
    );

    QuerySnapshot {
      status: self.status,
      data,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      is_stale: self.is_stale(),
    }
  }
}
