//! In-memory remote-data cache.
//!
//! This module provides the core of the data layer:
//! - One cache entry per [`QueryKey`](crate::key::QueryKey), created on
//!   first subscription and evicted a grace period after the last one leaves
//! - At most one in-flight fetch per key; all subscribers of the key share
//!   the settled value or error
//! - Staleness driven by a per-subscription `stale_after` duration
//! - "Last fetch started wins": results of superseded fetches are discarded

mod entry;
mod layer;
mod subscription;

pub use entry::{QueryOptions, QuerySnapshot, QueryStatus};
pub use layer::QueryCache;
pub use subscription::Subscription;
