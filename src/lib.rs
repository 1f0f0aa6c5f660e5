//! Client-side data layer for a performance-review dashboard.
//!
//! Two pieces:
//!
//! - [`QueryCache`]: an in-memory cache of asynchronous query results with
//!   request deduplication, staleness policy, and subscriber fan-out,
//!   inspired by TanStack Query. Subscribing with a [`QueryKey`] and a
//!   fetcher returns a [`Subscription`] that observes every settlement of
//!   that key; overlapping subscribers share one fetch and one result.
//! - [`DashboardClient`]: the named queries the dashboard needs (teams,
//!   people, behaviors, feature flags, and the two CEO-level reports), built
//!   on the cache and a pluggable [`source::RemoteDataSource`] backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use revboard::{Config, DashboardClient};
//! use revboard::source::RestDataSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let source = RestDataSource::from_config(&config)?;
//! let client = DashboardClient::new(Arc::new(source));
//!
//! let mut teams = client.teams();
//! teams.changed().await;
//! if let Some(teams) = teams.snapshot().data() {
//!     println!("{} teams", teams.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod model;
pub mod queries;
pub mod source;

pub use cache::{QueryCache, QueryOptions, QuerySnapshot, QueryStatus, Subscription};
pub use config::Config;
pub use error::{ConfigError, FetchError};
pub use key::{KeySegment, QueryKey};
pub use queries::DashboardClient;
