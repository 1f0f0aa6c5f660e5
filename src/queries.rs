//! Named queries for the performance-review dashboard.
//!
//! One method per data need, each a thin definition on top of the cache: it
//! names its [`QueryKey`], describes the table read or procedure call, and
//! reshapes rows where the consumer wants a different shape (behaviors are
//! scoped client-side, feature flags reduce to a mapping).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::cache::{QueryCache, QueryOptions, Subscription};
use crate::error::FetchError;
use crate::key::QueryKey;
use crate::model::{
  rows_from_values, Behavior, CompanyOverviewRow, FeatureFlagRow, FeatureFlags, Person, Team,
  TeamComparisonRow,
};
use crate::source::{Filter, Ordering, RemoteDataSource, TableQuery};

/// Flags change rarely; serve them from cache for five minutes.
const FLAGS_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Dashboard data client: a backend source plus a query cache.
///
/// Cloning shares both. The source is injected so tests can substitute a
/// double for the hosted backend.
#[derive(Clone)]
pub struct DashboardClient {
  source: Arc<dyn RemoteDataSource>,
  cache: QueryCache,
}

impl DashboardClient {
  pub fn new(source: Arc<dyn RemoteDataSource>) -> Self {
    Self::with_cache(source, QueryCache::new())
  }

  pub fn with_cache(source: Arc<dyn RemoteDataSource>, cache: QueryCache) -> Self {
    Self { source, cache }
  }

  /// The underlying cache, for invalidation and snapshot reads.
  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// All teams, ordered by name.
  pub fn teams(&self) -> Subscription<Vec<Team>> {
    let source = Arc::clone(&self.source);
    self.cache.subscribe(
      QueryKey::new("teams"),
      move || {
        let source = Arc::clone(&source);
        async move {
          let rows = source
            .query_table(&TableQuery::new("teams").order_by(Ordering::asc("name")))
            .await?;
          rows_from_values(rows)
        }
      },
      QueryOptions::default(),
    )
  }

  /// People, ordered by name, optionally restricted to one team
  /// (server-side filter).
  pub fn people(&self, team_id: Option<&str>) -> Subscription<Vec<Person>> {
    let source = Arc::clone(&self.source);
    let team_id = team_id.map(str::to_string);
    self.cache.subscribe(
      QueryKey::new("people").with(team_id.clone()),
      move || {
        let source = Arc::clone(&source);
        let team_id = team_id.clone();
        async move {
          let mut query = TableQuery::new("people").order_by(Ordering::asc("name"));
          if let Some(team_id) = &team_id {
            query = query.filter(Filter::eq("team_id", team_id));
          }
          let rows = source.query_table(&query).await?;
          rows_from_values(rows)
        }
      },
      QueryOptions::default(),
    )
  }

  /// Behaviors in display order. With a team given, scoped client-side to
  /// core behaviors plus that team's own.
  pub fn behaviors(&self, team_id: Option<&str>) -> Subscription<Vec<Behavior>> {
    let source = Arc::clone(&self.source);
    let team_id = team_id.map(str::to_string);
    self.cache.subscribe(
      QueryKey::new("behaviors").with(team_id.clone()),
      move || {
        let source = Arc::clone(&source);
        let team_id = team_id.clone();
        async move {
          let rows = source
            .query_table(&TableQuery::new("behaviors").order_by(Ordering::asc("display_order")))
            .await?;
          let mut behaviors: Vec<Behavior> = rows_from_values(rows)?;
          if let Some(team_id) = &team_id {
            behaviors.retain(|b| b.applies_to_team(team_id));
          }
          Ok(behaviors)
        }
      },
      QueryOptions::default(),
    )
  }

  /// Feature flags as an id → enabled mapping.
  pub fn feature_flags(&self) -> Subscription<FeatureFlags> {
    let source = Arc::clone(&self.source);
    self.cache.subscribe(
      QueryKey::new("feature-flags"),
      move || {
        let source = Arc::clone(&source);
        async move {
          let rows = source
            .query_table(&TableQuery::new("feature_flags").select("id,enabled"))
            .await?;
          let rows: Vec<FeatureFlagRow> = rows_from_values(rows)?;
          Ok(FeatureFlags::from_rows(rows))
        }
      },
      QueryOptions::default().with_stale_after(FLAGS_STALE_AFTER),
    )
  }

  /// Company-wide overview: every team × behavior cell.
  pub fn company_overview(&self) -> Subscription<Vec<CompanyOverviewRow>> {
    self.procedure_rows(
      QueryKey::new("ceo").with("company-overview"),
      "get_company_overview",
    )
  }

  /// Team ranking and benchmarking.
  pub fn team_comparison(&self) -> Subscription<Vec<TeamComparisonRow>> {
    self.procedure_rows(
      QueryKey::new("ceo").with("team-comparison"),
      "get_team_comparison",
    )
  }

  fn procedure_rows<T>(&self, key: QueryKey, procedure: &'static str) -> Subscription<Vec<T>>
  where
    T: serde::de::DeserializeOwned + Send + Sync + 'static,
  {
    let source = Arc::clone(&self.source);
    self.cache.subscribe(
      key,
      move || {
        let source = Arc::clone(&source);
        async move {
          let value = source.call_procedure(procedure, json!({})).await?;
          serde_json::from_value::<Vec<T>>(value)
            .map_err(|e| FetchError::Validation(format!("procedure {}: {}", procedure, e)))
        }
      },
      QueryOptions::default(),
    )
  }
}
