//! Row schemas for the dashboard's tables and procedures.
//!
//! Rows arrive from the backend as raw JSON; they are validated into these
//! structs at the boundary, and malformed rows surface as
//! [`FetchError::Validation`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::FetchError;

/// A team and its manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Team {
  pub id: String,
  pub name: String,
  pub manager_id: String,
  pub created_at: String,
}

/// A person under review.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Person {
  pub id: String,
  pub name: String,
  pub initials: String,
  pub role: String,
  pub department: String,
  pub team_id: String,
}

/// Whether a behavior applies company-wide or to one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorKind {
  Core,
  Team,
}

/// An evaluated behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Behavior {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub kind: BehaviorKind,
  pub description: String,
  pub display_order: i64,
  /// Set for team-specific behaviors, absent for core ones.
  pub team_id: Option<String>,
  #[serde(default)]
  pub indicators: Vec<String>,
}

impl Behavior {
  /// Core behaviors apply to everyone; team behaviors only to their team.
  pub fn applies_to_team(&self, team_id: &str) -> bool {
    self.kind == BehaviorKind::Core || self.team_id.as_deref() == Some(team_id)
  }
}

/// One row of the `feature_flags` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeatureFlagRow {
  pub id: String,
  pub enabled: bool,
}

/// Flag id → enabled mapping, reduced from the raw rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags(BTreeMap<String, bool>);

impl FeatureFlags {
  pub fn from_rows(rows: Vec<FeatureFlagRow>) -> Self {
    Self(rows.into_iter().map(|row| (row.id, row.enabled)).collect())
  }

  /// Unknown flags are disabled.
  pub fn is_enabled(&self, id: &str) -> bool {
    self.0.get(id).copied().unwrap_or(false)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
    self.0.iter().map(|(id, enabled)| (id.as_str(), *enabled))
  }
}

/// One row of the `get_company_overview` procedure: a team × behavior cell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompanyOverviewRow {
  pub team_name: String,
  pub manager_name: String,
  pub behavior_name: String,
  pub training_count: i64,
  pub on_track_count: i64,
  pub example_count: i64,
  pub total_evaluated: i64,
}

/// One row of the `get_team_comparison` procedure: a team's ranking entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeamComparisonRow {
  pub team_name: String,
  pub manager_name: String,
  pub avg_score: f64,
  pub total_evaluations: i64,
  pub strongest_behavior: String,
  pub weakest_behavior: String,
}

/// Validate raw table rows into their schema structs.
pub(crate) fn rows_from_values<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, FetchError> {
  rows
    .into_iter()
    .map(|row| serde_json::from_value(row).map_err(FetchError::from))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_flags_reduce_to_mapping() {
    let rows = vec![
      FeatureFlagRow {
        id: "ai_insights".to_string(),
        enabled: true,
      },
      FeatureFlagRow {
        id: "ceo_dashboard".to_string(),
        enabled: false,
      },
    ];

    let flags = FeatureFlags::from_rows(rows);
    assert!(flags.is_enabled("ai_insights"));
    assert!(!flags.is_enabled("ceo_dashboard"));
    assert!(!flags.is_enabled("peer_notes"));
  }

  #[test]
  fn test_malformed_row_is_a_validation_error() {
    let rows = vec![json!({"id": "p1", "name": "Ann"})];
    let result = rows_from_values::<Person>(rows);
    assert!(matches!(result, Err(FetchError::Validation(_))));
  }

  #[test]
  fn test_behavior_team_scoping() {
    let core: Behavior = serde_json::from_value(json!({
      "id": "b1",
      "name": "Ownership",
      "type": "core",
      "description": "Owns outcomes end to end",
      "display_order": 1,
      "team_id": null,
      "indicators": ["takes initiative"]
    }))
    .unwrap();
    let team: Behavior = serde_json::from_value(json!({
      "id": "b2",
      "name": "Code review quality",
      "type": "team",
      "description": "Reviews with care",
      "display_order": 2,
      "team_id": "t1"
    }))
    .unwrap();

    assert!(core.applies_to_team("t1"));
    assert!(core.applies_to_team("t2"));
    assert!(team.applies_to_team("t1"));
    assert!(!team.applies_to_team("t2"));
  }
}
