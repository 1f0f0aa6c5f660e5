//! Structural query keys.
//!
//! A [`QueryKey`] is an ordered sequence of primitive segments that uniquely
//! identifies a cached query, e.g. `["people", "t1"]`. Equality is
//! structural: two subscriptions whose keys compare equal share one cache
//! entry, one in-flight fetch, and one settled result.

use std::fmt;

/// One element of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySegment {
  Str(String),
  Int(i64),
  Bool(bool),
  /// Placeholder for an absent optional parameter, so `["people", None]`
  /// and `["people", Some("t1")]` stay distinct keys.
  Null,
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Str(s) => write!(f, "{}", s),
      Self::Int(i) => write!(f, "{}", i),
      Self::Bool(b) => write!(f, "{}", b),
      Self::Null => write!(f, "_"),
    }
  }
}

impl From<&str> for KeySegment {
  fn from(s: &str) -> Self {
    Self::Str(s.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(s: String) -> Self {
    Self::Str(s)
  }
}

impl From<i64> for KeySegment {
  fn from(i: i64) -> Self {
    Self::Int(i)
  }
}

impl From<bool> for KeySegment {
  fn from(b: bool) -> Self {
    Self::Bool(b)
  }
}

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
  fn from(v: Option<T>) -> Self {
    match v {
      Some(v) => v.into(),
      None => Self::Null,
    }
  }
}

/// Structural identifier for a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  /// Build a key from a root segment.
  pub fn new(root: impl Into<KeySegment>) -> Self {
    Self(vec![root.into()])
  }

  /// Append a segment.
  pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, seg) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ":")?;
      }
      write!(f, "{}", seg)?;
    }
    Ok(())
  }
}

impl<S: Into<KeySegment>, const N: usize> From<[S; N]> for QueryKey {
  fn from(segments: [S; N]) -> Self {
    Self(segments.into_iter().map(Into::into).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    let a = QueryKey::new("people").with(Some("t1"));
    let b = QueryKey::new("people").with("t1");
    assert_eq!(a, b);
  }

  #[test]
  fn test_none_is_a_distinct_segment() {
    let all = QueryKey::new("people").with(None::<&str>);
    let one = QueryKey::new("people").with("t1");
    assert_ne!(all, one);
    assert_eq!(all.segments().len(), 2);
  }

  #[test]
  fn test_display() {
    let key = QueryKey::new("ceo").with("company-overview");
    assert_eq!(key.to_string(), "ceo:company-overview");
    assert_eq!(QueryKey::new("people").with(None::<&str>).to_string(), "people:_");
  }

  #[test]
  fn test_from_array() {
    let key: QueryKey = ["ceo", "team-comparison"].into();
    assert_eq!(key, QueryKey::new("ceo").with("team-comparison"));
  }
}
