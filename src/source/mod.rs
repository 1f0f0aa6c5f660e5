//! The backend collaborator seam.
//!
//! The cache and the named queries never talk to the network directly; they
//! go through [`RemoteDataSource`], which exposes the two operations the
//! hosted backend offers: table reads and remote procedure calls. The
//! production implementation is [`RestDataSource`]; tests substitute a
//! double.

mod rest;

pub use rest::RestDataSource;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;

/// Server-side row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
  /// `column = value`
  Eq { column: String, value: String },
}

impl Filter {
  pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
    Self::Eq {
      column: column.into(),
      value: value.into(),
    }
  }
}

/// Result ordering for a table read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
  pub column: String,
  pub ascending: bool,
}

impl Ordering {
  pub fn asc(column: impl Into<String>) -> Self {
    Self {
      column: column.into(),
      ascending: true,
    }
  }

  pub fn desc(column: impl Into<String>) -> Self {
    Self {
      column: column.into(),
      ascending: false,
    }
  }
}

/// Description of one table read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
  pub table: String,
  pub select: String,
  pub filters: Vec<Filter>,
  pub order: Option<Ordering>,
}

impl TableQuery {
  pub fn new(table: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      select: "*".to_string(),
      filters: Vec::new(),
      order: None,
    }
  }

  pub fn select(mut self, columns: impl Into<String>) -> Self {
    self.select = columns.into();
    self
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn order_by(mut self, order: Ordering) -> Self {
    self.order = Some(order);
    self
  }
}

/// The external backend: opaque asynchronous table queries and remote
/// procedure calls, each returning rows/values or a typed failure.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
  /// Read rows from a table. Rows come back as raw JSON objects; callers
  /// deserialize them into their schema structs at the boundary.
  async fn query_table(&self, query: &TableQuery) -> Result<Vec<Value>, FetchError>;

  /// Invoke a named remote procedure with JSON arguments.
  async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, FetchError>;
}
