//! HTTP implementation of the backend seam.
//!
//! Speaks the PostgREST-style protocol of the hosted backend: tables under
//! `/rest/v1/{table}` with filters and ordering in the query string, remote
//! procedures under `/rest/v1/rpc/{name}`.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Filter, RemoteDataSource, TableQuery};
use crate::config::Config;
use crate::error::{ConfigError, FetchError};

/// Backend client over HTTP.
#[derive(Clone)]
pub struct RestDataSource {
  http: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestDataSource {
  pub fn new(base: Url, api_key: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      base,
      api_key: api_key.into(),
    }
  }

  /// Build the client from loaded configuration plus the API key from the
  /// environment.
  pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
    let base = config.backend_url()?;
    let api_key = Config::get_api_key()?;
    Ok(Self::new(base, api_key))
  }

  fn table_url(&self, query: &TableQuery) -> Url {
    let mut url = self.base.clone();
    url.set_path(&format!("rest/v1/{}", query.table));
    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("select", &query.select);
      for filter in &query.filters {
        match filter {
          Filter::Eq { column, value } => {
            pairs.append_pair(column, &format!("eq.{}", value));
          }
        }
      }
      if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.append_pair("order", &format!("{}.{}", order.column, direction));
      }
    }
    url
  }

  fn rpc_url(&self, name: &str) -> Url {
    let mut url = self.base.clone();
    url.set_path(&format!("rest/v1/rpc/{}", name));
    url
  }

  /// Map a non-success response to the error taxonomy.
  async fn check(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      Err(FetchError::Auth(if body.is_empty() {
        "unauthorized".to_string()
      } else {
        body
      }))
    } else {
      Err(FetchError::Rpc(format!("{}: {}", status, body)))
    }
  }
}

#[async_trait]
impl RemoteDataSource for RestDataSource {
  async fn query_table(&self, query: &TableQuery) -> Result<Vec<Value>, FetchError> {
    let url = self.table_url(query);
    debug!(table = %query.table, %url, "table query");

    let response = self
      .http
      .get(url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .send()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    let response = Self::check(response).await?;
    response
      .json::<Vec<Value>>()
      .await
      .map_err(|e| FetchError::Validation(format!("table {}: {}", query.table, e)))
  }

  async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, FetchError> {
    let url = self.rpc_url(name);
    debug!(procedure = name, %url, "remote procedure call");

    let response = self
      .http
      .post(url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .json(&args)
      .send()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    let response = Self::check(response).await?;
    response
      .json::<Value>()
      .await
      .map_err(|e| FetchError::Validation(format!("procedure {}: {}", name, e)))
  }
}
