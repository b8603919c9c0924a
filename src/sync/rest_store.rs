use async_trait::async_trait;
use serde_json::Value;

use crate::sync::remote::{Condition, Filter, OrderBy, Record, RemoteError, RemoteStore};

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::new(format!("HTTP request failed: {}", err))
    }
}

/// Client for a PostgREST-style backend-as-a-service.
pub struct RestStore {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl RestStore {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            access_token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = access_token;
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn row_url(&self, table: &str, id: &str) -> String {
        format!("{}?id=eq.{}", self.table_url(table), urlencoding::encode(id))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(token)
    }

    fn query_pairs(filter: &Filter, order_by: &OrderBy) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), "*".to_string())];

        for condition in &filter.conditions {
            pairs.push(match condition {
                Condition::Eq(column, value) => (column.clone(), format!("eq.{}", value)),
                Condition::Gte(column, value) => (column.clone(), format!("gte.{}", value)),
                Condition::Gt(column, value) => (column.clone(), format!("gt.{}", value)),
                Condition::Lt(column, value) => (column.clone(), format!("lt.{}", value)),
                Condition::IsNull(column) => (column.clone(), "is.null".to_string()),
                Condition::AnyOf(alternatives) => {
                    ("or".to_string(), format!("({})", Self::alternatives(alternatives)))
                }
            });
        }

        if !order_by.columns.is_empty() {
            let order = order_by
                .columns
                .iter()
                .map(|c| format!("{}.{}", c.column, if c.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_string(), order));
        }

        pairs
    }

    /// Logic-tree body of an `or=(...)` parameter. Values are quoted so timestamps survive.
    fn alternatives(alternatives: &[Filter]) -> String {
        alternatives
            .iter()
            .map(|alternative| match alternative.conditions.as_slice() {
                [single] => Self::tree_condition(single),
                conditions => format!(
                    "and({})",
                    conditions.iter().map(Self::tree_condition).collect::<Vec<_>>().join(",")
                ),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn tree_condition(condition: &Condition) -> String {
        match condition {
            Condition::Eq(column, value) => format!("{}.eq.\"{}\"", column, value),
            Condition::Gte(column, value) => format!("{}.gte.\"{}\"", column, value),
            Condition::Gt(column, value) => format!("{}.gt.\"{}\"", column, value),
            Condition::Lt(column, value) => format!("{}.lt.\"{}\"", column, value),
            Condition::IsNull(column) => format!("{}.is.null", column),
            Condition::AnyOf(alternatives) => format!("or({})", Self::alternatives(alternatives)),
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!("Remote request failed. Status: {}, Body: {}", status, body);

    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|json| json.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|message| !message.is_empty());

    match message {
        Some(message) => RemoteError::new(message),
        None if body.trim().is_empty() => RemoteError::new(format!("Status {}", status)),
        None => RemoteError::new(format!("Status {}: {}", status, body)),
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: &OrderBy,
    ) -> Result<Vec<Record>, RemoteError> {
        let url = self.table_url(table);
        let query = Self::query_pairs(filter, order_by);

        tracing::info!("Selecting from {}", table);
        tracing::debug!("GET {} with query: {:?}", url, query);

        let response = self.authorized(self.client.get(&url)).query(&query).send().await?;

        let status = response.status();
        tracing::info!("Select response status: {}", status);

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let rows: Vec<Value> = response.json().await?;
        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(record) => Some(record),
                other => {
                    tracing::warn!("Skipping non-object row from {}: {}", table, other);
                    None
                }
            })
            .collect();

        tracing::info!("Selected {} rows from {}", records.len(), table);
        Ok(records)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError> {
        let url = format!("{}?select=*", self.table_url(table));

        tracing::info!("Inserting into {}", table);
        tracing::debug!("POST {} with payload: {:?}", url, record);

        let response = self
            .authorized(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await?;

        let status = response.status();
        tracing::info!("Insert response status: {}", status);

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let created: Value = response.json().await?;
        let created = match created {
            Value::Array(rows) => rows.into_iter().next(),
            other => Some(other),
        };

        match created {
            Some(Value::Object(row)) => {
                tracing::info!("Row created in {} with id {:?}", table, row.get("id"));
                Ok(row)
            }
            _ => Err(RemoteError::new(format!("Insert into {} returned no row", table))),
        }
    }

    async fn update(&self, table: &str, id: &str, patch: Record) -> Result<(), RemoteError> {
        let url = self.row_url(table, id);

        tracing::info!("Updating {} row {}", table, id);
        tracing::debug!("PATCH {} with payload: {:?}", url, patch);

        let response = self
            .authorized(self.client.patch(&url))
            .json(&patch)
            .send()
            .await?;

        let status = response.status();
        tracing::info!("Update response status: {}", status);

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let url = self.row_url(table, id);

        tracing::info!("Deleting {} row {}", table, id);

        let response = self.authorized(self.client.delete(&url)).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}
