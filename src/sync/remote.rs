use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One row as exchanged with the remote store.
pub type Record = serde_json::Map<String, Value>;

/// Failure reported by the remote store. The message is shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, String),
    Gte(String, String),
    Gt(String, String),
    Lt(String, String),
    /// Column is absent or null.
    IsNull(String),
    /// At least one of the nested filters matches.
    AnyOf(Vec<Filter>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Eq(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Gte(column.to_string(), value.into()));
        self
    }

    pub fn gt(mut self, column: &str, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Gt(column.to_string(), value.into()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Lt(column.to_string(), value.into()));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull(column.to_string()));
        self
    }

    pub fn any_of(mut self, alternatives: Vec<Filter>) -> Self {
        self.conditions.push(Condition::AnyOf(alternatives));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderColumn {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBy {
    pub columns: Vec<OrderColumn>,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self::default().then_asc(column)
    }

    pub fn desc(column: &str) -> Self {
        Self::default().then_desc(column)
    }

    pub fn then_asc(mut self, column: &str) -> Self {
        self.columns.push(OrderColumn {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn then_desc(mut self, column: &str) -> Self {
        self.columns.push(OrderColumn {
            column: column.to_string(),
            ascending: false,
        });
        self
    }
}

/// The hosted backend as the core sees it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: &OrderBy,
    ) -> Result<Vec<Record>, RemoteError>;

    /// Returns the created row, including the id the store assigned.
    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError>;

    async fn update(&self, table: &str, id: &str, patch: Record) -> Result<(), RemoteError>;

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: &OrderBy,
    ) -> Result<Vec<Record>, RemoteError> {
        (**self).select(table, filter, order_by).await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError> {
        (**self).insert(table, record).await
    }

    async fn update(&self, table: &str, id: &str, patch: Record) -> Result<(), RemoteError> {
        (**self).update(table, id, patch).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        (**self).delete(table, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builder_keeps_condition_order() {
        let filter = Filter::all()
            .lt("starts_at", "2024-07-01")
            .gt("ends_at", "2024-06-01");

        assert_eq!(filter.conditions.len(), 2);
        assert_eq!(filter.conditions[0], Condition::Lt("starts_at".into(), "2024-07-01".into()));
        assert_eq!(filter.conditions[1], Condition::Gt("ends_at".into(), "2024-06-01".into()));
    }

    #[test]
    fn alternatives_nest_whole_filters() {
        let filter = Filter::all().any_of(vec![
            Filter::all().gt("ends_at", "2024-06-01"),
            Filter::all().is_null("ends_at"),
        ]);

        let Condition::AnyOf(alternatives) = &filter.conditions[0] else {
            panic!("expected alternatives");
        };
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[1].conditions, vec![Condition::IsNull("ends_at".into())]);
    }

    #[test]
    fn order_by_chains_columns() {
        let order = OrderBy::asc("category").then_desc("created_at");

        assert_eq!(order.columns.len(), 2);
        assert!(order.columns[0].ascending);
        assert!(!order.columns[1].ascending);
    }

    #[test]
    fn remote_error_displays_message_verbatim() {
        let err = RemoteError::new("new row violates row-level security policy");
        assert_eq!(err.to_string(), "new row violates row-level security policy");
    }
}
