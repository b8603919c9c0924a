use std::cmp::Ordering;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, Connection};
use serde_json::Value;
use thiserror::Error;

use crate::sync::remote::{Condition, Filter, OrderBy, Record, RemoteError, RemoteStore};

#[derive(Debug, Error)]
pub enum OfflineStoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("No row {id} in {table}")]
    MissingRow { table: String, id: String },
}

impl From<OfflineStoreError> for RemoteError {
    fn from(err: OfflineStoreError) -> Self {
        RemoteError::new(err.to_string())
    }
}

/// Local stand-in for the hosted backend: every table is a set of JSON rows in one SQLite
/// file, with integer ids assigned on insert.
pub struct OfflineStore {
    conn: Mutex<Connection>,
}

impl OfflineStore {
    pub fn new(conn: Connection) -> Result<Self, OfflineStoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &Path) -> Result<Self, OfflineStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::new(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, OfflineStoreError> {
        Self::new(Connection::open_in_memory()?)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, OfflineStoreError>,
    ) -> Result<T, RemoteError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| RemoteError::new("Offline store is unavailable"))?;
        f(&conn).map_err(RemoteError::from)
    }

    fn row_id(table: &str, id: &str) -> Result<i64, RemoteError> {
        id.parse::<i64>().map_err(|_| {
            OfflineStoreError::MissingRow {
                table: table.to_string(),
                id: id.to_string(),
            }
            .into()
        })
    }

    fn load_rows(conn: &Connection, table: &str) -> Result<Vec<Record>, OfflineStoreError> {
        let mut stmt =
            conn.prepare("SELECT id, data FROM records WHERE table_name = ?1 ORDER BY id")?;
        let rows = stmt.query_map([table], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let mut record: Record = serde_json::from_str(&data)?;
            record.insert("id".to_string(), Value::from(id));
            records.push(record);
        }
        Ok(records)
    }
}

fn compare_to_literal(value: &Value, literal: &str) -> Option<Ordering> {
    match value {
        Value::Number(number) => {
            let literal = literal.parse::<f64>().ok()?;
            number.as_f64()?.partial_cmp(&literal)
        }
        Value::Bool(flag) => literal.parse::<bool>().ok().map(|literal| flag.cmp(&literal)),
        Value::String(text) => Some(compare_text(text, literal)),
        _ => None,
    }
}

fn compare_text(left: &str, right: &str) -> Ordering {
    match (DateTime::parse_from_rfc3339(left), DateTime::parse_from_rfc3339(right)) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(l)), Some(Value::String(r))) => compare_text(l, r),
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn matches(record: &Record, filter: &Filter) -> bool {
    filter.conditions.iter().all(|condition| match condition {
        Condition::Eq(column, literal) => {
            compare_column(record, column, literal) == Some(Ordering::Equal)
        }
        Condition::Gte(column, literal) => matches!(
            compare_column(record, column, literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Condition::Gt(column, literal) => {
            compare_column(record, column, literal) == Some(Ordering::Greater)
        }
        Condition::Lt(column, literal) => {
            compare_column(record, column, literal) == Some(Ordering::Less)
        }
        Condition::IsNull(column) => matches!(record.get(column), None | Some(Value::Null)),
        Condition::AnyOf(alternatives) => alternatives.iter().any(|alt| matches(record, alt)),
    })
}

fn compare_column(record: &Record, column: &str, literal: &str) -> Option<Ordering> {
    compare_to_literal(record.get(column)?, literal)
}

#[async_trait]
impl RemoteStore for OfflineStore {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: &OrderBy,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut records = self.with_conn(|conn| Self::load_rows(conn, table))?;
        records.retain(|record| matches(record, filter));
        records.sort_by(|a, b| {
            order_by
                .columns
                .iter()
                .map(|order| {
                    let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                    if order.ascending { ordering } else { ordering.reverse() }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        tracing::debug!("Offline select from {} returned {} rows", table, records.len());
        Ok(records)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError> {
        let mut record = record;
        record.remove("id");
        self.with_conn(|conn| {
            let data = serde_json::to_string(&record)?;
            conn.execute(
                "INSERT INTO records (table_name, data) VALUES (?1, ?2)",
                params![table, data],
            )?;
            record.insert("id".to_string(), Value::from(conn.last_insert_rowid()));
            Ok(record)
        })
    }

    async fn update(&self, table: &str, id: &str, patch: Record) -> Result<(), RemoteError> {
        let row_id = Self::row_id(table, id)?;
        self.with_conn(|conn| {
            let data: String = conn
                .query_row(
                    "SELECT data FROM records WHERE table_name = ?1 AND id = ?2",
                    params![table, row_id],
                    |row| row.get(0),
                )
                .map_err(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => OfflineStoreError::MissingRow {
                        table: table.to_string(),
                        id: id.to_string(),
                    },
                    other => other.into(),
                })?;
            let mut record: Record = serde_json::from_str(&data)?;
            for (column, value) in patch {
                if column != "id" {
                    record.insert(column, value);
                }
            }
            conn.execute(
                "UPDATE records SET data = ?1 WHERE table_name = ?2 AND id = ?3",
                params![serde_json::to_string(&record)?, table, row_id],
            )?;
            Ok(())
        })
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let row_id = Self::row_id(table, id)?;
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
                params![table, row_id],
            )?;
            if deleted == 0 {
                return Err(OfflineStoreError::MissingRow {
                    table: table.to_string(),
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }
}
