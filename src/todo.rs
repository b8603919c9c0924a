use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::calendar::event::RecordId;
use crate::storage::cache::CacheEntry;
use crate::sync::remote::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tasks,
    Shopping,
    Bucket,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Tasks, Category::Shopping, Category::Bucket];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Tasks => "tasks",
            Category::Shopping => "shopping",
            Category::Bucket => "bucket",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Tasks => "Tasks",
            Category::Shopping => "Shopping",
            Category::Bucket => "Bucket List",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tasks" | "task" => Ok(Category::Tasks),
            "shopping" => Ok(Category::Shopping),
            "bucket" => Ok(Category::Bucket),
            other => Err(format!("Unknown category '{}'. Use tasks, shopping or bucket.", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub owner_id: String,
    pub completed: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    pub fn draft(
        title: impl Into<String>,
        category: Category,
        owner_id: impl Into<String>,
        sort_order: i64,
    ) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            category,
            owner_id: owner_id.into(),
            completed: false,
            sort_order,
            created_at: Utc::now(),
        }
    }

    pub fn to_insert_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("title".into(), json!(self.title));
        record.insert("category".into(), json!(self.category));
        record.insert("owner".into(), json!(self.owner_id));
        record.insert("completed".into(), Value::Bool(self.completed));
        record.insert("sort_order".into(), json!(self.sort_order));
        record.insert("created_at".into(), json!(self.created_at.to_rfc3339()));
        record
    }
}

impl CacheEntry for Todo {
    type SortKey = (Category, i64, Reverse<DateTime<Utc>>);

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn sort_key(&self) -> Self::SortKey {
        (self.category, self.sort_order, Reverse(self.created_at))
    }
}

/// Row of the todos table as the remote store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTodo {
    pub id: RecordId,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub sort_order: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl StoredTodo {
    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record))
    }
}

impl From<StoredTodo> for Todo {
    fn from(stored: StoredTodo) -> Self {
        Self {
            id: stored.id.to_string(),
            title: stored.title,
            category: stored.category,
            owner_id: stored.owner.unwrap_or_default(),
            completed: stored.completed,
            sort_order: stored.sort_order.unwrap_or(0),
            created_at: stored.created_at,
        }
    }
}

/// New `sort_order` values after moving `moved_id` to `new_index` within one category.
/// `ordered` must be that category's todos in display order. Only changed entries are returned.
pub fn plan_reorder(ordered: &[&Todo], moved_id: &str, new_index: usize) -> Vec<(String, i64)> {
    let Some(from) = ordered.iter().position(|todo| todo.id == moved_id) else {
        return Vec::new();
    };

    let mut sequence: Vec<&Todo> = ordered.to_vec();
    let moved = sequence.remove(from);
    let to = new_index.min(sequence.len());
    sequence.insert(to, moved);

    sequence
        .into_iter()
        .enumerate()
        .filter_map(|(position, todo)| {
            let sort_order = position as i64;
            (todo.sort_order != sort_order).then(|| (todo.id.clone(), sort_order))
        })
        .collect()
}

/// `(completed, total)` for a category.
pub fn category_stats<'a>(
    todos: impl IntoIterator<Item = &'a Todo>,
    category: Category,
) -> (usize, usize) {
    todos
        .into_iter()
        .filter(|todo| todo.category == category)
        .fold((0, 0), |(done, total), todo| (done + usize::from(todo.completed), total + 1))
}
