use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::calendar::range::EventRange;
use crate::storage::cache::CacheEntry;
use crate::sync::remote::Record;

pub use crate::storage::cache::TEMP_ID_PREFIX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub starts_at: DateTime<FixedOffset>,
    pub ends_at: DateTime<FixedOffset>,
    pub all_day: bool,
    pub owner_id: String,
    pub owner_name: Option<String>,
    pub is_together: bool,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl Event {
    /// Unsaved event; the cache assigns its temporary id on insert.
    pub fn draft(title: impl Into<String>, range: EventRange, owner_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            starts_at: range.start,
            ends_at: range.end,
            all_day: range.all_day,
            owner_id: owner_id.into(),
            owner_name: None,
            is_together: false,
            location: None,
            description: None,
        }
    }

    pub fn range(&self) -> EventRange {
        EventRange {
            start: self.starts_at,
            end: self.ends_at,
            all_day: self.all_day,
        }
    }

    pub fn apply(&mut self, patch: &EventPatch) {
        if let Some(starts_at) = patch.starts_at {
            self.starts_at = starts_at;
        }
        if let Some(ends_at) = patch.ends_at {
            self.ends_at = ends_at;
        }
        if let Some(all_day) = patch.all_day {
            self.all_day = all_day;
        }
    }

    /// Columns sent on create. `all_day` is omitted for schemas that infer it.
    pub fn to_insert_record(&self, with_all_day_column: bool) -> Record {
        let mut record = Record::new();
        record.insert("title".into(), json!(self.title));
        record.insert("starts_at".into(), json!(self.starts_at.to_rfc3339()));
        record.insert("ends_at".into(), json!(self.ends_at.to_rfc3339()));
        record.insert("created_by".into(), json!(self.owner_id));
        record.insert("location".into(), json!(self.location));
        record.insert("description".into(), json!(self.description));
        if self.is_together {
            record.insert("is_together".into(), Value::Bool(true));
        }
        if with_all_day_column {
            record.insert("all_day".into(), Value::Bool(self.all_day));
        }
        record
    }
}

impl CacheEntry for Event {
    type SortKey = DateTime<FixedOffset>;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn sort_key(&self) -> Self::SortKey {
        self.starts_at
    }
}

/// Changes a drag or resize may make. Title and owner are deliberately not representable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub starts_at: Option<DateTime<FixedOffset>>,
    pub ends_at: Option<DateTime<FixedOffset>>,
    pub all_day: Option<bool>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.starts_at.is_none() && self.ends_at.is_none() && self.all_day.is_none()
    }

    pub fn to_record(&self, with_all_day_column: bool) -> Record {
        let mut record = Record::new();
        if let Some(starts_at) = self.starts_at {
            record.insert("starts_at".into(), json!(starts_at.to_rfc3339()));
        }
        if let Some(ends_at) = self.ends_at {
            record.insert("ends_at".into(), json!(ends_at.to_rfc3339()));
        }
        if let (Some(all_day), true) = (self.all_day, with_all_day_column) {
            record.insert("all_day".into(), Value::Bool(all_day));
        }
        record
    }
}

/// Primary keys come back as integers or strings depending on the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileJoin {
    pub display_name: Option<String>,
}

/// Row of the events table as the remote store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: RecordId,
    pub title: String,
    pub starts_at: String,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub all_day: Option<bool>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub is_together: Option<bool>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub profiles: Option<ProfileJoin>,
}

impl StoredEvent {
    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record))
    }

    /// Name carried by the row itself, from a dedicated column or an embedded profile join.
    pub fn embedded_owner_name(&self) -> Option<&str> {
        self.owner_name
            .as_deref()
            .or_else(|| self.profiles.as_ref().and_then(|p| p.display_name.as_deref()))
            .filter(|name| !name.trim().is_empty())
    }
}
