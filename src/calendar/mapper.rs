use std::collections::HashMap;

use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::calendar::event::{Event, StoredEvent};
use crate::calendar::range::{is_all_day_range, parse_timestamp, EventRange};
use crate::storage::cache::CacheEntry;
use crate::storage::config::PaletteConfig;

pub const UNKNOWN_OWNER: &str = "Unknown";

#[derive(Debug, Error)]
pub enum MapError {
    #[error("Event {id} has an unreadable timestamp: '{value}'")]
    InvalidTimestamp { id: String, value: String },
    #[error("Malformed event record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Looks up human-readable names for user ids.
#[cfg_attr(test, mockall::automock)]
pub trait ProfileDirectory {
    fn display_name(&self, user_id: &str) -> Option<String>;
}

impl ProfileDirectory for HashMap<String, String> {
    fn display_name(&self, user_id: &str) -> Option<String> {
        self.get(user_id).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorPalette {
    pub together: String,
    pub fallback: String,
    pub owners: HashMap<String, String>,
}

impl ColorPalette {
    pub fn color_for(&self, event: &Event) -> &str {
        if event.is_together {
            return &self.together;
        }
        self.owners
            .get(&event.owner_id)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

impl From<&PaletteConfig> for ColorPalette {
    fn from(config: &PaletteConfig) -> Self {
        Self {
            together: config.together.clone(),
            fallback: config.fallback.clone(),
            owners: config.owners.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayEvent {
    pub id: String,
    pub title: String,
    pub start: String,
    pub end: String,
    pub all_day: bool,
    pub background_color: String,
    pub extended_props: ExtendedProps,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedProps {
    pub location: Option<String>,
    pub description: Option<String>,
    pub created_by: String,
    pub display_name: String,
    pub is_together: bool,
    pub pending: bool,
}

pub struct EventMapper {
    palette: ColorPalette,
    profiles: Box<dyn ProfileDirectory>,
    default_offset: FixedOffset,
}

impl EventMapper {
    pub fn new(palette: ColorPalette, profiles: Box<dyn ProfileDirectory>) -> Self {
        Self {
            palette,
            profiles,
            default_offset: Utc.fix(),
        }
    }

    /// Offset applied to stored timestamps that carry none.
    pub fn with_default_offset(mut self, offset: FixedOffset) -> Self {
        self.default_offset = offset;
        self
    }

    pub fn to_event(&self, stored: StoredEvent) -> Result<Event, MapError> {
        let id = stored.id.to_string();
        let invalid = |value: &str| MapError::InvalidTimestamp {
            id: id.clone(),
            value: value.to_string(),
        };

        let start = parse_timestamp(&stored.starts_at, self.default_offset)
            .ok_or_else(|| invalid(&stored.starts_at))?;

        let range = match stored.ends_at.as_deref() {
            Some(raw_end) => {
                let end = parse_timestamp(raw_end, self.default_offset)
                    .ok_or_else(|| invalid(raw_end))?;
                let all_day =
                    stored.all_day.unwrap_or(false) || is_all_day_range(&stored.starts_at, raw_end);
                EventRange { start, end, all_day }
            }
            None => EventRange::new(start, None, stored.all_day.unwrap_or(false)),
        };

        let owner_name = stored.embedded_owner_name().map(str::to_string);

        Ok(Event {
            id,
            title: stored.title,
            starts_at: range.start,
            ends_at: range.end,
            all_day: range.all_day,
            owner_id: stored.created_by.unwrap_or_default(),
            owner_name,
            is_together: stored.is_together.unwrap_or(false),
            location: stored.location,
            description: stored.description,
        })
    }

    pub fn owner_name(&self, event: &Event) -> String {
        event
            .owner_name
            .clone()
            .or_else(|| self.profiles.display_name(&event.owner_id))
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string())
    }

    pub fn to_display(&self, event: &Event) -> DisplayEvent {
        let display_name = self.owner_name(event);
        let (start, end) = if event.all_day {
            (
                event.starts_at.date_naive().to_string(),
                event.ends_at.date_naive().to_string(),
            )
        } else {
            (event.starts_at.to_rfc3339(), event.ends_at.to_rfc3339())
        };

        DisplayEvent {
            id: event.id.clone(),
            title: format!("{} ({})", event.title, display_name),
            start,
            end,
            all_day: event.all_day,
            background_color: self.palette.color_for(event).to_string(),
            extended_props: ExtendedProps {
                location: event.location.clone(),
                description: event.description.clone(),
                created_by: event.owner_id.clone(),
                display_name,
                is_together: event.is_together,
                pending: event.is_unconfirmed(),
            },
        }
    }

    /// Details text shown before asking whether to delete an event.
    pub fn describe(&self, event: &Event) -> String {
        let (from, to) = if event.all_day {
            (
                event.starts_at.format("%Y-%m-%d").to_string(),
                (event.ends_at - chrono::Duration::days(1)).format("%Y-%m-%d").to_string(),
            )
        } else {
            (
                event.starts_at.format("%Y-%m-%d %H:%M").to_string(),
                event.ends_at.format("%Y-%m-%d %H:%M").to_string(),
            )
        };
        let or_dash = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .unwrap_or("-")
                .to_string()
        };

        format!(
            "Title: {}\nFrom: {}\nTo: {}\nLocation: {}\nDescription: {}\nCreated by: {}\n\nDelete this event?",
            event.title,
            from,
            to,
            or_dash(&event.location),
            or_dash(&event.description),
            self.owner_name(event),
        )
    }
}
