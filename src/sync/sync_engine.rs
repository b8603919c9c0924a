use std::cell::RefCell;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use thiserror::Error;

use crate::calendar::event::{Event, EventPatch, StoredEvent};
use crate::calendar::mapper::{DisplayEvent, EventMapper, MapError};
use crate::calendar::range::EventRange;
use crate::calendar::time_input::parse_time_input;
use crate::prompt::Prompter;
use crate::storage::cache::{CacheEntry, CacheError, EventCache};
use crate::storage::config::Config;
use crate::sync::mutation::{Mutation, MutationKind, MutationLog};
use crate::sync::remote::{Filter, OrderBy, Record, RemoteError, RemoteStore};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Could not save change: {0}")]
    RemoteWrite(String),
    #[error("Could not load: {0}")]
    RemoteRead(String),
    #[error("No event with id {0}")]
    UnknownEvent(String),
    #[error("{0} is still being saved, try again in a moment")]
    NotYetSaved(String),
    #[error("{0} cannot end before it starts")]
    InvalidRange(String),
    #[error("Unreadable record from backend: {0}")]
    Mapping(#[from] MapError),
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::UnknownEntry(id) => SyncError::UnknownEvent(id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub events_table: String,
    pub all_day_column: bool,
    pub user_id: String,
    pub past_days: u32,
    pub future_days: u32,
    pub offset: FixedOffset,
}

impl EngineSettings {
    pub fn from_config(config: &Config, offset: FixedOffset) -> Self {
        Self {
            events_table: config.backend.events_table.clone(),
            all_day_column: config.backend.all_day_column,
            user_id: config.session.user_id.clone(),
            past_days: config.sync.past_days,
            future_days: config.sync.future_days,
            offset,
        }
    }
}

/// Extra input for a range selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionOptions {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub is_together: bool,
}

/// Applies manually typed times to a selection. Without times the selection's own bounds
/// decide whether it is all-day. Unparseable times make it an all-day event over the
/// selected days.
pub fn resolve_selection(range: &EventRange, options: &SelectionOptions) -> EventRange {
    let Some(raw_start) = options.start_time.as_deref() else {
        return EventRange::inferred(range.start, range.end);
    };

    let offset = *range.start.offset();
    let first_day = range.start.date_naive();
    let last_day = last_selected_day(range);

    let start_time = match parse_time_input(raw_start) {
        Ok(time) => time,
        Err(err) => {
            tracing::warn!("{}; treating selection as all-day", err);
            return EventRange::whole_days(first_day, last_day, offset)
                .unwrap_or_else(|| EventRange::inferred(range.start, range.end));
        }
    };

    let Some(start) = at_time(first_day, start_time.to_naive_time(), offset) else {
        return EventRange::inferred(range.start, range.end);
    };

    let end = options
        .end_time
        .as_deref()
        .and_then(|raw_end| match parse_time_input(raw_end) {
            Ok(time) => Some(time),
            Err(err) => {
                tracing::warn!("{}; using a one hour event", err);
                None
            }
        })
        .and_then(|time| at_time(last_day, time.to_naive_time(), offset))
        .filter(|end| *end > start);

    EventRange::new(start, end, false)
}

fn last_selected_day(range: &EventRange) -> NaiveDate {
    let end = range.end.naive_local();
    if end.time() == NaiveTime::MIN && range.end > range.start {
        (end - Duration::days(1)).date()
    } else {
        end.date()
    }
}

fn at_time(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    offset.from_local_datetime(&date.and_time(time)).single()
}

/// Patch holding only the fields `range` changes on `event`.
fn changed_fields(event: &Event, range: &EventRange) -> EventPatch {
    EventPatch {
        starts_at: (event.starts_at != range.start).then_some(range.start),
        ends_at: (event.ends_at != range.end).then_some(range.end),
        all_day: (event.all_day != range.all_day).then_some(range.all_day),
    }
}

/// Owns every call to the remote store for events and reconciles each one with the local
/// cache. The cache is only borrowed between awaits, so gestures may overlap on one thread.
pub struct SyncEngine<S: RemoteStore> {
    store: S,
    mapper: EventMapper,
    prompter: Box<dyn Prompter>,
    settings: EngineSettings,
    cache: RefCell<EventCache>,
    mutations: MutationLog,
}

impl<S: RemoteStore> SyncEngine<S> {
    pub fn new(
        store: S,
        mapper: EventMapper,
        prompter: Box<dyn Prompter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            mapper,
            prompter,
            settings,
            cache: RefCell::new(EventCache::new()),
            mutations: MutationLog::default(),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.cache.borrow().entries().to_vec()
    }

    pub fn event(&self, id: &str) -> Option<Event> {
        self.cache.borrow().get(id).cloned()
    }

    pub fn display_events(&self) -> Vec<DisplayEvent> {
        self.cache
            .borrow()
            .iter()
            .map(|event| self.mapper.to_display(event))
            .collect()
    }

    pub fn mapper(&self) -> &EventMapper {
        &self.mapper
    }

    pub fn in_flight(&self) -> usize {
        self.mutations.in_flight()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.history()
    }

    /// Replaces the cache with events overlapping `[from, to]`. Concurrent loads are not
    /// coalesced: whichever resumes last wins. On failure the cache keeps its contents.
    pub async fn load(&self, from: NaiveDate, to: NaiveDate) -> Result<usize, SyncError> {
        let offset = self.settings.offset;
        let window_start = at_time(from, NaiveTime::MIN, offset);
        let window_end = to.succ_opt().and_then(|day| at_time(day, NaiveTime::MIN, offset));
        let (Some(window_start), Some(window_end)) = (window_start, window_end) else {
            let message = format!("Invalid window {} to {}", from, to);
            return Err(self.report(SyncError::RemoteRead(message)));
        };

        // Rows without an end last one hour from their start.
        let filter = Filter::all().lt("starts_at", window_end.to_rfc3339()).any_of(vec![
            Filter::all().gt("ends_at", window_start.to_rfc3339()),
            Filter::all()
                .is_null("ends_at")
                .gt("starts_at", (window_start - Duration::hours(1)).to_rfc3339()),
        ]);

        tracing::info!("Loading events from {} to {}", from, to);
        let records = self
            .store
            .select(&self.settings.events_table, &filter, &OrderBy::asc("starts_at"))
            .await
            .map_err(|err| self.report(SyncError::RemoteRead(err.message)))?;

        let events: Vec<Event> = records
            .into_iter()
            .filter_map(|record| match self.map_record(record) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!("Skipping event: {}", err);
                    None
                }
            })
            .collect();

        let count = events.len();
        let mut cache = self.cache.borrow_mut();
        if cache.pending_count() > 0 {
            tracing::warn!("Reloading with {} unsaved changes", cache.pending_count());
        }
        cache.load(events);
        tracing::info!("Loaded {} events", count);
        Ok(count)
    }

    pub async fn load_around(&self, center: NaiveDate) -> Result<usize, SyncError> {
        let from = center
            .checked_sub_days(chrono::Days::new(self.settings.past_days as u64))
            .unwrap_or(center);
        let to = center
            .checked_add_days(chrono::Days::new(self.settings.future_days as u64))
            .unwrap_or(center);
        self.load(from, to).await
    }

    /// Creates an event for a selected range. Asks for a title when none is given; returns
    /// `Ok(None)` when the user cancels.
    pub async fn on_range_selected(
        &self,
        range: EventRange,
        title: Option<String>,
        options: SelectionOptions,
    ) -> Result<Option<Event>, SyncError> {
        let title = title
            .or_else(|| self.prompter.ask_text("Title for the event?"))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        let Some(title) = title else {
            tracing::debug!("Range selection cancelled");
            return Ok(None);
        };

        let range = resolve_selection(&range, &options);
        let mut draft = Event::draft(title, range, self.settings.user_id.clone());
        draft.location = options.location.filter(|l| !l.trim().is_empty());
        draft.description = options.description.filter(|d| !d.trim().is_empty());
        draft.is_together = options.is_together;

        let record = draft.to_insert_record(self.settings.all_day_column);
        let mutation = self.mutations.begin(MutationKind::Create, &draft.title);
        let handle = self.cache.borrow_mut().insert_optimistic(draft.clone());

        let outcome = self
            .store
            .insert(&self.settings.events_table, record)
            .await
            .and_then(|row| self.confirmed_event(row, &draft));

        let reconciled = self.cache.borrow_mut().reconcile_insert(handle, outcome);
        self.mutations.finish(mutation, reconciled.is_ok());

        match reconciled {
            Ok(event) => Ok(Some(event)),
            Err(err) => Err(self.report(SyncError::RemoteWrite(err.message))),
        }
    }

    /// Persists a drag or resize. Only start, end and the all-day flag are sent.
    pub async fn on_drag_or_resize(
        &self,
        event_id: &str,
        new_range: EventRange,
    ) -> Result<(), SyncError> {
        let current = self.saved_event(event_id)?;
        if !new_range.is_valid() {
            return Err(self.report(SyncError::InvalidRange(current.title)));
        }
        let patch = changed_fields(&current, &new_range);
        if patch.is_empty() {
            return Ok(());
        }

        let mutation = self.mutations.begin(MutationKind::Update, event_id);
        let handle = self
            .cache
            .borrow_mut()
            .update_optimistic(event_id, |event| event.apply(&patch))?;

        let outcome = self
            .store
            .update(
                &self.settings.events_table,
                event_id,
                patch.to_record(self.settings.all_day_column),
            )
            .await;

        let reconciled = self.cache.borrow_mut().reconcile_update(handle, outcome);
        self.mutations.finish(mutation, reconciled.is_ok());
        reconciled.map_err(|err| self.report(SyncError::RemoteWrite(err.message)))
    }

    pub async fn on_delete_confirmed(&self, event_id: &str) -> Result<(), SyncError> {
        self.saved_event(event_id)?;

        let mutation = self.mutations.begin(MutationKind::Delete, event_id);
        let handle = self.cache.borrow_mut().remove_optimistic(event_id)?;

        let outcome = self.store.delete(&self.settings.events_table, event_id).await;

        let reconciled = self.cache.borrow_mut().reconcile_remove(handle, outcome);
        self.mutations.finish(mutation, reconciled.is_ok());
        reconciled.map_err(|err| self.report(SyncError::RemoteWrite(err.message)))
    }

    /// Shows the event's details and deletes it if the user confirms. Returns whether it was
    /// deleted.
    pub async fn on_event_clicked(&self, event_id: &str) -> Result<bool, SyncError> {
        let event = self.saved_event(event_id)?;
        if !self.prompter.ask_confirmation(&self.mapper.describe(&event)) {
            return Ok(false);
        }
        self.on_delete_confirmed(event_id).await?;
        Ok(true)
    }

    fn saved_event(&self, event_id: &str) -> Result<Event, SyncError> {
        let event = self
            .event(event_id)
            .ok_or_else(|| self.report(SyncError::UnknownEvent(event_id.to_string())))?;
        if event.is_unconfirmed() {
            return Err(self.report(SyncError::NotYetSaved(event.title)));
        }
        Ok(event)
    }

    fn map_record(&self, record: Record) -> Result<Event, MapError> {
        let stored = StoredEvent::from_record(record)?;
        self.mapper.to_event(stored)
    }

    /// Event as confirmed by the store. A row the mapper cannot read still yields the draft
    /// under its new id, since the write itself succeeded. Without an id there is nothing to
    /// keep in the cache.
    fn confirmed_event(&self, row: Record, draft: &Event) -> Result<Event, RemoteError> {
        let id = match row.get("id") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(serde_json::Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        match self.map_record(row) {
            Ok(event) => Ok(event),
            Err(err) => {
                tracing::warn!("Created event returned an unreadable row: {}", err);
                let id = id.ok_or_else(|| RemoteError::new("Created row came back without an id"))?;
                Ok(Event {
                    id,
                    ..draft.clone()
                })
            }
        }
    }

    fn report(&self, err: SyncError) -> SyncError {
        tracing::warn!("{}", err);
        self.prompter.notify(&err.to_string());
        err
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        SyncError::RemoteWrite(err.message)
    }
}
