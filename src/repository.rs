use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::Result;
use crate::models::{EsEntry, Event, NewEsEntry, NewEvent};

/// Persistence for the records the classifier derives from messages
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Store a new event and return it with its id
    async fn create_event(&self, event: NewEvent) -> Result<Event>;

    /// Link an event to its mirrored external calendar entry
    async fn attach_calendar_id(&self, event_id: i64, external_id: &str) -> Result<()>;

    /// Store a new entry-sheet record and return it with its id
    async fn create_es_entry(&self, entry: NewEsEntry) -> Result<EsEntry>;
}

/// What gets sent to an external calendar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEventRequest {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: String,
}

/// An external calendar that new events are copied into
#[async_trait]
pub trait CalendarMirror: Send + Sync {
    /// Create the entry and return its external id
    async fn create_event(&self, request: &CalendarEventRequest) -> Result<String>;
}

#[async_trait]
impl ScheduleRepository for Database {
    async fn create_event(&self, event: NewEvent) -> Result<Event> {
        self.run_blocking(move |db| db.create_event(&event)).await
    }

    async fn attach_calendar_id(&self, event_id: i64, external_id: &str) -> Result<()> {
        let external_id = external_id.to_owned();
        self.run_blocking(move |db| db.attach_calendar_id(event_id, &external_id).map(|_| ()))
            .await
    }

    async fn create_es_entry(&self, entry: NewEsEntry) -> Result<EsEntry> {
        self.run_blocking(move |db| db.create_es_entry(&entry)).await
    }
}
