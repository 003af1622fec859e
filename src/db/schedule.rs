use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{collect_rows, Database};
use crate::error::{AllocatorError, Result};
use crate::models::{EsEntry, EsEntryPatch, Event, EventPatch, NewEsEntry, NewEvent};
use crate::schema::{es_entries, events};
use crate::validation::InputValidator;

fn map_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(events::ID)?,
        user_id: row.get(events::USER_ID)?,
        company_id: row.get(events::COMPANY_ID)?,
        title: row.get(events::TITLE)?,
        description: row.get(events::DESCRIPTION)?,
        start_at: row.get(events::START_AT)?,
        end_at: row.get(events::END_AT)?,
        all_day: row.get(events::ALL_DAY)?,
        location: row.get(events::LOCATION)?,
        event_type: row.get(events::EVENT_TYPE)?,
        remind_before_minutes: row.get(events::REMIND_BEFORE_MINUTES)?,
        slack_notify: row.get(events::SLACK_NOTIFY)?,
        google_calendar_event_id: row.get(events::GOOGLE_CALENDAR_EVENT_ID)?,
        created_at: row.get(events::CREATED_AT)?,
        updated_at: row.get(events::UPDATED_AT)?,
    })
}

fn map_es_entry(row: &Row<'_>) -> rusqlite::Result<EsEntry> {
    Ok(EsEntry {
        id: row.get(es_entries::ID)?,
        user_id: row.get(es_entries::USER_ID)?,
        company_id: row.get(es_entries::COMPANY_ID)?,
        title: row.get(es_entries::TITLE)?,
        deadline: row.get(es_entries::DEADLINE)?,
        status: row.get(es_entries::STATUS)?,
        memo: row.get(es_entries::MEMO)?,
        google_calendar_event_id: row.get(es_entries::GOOGLE_CALENDAR_EVENT_ID)?,
        created_at: row.get(es_entries::CREATED_AT)?,
        updated_at: row.get(es_entries::UPDATED_AT)?,
    })
}

impl Database {
    /// Insert an event and return the stored row
    pub fn create_event(&self, new_event: &NewEvent) -> Result<Event> {
        InputValidator::validate_event_window(new_event.start_at, new_event.end_at)?;
        let conn = self.get_connection()?;
        let now = Utc::now();

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                events::TABLE,
                events::USER_ID,
                events::COMPANY_ID,
                events::TITLE,
                events::DESCRIPTION,
                events::START_AT,
                events::END_AT,
                events::ALL_DAY,
                events::LOCATION,
                events::EVENT_TYPE,
                events::REMIND_BEFORE_MINUTES,
                events::SLACK_NOTIFY,
                events::CREATED_AT,
                events::UPDATED_AT
            ),
            params![
                new_event.user_id,
                new_event.company_id,
                new_event.title,
                new_event.description,
                new_event.start_at,
                new_event.end_at,
                new_event.all_day,
                new_event.location,
                new_event.event_type,
                new_event.remind_before_minutes,
                new_event.slack_notify,
                now,
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.get_event(id)?
            .ok_or_else(|| AllocatorError::not_found("event", id))
    }

    /// Get an event by ID
    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        let conn = self.get_connection()?;

        let event = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", events::TABLE, events::ID),
                params![id],
                map_event,
            )
            .optional()?;

        Ok(event)
    }

    /// Events of a user, earliest start first
    pub fn list_events(&self, user_id: i64) -> Result<Vec<Event>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC, {} ASC",
            events::TABLE,
            events::USER_ID,
            events::START_AT,
            events::ID
        ))?;
        let rows = stmt.query_map(params![user_id], map_event)?;

        collect_rows(rows)
    }

    /// Events linked to a company, earliest start first
    pub fn list_events_by_company(&self, company_id: i64) -> Result<Vec<Event>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC, {} ASC",
            events::TABLE,
            events::COMPANY_ID,
            events::START_AT,
            events::ID
        ))?;
        let rows = stmt.query_map(params![company_id], map_event)?;

        collect_rows(rows)
    }

    /// Apply a partial update to an event
    pub fn update_event(&self, id: i64, patch: &EventPatch) -> Result<Event> {
        if patch.start_at.is_some() || patch.end_at.is_some() {
            let current = self
                .get_event(id)?
                .ok_or_else(|| AllocatorError::not_found("event", id))?;
            InputValidator::validate_event_window(
                patch.start_at.unwrap_or(current.start_at),
                patch.end_at.or(current.end_at),
            )?;
        }

        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {table} SET {title} = COALESCE(?1, {title}), {description} = COALESCE(?2, {description}), \
                 {start} = COALESCE(?3, {start}), {end} = COALESCE(?4, {end}), \
                 {location} = COALESCE(?5, {location}), {ty} = COALESCE(?6, {ty}), \
                 {remind} = COALESCE(?7, {remind}), {slack} = COALESCE(?8, {slack}), \
                 {gcal} = COALESCE(?9, {gcal}), {updated} = ?10 WHERE {id_col} = ?11",
                table = events::TABLE,
                title = events::TITLE,
                description = events::DESCRIPTION,
                start = events::START_AT,
                end = events::END_AT,
                location = events::LOCATION,
                ty = events::EVENT_TYPE,
                remind = events::REMIND_BEFORE_MINUTES,
                slack = events::SLACK_NOTIFY,
                gcal = events::GOOGLE_CALENDAR_EVENT_ID,
                updated = events::UPDATED_AT,
                id_col = events::ID
            ),
            params![
                patch.title,
                patch.description,
                patch.start_at,
                patch.end_at,
                patch.location,
                patch.event_type,
                patch.remind_before_minutes,
                patch.slack_notify,
                patch.google_calendar_event_id,
                Utc::now(),
                id
            ],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("event", id));
        }

        self.get_event(id)?
            .ok_or_else(|| AllocatorError::not_found("event", id))
    }

    /// Store the id of the external calendar entry mirroring an event
    pub fn attach_calendar_id(&self, event_id: i64, external_id: &str) -> Result<Event> {
        self.update_event(
            event_id,
            &EventPatch {
                google_calendar_event_id: Some(external_id.to_string()),
                ..EventPatch::default()
            },
        )
    }

    /// Insert an entry-sheet record and return the stored row
    pub fn create_es_entry(&self, new_entry: &NewEsEntry) -> Result<EsEntry> {
        let conn = self.get_connection()?;
        let now = Utc::now();

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                es_entries::TABLE,
                es_entries::USER_ID,
                es_entries::COMPANY_ID,
                es_entries::TITLE,
                es_entries::DEADLINE,
                es_entries::STATUS,
                es_entries::MEMO,
                es_entries::CREATED_AT,
                es_entries::UPDATED_AT
            ),
            params![
                new_entry.user_id,
                new_entry.company_id,
                new_entry.title,
                new_entry.deadline,
                new_entry.status,
                new_entry.memo,
                now,
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.get_es_entry(id)?
            .ok_or_else(|| AllocatorError::not_found("es entry", id))
    }

    pub fn get_es_entry(&self, id: i64) -> Result<Option<EsEntry>> {
        let conn = self.get_connection()?;

        let entry = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", es_entries::TABLE, es_entries::ID),
                params![id],
                map_es_entry,
            )
            .optional()?;

        Ok(entry)
    }

    /// Entry-sheet records of a user, nearest deadline first (records without one last)
    pub fn list_es_entries(&self, user_id: i64) -> Result<Vec<EsEntry>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {table} WHERE {user} = ? ORDER BY {deadline} IS NULL, {deadline} ASC, {id} ASC",
            table = es_entries::TABLE,
            user = es_entries::USER_ID,
            deadline = es_entries::DEADLINE,
            id = es_entries::ID
        ))?;
        let rows = stmt.query_map(params![user_id], map_es_entry)?;

        collect_rows(rows)
    }

    pub fn list_es_entries_by_company(&self, company_id: i64) -> Result<Vec<EsEntry>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {table} WHERE {company} = ? ORDER BY {deadline} IS NULL, {deadline} ASC, {id} ASC",
            table = es_entries::TABLE,
            company = es_entries::COMPANY_ID,
            deadline = es_entries::DEADLINE,
            id = es_entries::ID
        ))?;
        let rows = stmt.query_map(params![company_id], map_es_entry)?;

        collect_rows(rows)
    }

    /// Apply a partial update to an entry-sheet record
    pub fn update_es_entry(&self, id: i64, patch: &EsEntryPatch) -> Result<EsEntry> {
        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {table} SET {title} = COALESCE(?1, {title}), {deadline} = COALESCE(?2, {deadline}), \
                 {status} = COALESCE(?3, {status}), {memo} = COALESCE(?4, {memo}), \
                 {gcal} = COALESCE(?5, {gcal}), {updated} = ?6 WHERE {id_col} = ?7",
                table = es_entries::TABLE,
                title = es_entries::TITLE,
                deadline = es_entries::DEADLINE,
                status = es_entries::STATUS,
                memo = es_entries::MEMO,
                gcal = es_entries::GOOGLE_CALENDAR_EVENT_ID,
                updated = es_entries::UPDATED_AT,
                id_col = es_entries::ID
            ),
            params![
                patch.title,
                patch.deadline,
                patch.status,
                patch.memo,
                patch.google_calendar_event_id,
                Utc::now(),
                id
            ],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("es entry", id));
        }

        self.get_es_entry(id)?
            .ok_or_else(|| AllocatorError::not_found("es entry", id))
    }
}
