use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{collect_rows, Database};
use crate::error::{AllocatorError, Result};
use crate::models::{CompanyEmailPattern, NewPattern, PatternPatch, PatternType};
use crate::schema::{companies, company_email_patterns as patterns};

fn map_pattern(row: &Row<'_>) -> rusqlite::Result<CompanyEmailPattern> {
    Ok(CompanyEmailPattern {
        id: row.get(patterns::ID)?,
        company_id: row.get(patterns::COMPANY_ID)?,
        pattern_type: row.get(patterns::PATTERN_TYPE)?,
        pattern_value: row.get(patterns::PATTERN_VALUE)?,
        priority: row.get(patterns::PRIORITY)?,
        enabled: row.get(patterns::ENABLED)?,
        created_at: row.get(patterns::CREATED_AT)?,
        updated_at: row.get(patterns::UPDATED_AT)?,
    })
}

impl Database {
    /// Insert a rule as given; callers normalize the value first.
    pub fn create_pattern(&self, company_id: i64, new_pattern: &NewPattern) -> Result<CompanyEmailPattern> {
        let conn = self.get_connection()?;
        let now = Utc::now();

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                patterns::TABLE,
                patterns::COMPANY_ID,
                patterns::PATTERN_TYPE,
                patterns::PATTERN_VALUE,
                patterns::PRIORITY,
                patterns::ENABLED,
                patterns::CREATED_AT,
                patterns::UPDATED_AT
            ),
            params![
                company_id,
                new_pattern.pattern_type,
                new_pattern.pattern_value,
                new_pattern.priority.unwrap_or(0),
                new_pattern.enabled.unwrap_or(true),
                now,
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.get_pattern(id)?
            .ok_or_else(|| AllocatorError::not_found("pattern", id))
    }

    /// Get a rule by ID
    pub fn get_pattern(&self, id: i64) -> Result<Option<CompanyEmailPattern>> {
        let conn = self.get_connection()?;

        let pattern = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", patterns::TABLE, patterns::ID),
                params![id],
                map_pattern,
            )
            .optional()?;

        Ok(pattern)
    }

    /// Rules of a company, highest priority first, ties by lowest id
    pub fn list_patterns_by_company(&self, company_id: i64) -> Result<Vec<CompanyEmailPattern>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} DESC, {} ASC",
            patterns::TABLE,
            patterns::COMPANY_ID,
            patterns::PRIORITY,
            patterns::ID
        ))?;
        let rows = stmt.query_map(params![company_id], map_pattern)?;

        collect_rows(rows)
    }

    /// Enabled rules of one kind across a user's companies, highest priority first, ties by lowest id
    pub fn list_enabled_patterns(&self, user_id: i64, pattern_type: PatternType) -> Result<Vec<CompanyEmailPattern>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT p.* FROM {patterns} p JOIN {companies} c ON p.{company_fk} = c.{company_id} \
             WHERE c.{user_id} = ? AND p.{ty} = ? AND p.{enabled} = 1 \
             ORDER BY p.{priority} DESC, p.{id} ASC",
            patterns = patterns::TABLE,
            companies = companies::TABLE,
            company_fk = patterns::COMPANY_ID,
            company_id = companies::ID,
            user_id = companies::USER_ID,
            ty = patterns::PATTERN_TYPE,
            enabled = patterns::ENABLED,
            priority = patterns::PRIORITY,
            id = patterns::ID
        ))?;
        let rows = stmt.query_map(params![user_id, pattern_type], map_pattern)?;

        collect_rows(rows)
    }

    /// Apply a partial update; callers normalize any new value first
    pub fn update_pattern(&self, id: i64, patch: &PatternPatch) -> Result<CompanyEmailPattern> {
        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {table} SET {ty} = COALESCE(?1, {ty}), {value} = COALESCE(?2, {value}), \
                 {priority} = COALESCE(?3, {priority}), {enabled} = COALESCE(?4, {enabled}), \
                 {updated} = ?5 WHERE {id_col} = ?6",
                table = patterns::TABLE,
                ty = patterns::PATTERN_TYPE,
                value = patterns::PATTERN_VALUE,
                priority = patterns::PRIORITY,
                enabled = patterns::ENABLED,
                updated = patterns::UPDATED_AT,
                id_col = patterns::ID
            ),
            params![
                patch.pattern_type,
                patch.pattern_value,
                patch.priority,
                patch.enabled,
                Utc::now(),
                id
            ],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("pattern", id));
        }

        self.get_pattern(id)?
            .ok_or_else(|| AllocatorError::not_found("pattern", id))
    }

    pub fn set_pattern_enabled(&self, id: i64, enabled: bool) -> Result<CompanyEmailPattern> {
        self.update_pattern(
            id,
            &PatternPatch {
                enabled: Some(enabled),
                ..PatternPatch::default()
            },
        )
    }

    /// Delete a rule; fails with `NotFound` for an unknown id
    pub fn delete_pattern(&self, id: i64) -> Result<()> {
        let conn = self.get_connection()?;

        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?", patterns::TABLE, patterns::ID),
            params![id],
        )?;

        if deleted == 0 {
            return Err(AllocatorError::not_found("pattern", id));
        }
        Ok(())
    }
}
