use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{collect_rows, Database};
use crate::error::{AllocatorError, Result};
use crate::models::{Company, CompanyPatch, NewCompany, DEFAULT_COMPANY_STATUS};
use crate::schema::companies;

fn map_company(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(companies::ID)?,
        user_id: row.get(companies::USER_ID)?,
        name: row.get(companies::NAME)?,
        industry: row.get(companies::INDUSTRY)?,
        url: row.get(companies::URL)?,
        status: row.get(companies::STATUS)?,
        memo: row.get(companies::MEMO)?,
        created_at: row.get(companies::CREATED_AT)?,
        updated_at: row.get(companies::UPDATED_AT)?,
    })
}

impl Database {
    /// Insert a company and return the stored row
    pub fn create_company(&self, new_company: &NewCompany) -> Result<Company> {
        let conn = self.get_connection()?;
        let now = Utc::now();

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                companies::TABLE,
                companies::USER_ID,
                companies::NAME,
                companies::INDUSTRY,
                companies::URL,
                companies::STATUS,
                companies::MEMO,
                companies::CREATED_AT,
                companies::UPDATED_AT
            ),
            params![
                new_company.user_id,
                new_company.name,
                new_company.industry,
                new_company.url,
                new_company.status.as_deref().unwrap_or(DEFAULT_COMPANY_STATUS),
                new_company.memo,
                now,
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.get_company(id)?
            .ok_or_else(|| AllocatorError::not_found("company", id))
    }

    /// Get a company by ID
    pub fn get_company(&self, id: i64) -> Result<Option<Company>> {
        let conn = self.get_connection()?;

        let company = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", companies::TABLE, companies::ID),
                params![id],
                map_company,
            )
            .optional()?;

        Ok(company)
    }

    /// All companies of a user, oldest first
    pub fn list_companies(&self, user_id: i64) -> Result<Vec<Company>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC",
            companies::TABLE,
            companies::USER_ID,
            companies::ID
        ))?;
        let rows = stmt.query_map(params![user_id], map_company)?;

        collect_rows(rows)
    }

    /// Companies of a user whose name contains `query` (SQLite `LIKE`, ASCII case-insensitive)
    pub fn search_companies(&self, user_id: i64, query: &str) -> Result<Vec<Company>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? AND {} LIKE '%' || ? || '%' ORDER BY {} ASC",
            companies::TABLE,
            companies::USER_ID,
            companies::NAME,
            companies::ID
        ))?;
        let rows = stmt.query_map(params![user_id, query], map_company)?;

        collect_rows(rows)
    }

    /// Apply a partial update; fails with `NotFound` for an unknown id
    pub fn update_company(&self, id: i64, patch: &CompanyPatch) -> Result<Company> {
        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {table} SET {name} = COALESCE(?1, {name}), {industry} = COALESCE(?2, {industry}), \
                 {url} = COALESCE(?3, {url}), {status} = COALESCE(?4, {status}), \
                 {memo} = COALESCE(?5, {memo}), {updated} = ?6 WHERE {id_col} = ?7",
                table = companies::TABLE,
                name = companies::NAME,
                industry = companies::INDUSTRY,
                url = companies::URL,
                status = companies::STATUS,
                memo = companies::MEMO,
                updated = companies::UPDATED_AT,
                id_col = companies::ID
            ),
            params![
                patch.name,
                patch.industry,
                patch.url,
                patch.status,
                patch.memo,
                Utc::now(),
                id
            ],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("company", id));
        }

        self.get_company(id)?
            .ok_or_else(|| AllocatorError::not_found("company", id))
    }

    /// Delete a company. Its rules cascade; messages and schedule records are detached.
    pub fn delete_company(&self, id: i64) -> Result<()> {
        let conn = self.get_connection()?;

        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?", companies::TABLE, companies::ID),
            params![id],
        )?;

        if deleted == 0 {
            return Err(AllocatorError::not_found("company", id));
        }

        Ok(())
    }
}
