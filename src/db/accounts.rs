use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{collect_rows, Database};
use crate::error::{AllocatorError, Result};
use crate::models::{EmailAccount, NewEmailAccount};
use crate::schema::email_accounts;

const DEFAULT_PROVIDER: &str = "gmail";

fn map_account(row: &Row<'_>) -> rusqlite::Result<EmailAccount> {
    Ok(EmailAccount {
        id: row.get(email_accounts::ID)?,
        user_id: row.get(email_accounts::USER_ID)?,
        email_address: row.get(email_accounts::EMAIL_ADDRESS)?,
        provider: row.get(email_accounts::PROVIDER)?,
        last_sync_at: row.get(email_accounts::LAST_SYNC_AT)?,
        created_at: row.get(email_accounts::CREATED_AT)?,
    })
}

impl Database {
    /// Register a mail account
    pub fn create_account(&self, new_account: &NewEmailAccount) -> Result<EmailAccount> {
        let conn = self.get_connection()?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                email_accounts::TABLE,
                email_accounts::USER_ID,
                email_accounts::EMAIL_ADDRESS,
                email_accounts::PROVIDER,
                email_accounts::CREATED_AT
            ),
            params![
                new_account.user_id,
                new_account.email_address.trim(),
                new_account.provider.as_deref().unwrap_or(DEFAULT_PROVIDER),
                Utc::now()
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.get_account(id)?
            .ok_or_else(|| AllocatorError::not_found("account", id))
    }

    /// Get a mail account by ID
    pub fn get_account(&self, id: i64) -> Result<Option<EmailAccount>> {
        let conn = self.get_connection()?;

        let account = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    email_accounts::TABLE,
                    email_accounts::ID
                ),
                params![id],
                map_account,
            )
            .optional()?;

        Ok(account)
    }

    pub fn list_accounts(&self, user_id: i64) -> Result<Vec<EmailAccount>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC",
            email_accounts::TABLE,
            email_accounts::USER_ID,
            email_accounts::ID
        ))?;
        let rows = stmt.query_map(params![user_id], map_account)?;

        collect_rows(rows)
    }

    /// Record a completed sync
    pub fn touch_account_sync(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {} = ?",
                email_accounts::TABLE,
                email_accounts::LAST_SYNC_AT,
                email_accounts::ID
            ),
            params![at, id],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("account", id));
        }
        Ok(())
    }
}
