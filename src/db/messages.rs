use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{collect_rows, Database};
use crate::error::{AllocatorError, Result};
use crate::models::{AiStatus, AllocationMethod, EmailMessage, NewEmailMessage};
use crate::schema::{email_accounts, email_messages};

fn map_message(row: &Row<'_>) -> rusqlite::Result<EmailMessage> {
    Ok(EmailMessage {
        id: row.get(email_messages::ID)?,
        account_id: row.get(email_messages::ACCOUNT_ID)?,
        external_id: row.get(email_messages::MESSAGE_ID)?,
        subject: row.get(email_messages::SUBJECT)?,
        from_address: row.get(email_messages::FROM_ADDRESS)?,
        from_name: row.get(email_messages::FROM_NAME)?,
        body_text: row.get(email_messages::BODY_TEXT)?,
        body_html: row.get(email_messages::BODY_HTML)?,
        received_at: row.get(email_messages::RECEIVED_AT)?,
        is_read: row.get(email_messages::IS_READ)?,
        company_id: row.get(email_messages::COMPANY_ID)?,
        allocation_method: row.get(email_messages::ALLOCATION_METHOD)?,
        allocated_at: row.get(email_messages::ALLOCATED_AT)?,
        ai_processed: row.get(email_messages::AI_PROCESSED)?,
        ai_processed_at: row.get(email_messages::AI_PROCESSED_AT)?,
    })
}

impl Database {
    /// Store a message unless its external id is already known.
    ///
    /// Returns the stored row and whether it was newly inserted.
    pub fn insert_message_if_absent(&self, new_message: &NewEmailMessage) -> Result<(EmailMessage, bool)> {
        if let Some(existing) = self.get_message_by_external_id(&new_message.external_id)? {
            return Ok((existing, false));
        }

        let conn = self.get_connection()?;
        let now = Utc::now();

        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                email_messages::TABLE,
                email_messages::ACCOUNT_ID,
                email_messages::MESSAGE_ID,
                email_messages::SUBJECT,
                email_messages::FROM_ADDRESS,
                email_messages::FROM_NAME,
                email_messages::BODY_TEXT,
                email_messages::BODY_HTML,
                email_messages::RECEIVED_AT,
                email_messages::CREATED_AT,
                email_messages::UPDATED_AT
            ),
            params![
                new_message.account_id,
                new_message.external_id,
                new_message.subject,
                new_message.from_address.trim(),
                new_message.from_name,
                new_message.body_text,
                new_message.body_html,
                new_message.received_at,
                now,
                now
            ],
        )?;

        // A concurrent ingest may have won the race on the unique external id
        let stored = self
            .get_message_by_external_id(&new_message.external_id)?
            .ok_or_else(|| AllocatorError::not_found("message", conn.last_insert_rowid()))?;

        Ok((stored, inserted > 0))
    }

    /// Get a message by ID
    pub fn get_message(&self, id: i64) -> Result<Option<EmailMessage>> {
        let conn = self.get_connection()?;

        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    email_messages::TABLE,
                    email_messages::ID
                ),
                params![id],
                map_message,
            )
            .optional()?;

        Ok(message)
    }

    /// Get a message by its provider-side id
    pub fn get_message_by_external_id(&self, external_id: &str) -> Result<Option<EmailMessage>> {
        let conn = self.get_connection()?;

        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    email_messages::TABLE,
                    email_messages::MESSAGE_ID
                ),
                params![external_id],
                map_message,
            )
            .optional()?;

        Ok(message)
    }

    /// One page of an account's messages, newest first
    pub fn list_messages_by_account(&self, account_id: i64, limit: usize, offset: usize) -> Result<Vec<EmailMessage>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} DESC, {} DESC LIMIT ? OFFSET ?",
            email_messages::TABLE,
            email_messages::ACCOUNT_ID,
            email_messages::RECEIVED_AT,
            email_messages::ID
        ))?;
        let rows = stmt.query_map(
            params![account_id, to_sql_count(limit), to_sql_count(offset)],
            map_message,
        )?;

        collect_rows(rows)
    }

    /// Every message of an account, in insertion order
    pub fn list_all_messages_by_account(&self, account_id: i64) -> Result<Vec<EmailMessage>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC",
            email_messages::TABLE,
            email_messages::ACCOUNT_ID,
            email_messages::ID
        ))?;
        let rows = stmt.query_map(params![account_id], map_message)?;

        collect_rows(rows)
    }

    /// Messages allocated to a company, newest first
    pub fn list_messages_by_company(&self, company_id: i64) -> Result<Vec<EmailMessage>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} DESC, {} DESC",
            email_messages::TABLE,
            email_messages::COMPANY_ID,
            email_messages::RECEIVED_AT,
            email_messages::ID
        ))?;
        let rows = stmt.query_map(params![company_id], map_message)?;

        collect_rows(rows)
    }

    /// Messages of an account with no company, newest first
    pub fn list_unallocated_messages(&self, account_id: i64) -> Result<Vec<EmailMessage>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? AND {} IS NULL ORDER BY {} DESC, {} DESC",
            email_messages::TABLE,
            email_messages::ACCOUNT_ID,
            email_messages::COMPANY_ID,
            email_messages::RECEIVED_AT,
            email_messages::ID
        ))?;
        let rows = stmt.query_map(params![account_id], map_message)?;

        collect_rows(rows)
    }

    /// Messages across all of a user's accounts that the classifier has not seen, newest first
    pub fn list_unprocessed_messages(&self, user_id: i64) -> Result<Vec<EmailMessage>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT m.* FROM {messages} m JOIN {accounts} a ON m.{account_fk} = a.{account_id} \
             WHERE a.{user_id} = ? AND m.{ai} = ? ORDER BY m.{received} DESC, m.{id} DESC",
            messages = email_messages::TABLE,
            accounts = email_accounts::TABLE,
            account_fk = email_messages::ACCOUNT_ID,
            account_id = email_accounts::ID,
            user_id = email_accounts::USER_ID,
            ai = email_messages::AI_PROCESSED,
            received = email_messages::RECEIVED_AT,
            id = email_messages::ID
        ))?;
        let rows = stmt.query_map(params![user_id, AiStatus::Unprocessed], map_message)?;

        collect_rows(rows)
    }

    /// Messages of an account whose subject, sender or body contains `query`
    pub fn search_messages(&self, account_id: i64, query: &str) -> Result<Vec<EmailMessage>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {table} WHERE {account} = ?1 AND \
             ({subject} LIKE '%' || ?2 || '%' OR {from} LIKE '%' || ?2 || '%' OR {body} LIKE '%' || ?2 || '%') \
             ORDER BY {received} DESC, {id} DESC",
            table = email_messages::TABLE,
            account = email_messages::ACCOUNT_ID,
            subject = email_messages::SUBJECT,
            from = email_messages::FROM_ADDRESS,
            body = email_messages::BODY_TEXT,
            received = email_messages::RECEIVED_AT,
            id = email_messages::ID
        ))?;
        let rows = stmt.query_map(params![account_id, query], map_message)?;

        collect_rows(rows)
    }

    pub fn mark_message_read(&self, id: i64, is_read: bool) -> Result<()> {
        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?, {} = ? WHERE {} = ?",
                email_messages::TABLE,
                email_messages::IS_READ,
                email_messages::UPDATED_AT,
                email_messages::ID
            ),
            params![is_read, Utc::now(), id],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("message", id));
        }
        Ok(())
    }

    /// Overwrite the allocation columns of one message
    pub fn set_message_allocation(
        &self,
        id: i64,
        company_id: Option<i64>,
        method: Option<AllocationMethod>,
        allocated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.get_connection()?;

        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?, {} = ?, {} = ?, {} = ? WHERE {} = ?",
                email_messages::TABLE,
                email_messages::COMPANY_ID,
                email_messages::ALLOCATION_METHOD,
                email_messages::ALLOCATED_AT,
                email_messages::UPDATED_AT,
                email_messages::ID
            ),
            params![company_id, method, allocated_at, Utc::now(), id],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("message", id));
        }
        Ok(())
    }

    /// Drop every rule-based allocation of an account; manual and AI allocations stay.
    ///
    /// Returns the number of messages cleared.
    pub fn clear_auto_allocations(&self, account_id: i64) -> Result<usize> {
        let conn = self.get_connection()?;

        let cleared = conn.execute(
            &format!(
                "UPDATE {table} SET {company} = NULL, {method} = NULL, {at} = NULL, {updated} = ?1 \
                 WHERE {account} = ?2 AND {method} = ?3",
                table = email_messages::TABLE,
                company = email_messages::COMPANY_ID,
                method = email_messages::ALLOCATION_METHOD,
                at = email_messages::ALLOCATED_AT,
                updated = email_messages::UPDATED_AT,
                account = email_messages::ACCOUNT_ID
            ),
            params![Utc::now(), account_id, AllocationMethod::Auto],
        )?;

        Ok(cleared)
    }

    /// Record the classifier outcome for one message
    pub fn set_ai_status(&self, id: i64, status: AiStatus) -> Result<()> {
        let conn = self.get_connection()?;
        let now = Utc::now();

        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?, {} = ?, {} = ? WHERE {} = ?",
                email_messages::TABLE,
                email_messages::AI_PROCESSED,
                email_messages::AI_PROCESSED_AT,
                email_messages::UPDATED_AT,
                email_messages::ID
            ),
            params![status, now, now, id],
        )?;

        if changed == 0 {
            return Err(AllocatorError::not_found("message", id));
        }
        Ok(())
    }
}

fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
