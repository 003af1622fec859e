use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocation::{AllocationOutcome, AllocationService};
use crate::dates::parse_timestamp;
use crate::db::Database;
use crate::error::{AllocatorError, Result};
use crate::models::{
    Company, CompanyPatch, EmailAccount, EmailMessage, NewCompany, NewEmailAccount, NewEmailMessage, NewPattern,
    PatternType, SyncResult,
};
use crate::validation::InputValidator;

static ANGLE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<(.+?)>").expect("Invalid regex"));
static DISPLAY_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?)\s*<").expect("Invalid regex"));

/// Priority of the subject-keyword rule created with every company
pub const DEFAULT_SUBJECT_RULE_PRIORITY: i64 = 1;
/// Priority of the body-keyword rule created with every company
pub const DEFAULT_BODY_RULE_PRIORITY: i64 = 0;

/// Split a raw `From` header into bare address and display name.
///
/// `"Acme HR" <hr@acme.com>` gives `("hr@acme.com", Some("Acme HR"))`; a bare
/// address is returned as is with no name.
#[must_use]
pub fn parse_from_header(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();

    let address = ANGLE_ADDRESS
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str())
        .trim()
        .to_string();

    let name = DISPLAY_NAME
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_matches('"').trim().to_string())
        .filter(|name| !name.is_empty());

    (address, name)
}

/// Company lifecycle, including the default rules every company starts with
#[derive(Debug, Clone)]
pub struct CompanyService {
    db: Database,
}

impl CompanyService {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a company plus its default subject-keyword and body-keyword rules
    pub fn create(&self, new_company: NewCompany) -> Result<Company> {
        InputValidator::validate_company_name(&new_company.name)?;
        let name = InputValidator::sanitize_text(&new_company.name);

        let company = self.db.create_company(&NewCompany { name, ..new_company })?;

        for (pattern_type, priority) in [
            (PatternType::SubjectKeyword, DEFAULT_SUBJECT_RULE_PRIORITY),
            (PatternType::BodyKeyword, DEFAULT_BODY_RULE_PRIORITY),
        ] {
            let value = InputValidator::normalize_pattern_value(pattern_type, &company.name)?;
            self.db.create_pattern(
                company.id,
                &NewPattern::new(pattern_type, value).with_priority(priority),
            )?;
        }

        info!(company_id = company.id, name = %company.name, "Company created");
        Ok(company)
    }

    pub fn get(&self, id: i64) -> Result<Company> {
        self.db
            .get_company(id)?
            .ok_or_else(|| AllocatorError::not_found("company", id))
    }

    pub fn list(&self, user_id: i64) -> Result<Vec<Company>> {
        self.db.list_companies(user_id)
    }

    pub fn search(&self, user_id: i64, query: &str) -> Result<Vec<Company>> {
        self.db.search_companies(user_id, query.trim())
    }

    /// Apply a partial update. Renaming leaves existing rules untouched.
    pub fn update(&self, id: i64, patch: CompanyPatch) -> Result<Company> {
        if let Some(name) = &patch.name {
            InputValidator::validate_company_name(name)?;
        }
        let company = self.db.update_company(id, &patch)?;
        debug!(company_id = id, "Company updated");
        Ok(company)
    }

    /// Delete a company; its rules go with it and its messages become unallocated
    pub fn delete(&self, id: i64) -> Result<()> {
        self.db.delete_company(id)?;
        info!(company_id = id, "Company deleted");
        Ok(())
    }
}

/// A message as delivered by the mail client
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    /// Provider-side message id
    #[serde(alias = "message_id")]
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    /// Raw `From` header, used when `from_address` is absent
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    /// ISO 8601; defaults to the ingestion time
    #[serde(default)]
    pub received_at: Option<String>,
}

/// What happened to one ingested message
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub message: EmailMessage,
    /// False when the external id was already stored
    pub inserted: bool,
    /// Matcher result for newly stored messages
    pub allocation: Option<AllocationOutcome>,
}

/// Mailbox-side operations: accounts, ingestion and message listings
#[derive(Debug, Clone)]
pub struct MailboxService {
    db: Database,
    allocation: AllocationService,
}

impl MailboxService {
    pub const fn new(db: Database, allocation: AllocationService) -> Self {
        Self { db, allocation }
    }

    pub fn add_account(&self, new_account: NewEmailAccount) -> Result<EmailAccount> {
        InputValidator::validate_email(new_account.email_address.trim())?;
        let account = self.db.create_account(&new_account)?;
        info!(account_id = account.id, "Mail account added");
        Ok(account)
    }

    pub fn list_accounts(&self, user_id: i64) -> Result<Vec<EmailAccount>> {
        self.db.list_accounts(user_id)
    }

    fn to_new_message(account_id: i64, inbound: InboundEmail) -> Result<NewEmailMessage> {
        if inbound.id.trim().is_empty() {
            return Err(AllocatorError::Validation("Message id cannot be empty".into()));
        }

        let (from_address, header_name) = match (&inbound.from_address, &inbound.from) {
            (Some(address), _) => (address.trim().to_string(), None),
            (None, Some(raw)) => parse_from_header(raw),
            (None, None) => {
                return Err(AllocatorError::Validation(format!(
                    "Message {} has no sender",
                    inbound.id
                )))
            }
        };
        if from_address.is_empty() {
            return Err(AllocatorError::Validation(format!("Message {} has no sender", inbound.id)));
        }

        let received_at = match inbound.received_at.as_deref() {
            None => Utc::now(),
            Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                AllocatorError::Validation(format!("Invalid received_at for message {}: {raw}", inbound.id))
            })?,
        };

        Ok(NewEmailMessage {
            account_id,
            external_id: inbound.id,
            subject: inbound.subject,
            from_address,
            from_name: inbound.from_name.or(header_name),
            body_text: inbound.body_text,
            body_html: inbound.body_html,
            received_at,
        })
    }

    /// Store a message if its external id is new, then try to allocate it
    pub fn ingest(&self, account_id: i64, inbound: InboundEmail) -> Result<IngestOutcome> {
        if self.db.get_account(account_id)?.is_none() {
            return Err(AllocatorError::not_found("account", account_id));
        }

        let new_message = Self::to_new_message(account_id, inbound)?;
        let (message, inserted) = self.db.insert_message_if_absent(&new_message)?;

        if !inserted {
            debug!(external_id = %message.external_id, "Message already stored");
            return Ok(IngestOutcome {
                message,
                inserted,
                allocation: None,
            });
        }

        let allocation = self.allocation.allocate(message.id)?;
        let message = self
            .db
            .get_message(message.id)?
            .ok_or_else(|| AllocatorError::not_found("message", message.id))?;

        Ok(IngestOutcome {
            message,
            inserted,
            allocation: Some(allocation),
        })
    }

    /// Ingest a batch; one message failing does not stop the rest
    pub fn ingest_batch(&self, account_id: i64, batch: Vec<InboundEmail>) -> Result<SyncResult> {
        if self.db.get_account(account_id)?.is_none() {
            return Err(AllocatorError::not_found("account", account_id));
        }

        let mut result = SyncResult::default();
        for inbound in batch {
            let external_id = inbound.id.clone();
            match self.ingest(account_id, inbound) {
                Ok(outcome) if outcome.inserted => {
                    result.messages_fetched += 1;
                    if outcome.allocation.as_ref().is_some_and(AllocationOutcome::newly_allocated) {
                        result.messages_allocated += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(external_id = %external_id, error = %e, "Failed to ingest message");
                    result.errors.push(format!("{external_id}: {e}"));
                }
            }
        }

        self.db.touch_account_sync(account_id, Utc::now())?;
        info!(
            account_id,
            fetched = result.messages_fetched,
            allocated = result.messages_allocated,
            errors = result.errors.len(),
            "Ingestion finished"
        );
        Ok(result)
    }

    pub fn list_messages(&self, account_id: i64, limit: usize, offset: usize) -> Result<Vec<EmailMessage>> {
        InputValidator::validate_batch_size(limit)?;
        self.db.list_messages_by_account(account_id, limit, offset)
    }

    pub fn list_by_company(&self, company_id: i64) -> Result<Vec<EmailMessage>> {
        self.db.list_messages_by_company(company_id)
    }

    pub fn list_unallocated(&self, account_id: i64) -> Result<Vec<EmailMessage>> {
        self.db.list_unallocated_messages(account_id)
    }

    pub fn search(&self, account_id: i64, query: &str) -> Result<Vec<EmailMessage>> {
        self.db.search_messages(account_id, query.trim())
    }

    pub fn mark_read(&self, message_id: i64, is_read: bool) -> Result<()> {
        self.db.mark_message_read(message_id, is_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_header_with_name() {
        let (address, name) = parse_from_header("\"Acme 採用担当\" <hr@acme.com>");
        assert_eq!(address, "hr@acme.com");
        assert_eq!(name.as_deref(), Some("Acme 採用担当"));
    }

    #[test]
    fn test_parse_from_header_bare_address() {
        let (address, name) = parse_from_header("  noreply@jobs.example.jp ");
        assert_eq!(address, "noreply@jobs.example.jp");
        assert!(name.is_none());
    }

    #[test]
    fn test_parse_from_header_angle_only() {
        let (address, name) = parse_from_header("<info@x.com>");
        assert_eq!(address, "info@x.com");
        assert!(name.is_none());
    }
}
