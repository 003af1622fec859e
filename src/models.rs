//! Data models for companies, mailbox messages and matching rules
//!
//! This module contains the row types read from the store, the `New*` structs
//! used for inserts, and the `*Patch` structs used for partial updates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a stored or user-supplied enum tag is not recognised
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Implements `Display`, `ToSql` and `FromSql` for a string-tagged enum with
/// `as_str` and `FromStr`.
macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

/// Kind of matching rule attached to a company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Sender address equals the value
    Address,
    /// Sender address ends with the value (`@example.com`)
    Domain,
    /// Subject contains the value
    SubjectKeyword,
    /// Body contains the value
    BodyKeyword,
}

impl PatternType {
    /// All rule kinds in matcher evaluation order
    pub const EVALUATION_ORDER: [Self; 4] = [
        Self::Address,
        Self::Domain,
        Self::SubjectKeyword,
        Self::BodyKeyword,
    ];

    /// Storage tag
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Domain => "domain",
            Self::SubjectKeyword => "subject_keyword",
            Self::BodyKeyword => "body_keyword",
        }
    }
}

impl FromStr for PatternType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address" => Ok(Self::Address),
            "domain" => Ok(Self::Domain),
            "subject_keyword" => Ok(Self::SubjectKeyword),
            "body_keyword" => Ok(Self::BodyKeyword),
            other => Err(ParseEnumError::new("pattern type", other)),
        }
    }
}

text_enum_sql!(PatternType);

/// How a message came to be associated with its company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Rule matcher
    Auto,
    /// Explicit user action (including clearing)
    Manual,
    /// Bulk classifier
    Ai,
}

impl AllocationMethod {
    /// Storage tag
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Ai => "ai",
        }
    }
}

impl FromStr for AllocationMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "ai" => Ok(Self::Ai),
            other => Err(ParseEnumError::new("allocation method", other)),
        }
    }
}

text_enum_sql!(AllocationMethod);

/// Classification state of a message. Stored as 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    /// Not yet submitted, or submitted in a batch that aborted
    #[default]
    Unprocessed,
    /// Classified (including ignored promotional mail)
    Processed,
    /// Classified, but applying the result failed
    Error,
}

impl AiStatus {
    /// Integer stored in `ai_processed`
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Unprocessed => 0,
            Self::Processed => 1,
            Self::Error => 2,
        }
    }

    /// Inverse of [`AiStatus::code`]
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unprocessed),
            1 => Some(Self::Processed),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

impl ToSql for AiStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for AiStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_i64()?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

/// Category of a scheduled event, inferred from its title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Company briefing, seminar or round-table
    Briefing,
    /// Interview or selection step
    Interview,
    /// Written or aptitude test
    Test,
    /// Anything else
    #[default]
    Other,
}

impl EventType {
    /// Storage tag
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Briefing => "briefing",
            Self::Interview => "interview",
            Self::Test => "test",
            Self::Other => "other",
        }
    }
}

impl FromStr for EventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "briefing" => Ok(Self::Briefing),
            "interview" => Ok(Self::Interview),
            "test" => Ok(Self::Test),
            "other" => Ok(Self::Other),
            other => Err(ParseEnumError::new("event type", other)),
        }
    }
}

text_enum_sql!(EventType);

/// Default selection status for a new company
pub const DEFAULT_COMPANY_STATUS: &str = "interested";

/// Status given to entry-sheet records created from a deadline
pub const ES_STATUS_NOT_STARTED: &str = "not_started";

/// A company the user is tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Primary key
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Display name
    pub name: String,
    /// Industry
    pub industry: Option<String>,
    /// Corporate site
    pub url: Option<String>,
    /// Selection status (`interested`, `applied`, ...)
    pub status: String,
    /// Free-form memo
    pub memo: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Insertable company
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCompany {
    /// Owning user
    pub user_id: i64,
    /// Display name
    pub name: String,
    /// Industry
    pub industry: Option<String>,
    /// Corporate site
    pub url: Option<String>,
    /// Selection status, defaults to `interested`
    pub status: Option<String>,
    /// Free-form memo
    pub memo: Option<String>,
}

impl NewCompany {
    /// Minimal company with just an owner and a name
    pub fn named(user_id: i64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update for a company; `None` leaves the column untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub memo: Option<String>,
}

/// A mailbox whose messages are ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAccount {
    /// Primary key
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Mailbox address
    pub email_address: String,
    /// Provider tag
    pub provider: String,
    /// Last successful sync
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Insertable mail account
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEmailAccount {
    pub user_id: i64,
    pub email_address: String,
    /// Provider tag, defaults to `gmail`
    pub provider: Option<String>,
}

/// A stored inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Primary key
    pub id: i64,
    /// Mail account the message was fetched from
    pub account_id: i64,
    /// Provider-side message id, unique across the store
    pub external_id: String,
    /// Subject line
    pub subject: Option<String>,
    /// Bare sender address
    pub from_address: String,
    /// Sender display name
    pub from_name: Option<String>,
    /// Plain-text body
    pub body_text: Option<String>,
    /// HTML body
    pub body_html: Option<String>,
    /// Receive time
    pub received_at: DateTime<Utc>,
    /// Read flag
    pub is_read: bool,
    /// Allocated company
    pub company_id: Option<i64>,
    /// How the company was assigned
    pub allocation_method: Option<AllocationMethod>,
    /// When the company was assigned
    pub allocated_at: Option<DateTime<Utc>>,
    /// Bulk classification state
    pub ai_processed: AiStatus,
    /// When the classification state last changed
    pub ai_processed_at: Option<DateTime<Utc>>,
}

impl EmailMessage {
    /// Subject or the empty string
    #[must_use]
    pub fn subject_text(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    /// Plain-text body or the empty string
    #[must_use]
    pub fn body(&self) -> &str {
        self.body_text.as_deref().unwrap_or("")
    }
}

/// Insertable message
#[derive(Debug, Clone, Deserialize)]
pub struct NewEmailMessage {
    pub account_id: i64,
    pub external_id: String,
    pub subject: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A company matching rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyEmailPattern {
    /// Primary key
    pub id: i64,
    /// Owning company
    pub company_id: i64,
    /// Rule kind
    pub pattern_type: PatternType,
    /// Value compared against the message
    pub pattern_value: String,
    /// Higher wins within a rule kind
    pub priority: i64,
    /// Disabled rules never match
    pub enabled: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Insertable rule. Priority defaults to 0, enabled to true.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPattern {
    pub pattern_type: PatternType,
    pub pattern_value: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl NewPattern {
    /// Enabled rule at priority 0
    pub fn new(pattern_type: PatternType, pattern_value: impl Into<String>) -> Self {
        Self {
            pattern_type,
            pattern_value: pattern_value.into(),
            priority: None,
            enabled: None,
        }
    }

    /// Same rule with an explicit priority
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Partial update for a rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternPatch {
    pub pattern_type: Option<PatternType>,
    pub pattern_value: Option<String>,
    pub priority: Option<i64>,
    pub enabled: Option<bool>,
}

/// A scheduled event (briefing, interview, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub user_id: i64,
    pub company_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location: Option<String>,
    pub event_type: EventType,
    pub remind_before_minutes: i64,
    pub slack_notify: bool,
    /// Id of the mirrored external calendar entry
    pub google_calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insertable event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub user_id: i64,
    pub company_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location: Option<String>,
    pub event_type: EventType,
    pub remind_before_minutes: i64,
    pub slack_notify: bool,
}

/// Partial update for an event
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub event_type: Option<EventType>,
    pub remind_before_minutes: Option<i64>,
    pub slack_notify: Option<bool>,
    pub google_calendar_event_id: Option<String>,
}

/// An entry-sheet (application document) with a deadline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsEntry {
    pub id: i64,
    pub user_id: i64,
    pub company_id: Option<i64>,
    pub title: String,
    pub deadline: Option<DateTime<Utc>>,
    pub status: String,
    pub memo: Option<String>,
    pub google_calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insertable entry-sheet record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEsEntry {
    pub user_id: i64,
    pub company_id: Option<i64>,
    pub title: String,
    pub deadline: Option<DateTime<Utc>>,
    pub status: String,
    pub memo: Option<String>,
}

/// Partial update for an entry-sheet record
#[derive(Debug, Clone, Default)]
pub struct EsEntryPatch {
    pub title: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub memo: Option<String>,
    pub google_calendar_event_id: Option<String>,
}

/// Outcome of a mailbox ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Messages newly stored
    pub messages_fetched: usize,
    /// New messages the matcher assigned to a company
    pub messages_allocated: usize,
    /// Per-message failures, in input order
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_type_round_trips_through_str() {
        for ty in PatternType::EVALUATION_ORDER {
            assert_eq!(ty.as_str().parse::<PatternType>().unwrap(), ty);
        }
        assert!("sender".parse::<PatternType>().is_err());
    }

    #[test]
    fn test_ai_status_codes() {
        assert_eq!(AiStatus::from_code(2), Some(AiStatus::Error));
        assert_eq!(AiStatus::from_code(3), None);
        assert_eq!(AiStatus::default().code(), 0);
    }
}
