//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! The DDL itself lives in `migrations/`.

/// Companies table schema
pub mod companies {
    /// Table name
    pub const TABLE: &str = "companies";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning user column
    pub const USER_ID: &str = "user_id";
    /// Company name column
    pub const NAME: &str = "name";
    /// Industry column
    pub const INDUSTRY: &str = "industry";
    /// Corporate site column
    pub const URL: &str = "url";
    /// Selection status column
    pub const STATUS: &str = "status";
    /// Free-form memo column
    pub const MEMO: &str = "memo";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Mail accounts table schema
pub mod email_accounts {
    /// Table name
    pub const TABLE: &str = "email_accounts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning user column
    pub const USER_ID: &str = "user_id";
    /// Mailbox address column
    pub const EMAIL_ADDRESS: &str = "email_address";
    /// Provider column (gmail, ...)
    pub const PROVIDER: &str = "provider";
    /// Last sync timestamp column
    pub const LAST_SYNC_AT: &str = "last_sync_at";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
}

/// Messages table schema
pub mod email_messages {
    /// Table name
    pub const TABLE: &str = "email_messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to the mail account
    pub const ACCOUNT_ID: &str = "email_account_id";
    /// Provider-side unique identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Subject column
    pub const SUBJECT: &str = "subject";
    /// Sender address column
    pub const FROM_ADDRESS: &str = "from_address";
    /// Sender display name column
    pub const FROM_NAME: &str = "from_name";
    /// Plain-text body column
    pub const BODY_TEXT: &str = "body_text";
    /// HTML body column
    pub const BODY_HTML: &str = "body_html";
    /// Receive timestamp column
    pub const RECEIVED_AT: &str = "received_at";
    /// Read flag column
    pub const IS_READ: &str = "is_read";
    /// Allocated company column
    pub const COMPANY_ID: &str = "company_id";
    /// Allocation method column (auto, manual, ai)
    pub const ALLOCATION_METHOD: &str = "allocation_method";
    /// Allocation timestamp column
    pub const ALLOCATED_AT: &str = "allocated_at";
    /// AI classification state column (0, 1, 2)
    pub const AI_PROCESSED: &str = "ai_processed";
    /// AI classification timestamp column
    pub const AI_PROCESSED_AT: &str = "ai_processed_at";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Company matching rules table schema
pub mod company_email_patterns {
    /// Table name
    pub const TABLE: &str = "company_email_patterns";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning company column
    pub const COMPANY_ID: &str = "company_id";
    /// Rule type column
    pub const PATTERN_TYPE: &str = "pattern_type";
    /// Rule value column
    pub const PATTERN_VALUE: &str = "pattern_value";
    /// Priority column (higher wins)
    pub const PRIORITY: &str = "priority";
    /// Enabled flag column
    pub const ENABLED: &str = "enabled";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Events table schema
pub mod events {
    /// Table name
    pub const TABLE: &str = "events";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning user column
    pub const USER_ID: &str = "user_id";
    /// Related company column
    pub const COMPANY_ID: &str = "company_id";
    /// Title column
    pub const TITLE: &str = "title";
    /// Description column
    pub const DESCRIPTION: &str = "description";
    /// Start timestamp column
    pub const START_AT: &str = "start_at";
    /// End timestamp column
    pub const END_AT: &str = "end_at";
    /// All-day flag column
    pub const ALL_DAY: &str = "all_day";
    /// Location column
    pub const LOCATION: &str = "location";
    /// Event type column
    pub const EVENT_TYPE: &str = "type";
    /// Reminder lead time column
    pub const REMIND_BEFORE_MINUTES: &str = "remind_before_minutes";
    /// Slack notification flag column
    pub const SLACK_NOTIFY: &str = "slack_notify";
    /// External calendar identifier column
    pub const GOOGLE_CALENDAR_EVENT_ID: &str = "google_calendar_event_id";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Entry-sheet (application document) table schema
pub mod es_entries {
    /// Table name
    pub const TABLE: &str = "es_entries";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning user column
    pub const USER_ID: &str = "user_id";
    /// Related company column
    pub const COMPANY_ID: &str = "company_id";
    /// Title column
    pub const TITLE: &str = "title";
    /// Deadline timestamp column
    pub const DEADLINE: &str = "deadline";
    /// Progress status column
    pub const STATUS: &str = "status";
    /// Memo column
    pub const MEMO: &str = "memo";
    /// External calendar identifier column
    pub const GOOGLE_CALENDAR_EVENT_ID: &str = "google_calendar_event_id";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}
