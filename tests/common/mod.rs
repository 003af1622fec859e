//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use career_inbox::db::Database;
use career_inbox::models::{
    Company, CompanyEmailPattern, EmailAccount, EmailMessage, NewCompany, NewEmailAccount, NewEmailMessage,
    NewPattern, PatternType,
};

/// A database in its own temporary directory; the directory lives as long as this value
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let db = Database::new(&url).expect("Failed to create database");
        Self { db, _dir: dir }
    }

    pub fn account(&self, user_id: i64, address: &str) -> EmailAccount {
        self.db
            .create_account(&NewEmailAccount {
                user_id,
                email_address: address.to_string(),
                provider: None,
            })
            .expect("Failed to create account")
    }

    /// Company without the default keyword rules the service layer adds
    pub fn company(&self, user_id: i64, name: &str) -> Company {
        self.db
            .create_company(&NewCompany::named(user_id, name))
            .expect("Failed to create company")
    }

    pub fn pattern(&self, company_id: i64, pattern_type: PatternType, value: &str, priority: i64) -> CompanyEmailPattern {
        self.db
            .create_pattern(company_id, &NewPattern::new(pattern_type, value).with_priority(priority))
            .expect("Failed to create pattern")
    }

    pub fn message(&self, account_id: i64, external_id: &str, from: &str, subject: &str, body: &str) -> EmailMessage {
        let (message, inserted) = self
            .db
            .insert_message_if_absent(&NewEmailMessage {
                account_id,
                external_id: external_id.to_string(),
                subject: Some(subject.to_string()),
                from_address: from.to_string(),
                from_name: None,
                body_text: Some(body.to_string()),
                body_html: None,
                received_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            })
            .expect("Failed to insert message");
        assert!(inserted, "message {external_id} already existed");
        message
    }

    pub fn reload(&self, message_id: i64) -> EmailMessage {
        self.db
            .get_message(message_id)
            .expect("Failed to load message")
            .expect("Message disappeared")
    }
}
