//! Career Inbox - Mailbox Allocation for Job Hunting
//!
//! A Rust library that sorts a job seeker's inbound mail into the companies
//! they are tracking, and extracts interview, briefing and deadline dates from
//! it with an external text-completion command.
//!
//! # Features
//!
//! - Per-company matching rules (address, domain, subject and body keywords)
//! - Automatic, manual and bulk re-allocation of messages
//! - Batch classification through a configurable shell command
//! - Events and entry-sheet deadlines stored next to the messages

/// Message allocation and rule management
pub mod allocation;
/// Bulk classification through the completion command
pub mod classifier;
/// Configuration management
pub mod config;
/// Timestamp parsing
pub mod dates;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// Rule matching
pub mod matcher;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Seams for schedule persistence and calendar mirroring
pub mod repository;
/// Database schema definitions
pub mod schema;
/// Company and mailbox services
pub mod service;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use allocation::{AllocationOutcome, AllocationService, ReallocationSummary};
pub use classifier::runner::{CommandRunner, CompletionRunner};
pub use classifier::{BatchResult, BulkClassifier, ClassifierLog, ExtractedSchedule, LogEntry, LogKind};
pub use db::Database;
pub use error::{AllocatorError, ErrorKind, OperationResult, Result};
pub use matcher::{MatchOutcome, RuleMatcher};
pub use models::{AiStatus, AllocationMethod, Company, CompanyEmailPattern, EmailMessage, PatternType};
pub use service::{CompanyService, InboundEmail, MailboxService};
